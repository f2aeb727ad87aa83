// Re-export needed modules for testing
pub mod backend;
pub mod channel;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod utils;

// Re-export main types for convenience
pub use channel::{channel_id, ChannelId};
pub use chat::{Account, ContactIndex, MessageStream, UnreadTracker};
pub use config::ClientConfig;
pub use error::{BackendError, ChatError};
pub use models::*;
