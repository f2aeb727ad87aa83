// Client-side messaging core
// Each component owns one piece of view state and keeps it in step with the
// backend's live queries. None of them talk to each other.

use log::warn;

use crate::backend::{Document, FeedBatch};
use crate::models::{Contact, Message};

pub mod account;
pub mod contacts;
pub mod message_stream;
pub mod subscription;
pub mod unread;

pub use account::{Account, LoginForm, RegistrationForm};
pub use contacts::ContactIndex;
pub use message_stream::{reconcile, MessageSetUpdate, MessageStream, MessageView};
pub use subscription::{SubscriptionHandle, Update, Updates};
pub use unread::UnreadTracker;

// Document field names shared with the other clients of the same project
pub(crate) mod fields {
    pub const CHAT_ID: &str = "chatId";
    pub const RECIPIENT_ID: &str = "recipientId";
    pub const PHONE: &str = "phone";
    pub const TIMESTAMP: &str = "timestamp";
    pub const READ: &str = "read";
}

/// Decode a batch of message documents, skipping any that don't parse
pub(crate) fn decode_messages(batch: FeedBatch) -> Vec<Message> {
    batch.into_iter().filter_map(decode_message).collect()
}

fn decode_message(doc: Document) -> Option<Message> {
    match doc.decode::<Message>() {
        Ok(mut message) => {
            message.id = doc.id;
            Some(message)
        }
        Err(e) => {
            warn!("Skipping malformed message document {}: {}", doc.id, e);
            None
        }
    }
}

pub(crate) fn decode_contacts(documents: Vec<Document>) -> Vec<Contact> {
    documents
        .into_iter()
        .filter_map(|doc| match doc.decode::<Contact>() {
            Ok(mut contact) => {
                contact.id = doc.id;
                Some(contact)
            }
            Err(e) => {
                warn!("Skipping malformed user document {}: {}", doc.id, e);
                None
            }
        })
        .collect()
}
