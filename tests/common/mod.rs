// Common test utilities for integration tests
// Every test runs against an in-memory backend with two registered users,
// alice and bob. Alice is signed in unless a test says otherwise.
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{info, LevelFilter};
use serde_json::{json, Value};
use tokio::time::timeout;

use msgapp::backend::{DocumentFeed, IdentityProvider, MemoryBackend};
use msgapp::chat::Updates;
use msgapp::{channel_id, ChannelId, ClientConfig, Participant};

pub const PASSWORD: &str = "correct horse";
pub const ALICE_EMAIL: &str = "alice@example.com";
pub const BOB_EMAIL: &str = "bob@example.com";

/// Point this at a file to capture the crate's own log output from a test run
pub const TEST_LOG_ENV_VAR: &str = "MSGAPP_TEST_LOG";

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests. With `MSGAPP_TEST_LOG` set, the crate's
/// own logger writes there at debug level; otherwise env_logger is used.
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        if let Some(path) = std::env::var_os(TEST_LOG_ENV_VAR) {
            let config = ClientConfig {
                log_level: "debug".to_string(),
                log_file: Some(path.into()),
                ..ClientConfig::default()
            };
            if msgapp::utils::init_logging(&config).is_ok() {
                return;
            }
        }
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub config: ClientConfig,
    pub alice: Participant,
    pub bob: Participant,
}

pub async fn fixture() -> Fixture {
    setup_logging();
    let backend = Arc::new(MemoryBackend::new());
    let bob = backend
        .create_account(BOB_EMAIL, PASSWORD)
        .await
        .expect("bob account");
    let alice = backend
        .create_account(ALICE_EMAIL, PASSWORD)
        .await
        .expect("alice account");
    info!("Fixture users: alice={} bob={}", alice, bob);

    Fixture {
        backend,
        config: ClientConfig::default(),
        alice,
        bob,
    }
}

impl Fixture {
    pub fn feed(&self) -> Arc<dyn DocumentFeed> {
        self.backend.clone()
    }

    pub fn identity(&self) -> Arc<dyn IdentityProvider> {
        self.backend.clone()
    }

    pub fn channel(&self) -> ChannelId {
        channel_id(&self.alice, &self.bob).expect("distinct users")
    }

    pub async fn sign_in(&self, email: &str) -> Participant {
        self.backend.sign_in(email, PASSWORD).await.expect("sign in")
    }

    /// Store a message directly, bypassing access rules
    pub async fn seed_message(&self, id: &str, from: &str, to: &str, content: &str, timestamp: Option<&str>) {
        let channel = channel_id(from, to).expect("distinct users");
        let timestamp = timestamp.map_or(Value::Null, |t| json!(t));
        self.backend
            .seed(
                &self.config.messages_collection,
                id,
                json!({
                    "chatId": channel.as_str(),
                    "senderId": from,
                    "recipientId": to,
                    "content": content,
                    "type": "text",
                    "timestamp": timestamp,
                    "edited": false,
                    "read": false,
                }),
            )
            .await;
    }
}

/// Wait for an update whose payload satisfies `predicate`
pub async fn wait_for_update<T>(updates: &mut Updates<T>, predicate: impl Fn(&T) -> bool) -> Result<T> {
    match timeout(Duration::from_secs(2), async {
        while let Some(update) = updates.recv().await {
            if predicate(&update.payload) {
                return Ok(update.payload);
            }
        }
        Err(anyhow!("Update receiver closed"))
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Timed out waiting for update")),
    }
}

/// Let spawned tasks run until `condition` holds
pub async fn wait_until(condition: impl Fn() -> bool) -> Result<()> {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .map_err(|_| anyhow!("Timed out waiting for condition"))
}

/// True if no update arrives within a short grace period
pub async fn no_update_within<T>(updates: &mut Updates<T>, millis: u64) -> bool {
    timeout(Duration::from_millis(millis), updates.recv()).await.is_err()
}
