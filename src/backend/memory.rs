// src/backend/memory.rs
//! In-process backend
//!
//! Implements both collaborator traits on top of plain maps. Every write
//! re-runs the live queries of the touched collection and pushes the full
//! result set to their subscribers, the way the hosted document store does.
//! The message collection gets the same access rules the hosted rules enforce:
//! only the sender edits, only the recipient marks read, either side deletes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use super::{is_server_timestamp, Document, DocumentFeed, FeedBatch, FeedSubscription, IdentityProvider, Query};
use crate::config::{ClientConfig, DEFAULT_MIN_PASSWORD_LENGTH};
use crate::error::BackendError;
use crate::models::{AuthState, Participant};

const AUTO_ID_LEN: usize = 20;
const FEED_BUFFER: usize = 64;
const AUTH_BUFFER: usize = 16;

/// Fields only the sender of a message may change
const SENDER_FIELDS: [&str; 6] = ["content", "edited", "type", "chatId", "senderId", "recipientId"];

struct Account {
    uid: Participant,
    password: String,
}

struct LiveQuery {
    id: u64,
    query: Query,
    tx: mpsc::Sender<FeedBatch>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Value>>,
    live_queries: Vec<LiveQuery>,
    next_query_id: u64,
    accounts: HashMap<String, Account>,
    current_user: Option<Participant>,
    auth_watchers: Vec<mpsc::Sender<AuthState>>,
    hold_timestamps: bool,
    /// (collection, document id, field) still waiting for a server time
    pending_stamps: Vec<(String, String, String)>,
    last_stamp: Option<DateTime<Utc>>,
    offline: bool,
}

impl State {
    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline {
            return Err(BackendError::Unavailable("network is offline".to_string()));
        }
        Ok(())
    }

    fn require_user(&self) -> Result<Participant, BackendError> {
        self.current_user.clone().ok_or(BackendError::Unauthenticated)
    }

    fn snapshot(&self, query: &Query) -> Vec<Document> {
        let mut documents: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .filter(|doc| query.matches(doc))
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut documents);
        documents
    }

    fn document(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collections.get(collection).and_then(|docs| docs.get(id))
    }

    /// Strictly increasing server clock
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last >= now => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn resolve_server_values(&mut self, collection: &str, id: &str, fields: &mut Value) {
        let Some(object) = fields.as_object_mut() else {
            return;
        };
        let sentinel_fields: Vec<String> = object
            .iter()
            .filter(|(_, value)| is_server_timestamp(value))
            .map(|(key, _)| key.clone())
            .collect();
        for field in sentinel_fields {
            let value = if self.hold_timestamps {
                self.pending_stamps
                    .push((collection.to_string(), id.to_string(), field.clone()));
                Value::Null
            } else {
                stamp_value(self.next_stamp())
            };
            object.insert(field, value);
        }
    }

    fn notify_auth(&mut self) {
        let auth_state = match &self.current_user {
            Some(uid) => AuthState::SignedIn(uid.clone()),
            None => AuthState::SignedOut,
        };
        self.auth_watchers.retain(|tx| match tx.try_send(auth_state.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Auth watcher is not keeping up, dropping transition");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

fn stamp_value(stamp: DateTime<Utc>) -> Value {
    Value::String(stamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn auto_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LEN)
        .map(char::from)
        .collect()
}

fn str_field<'a>(fields: &'a Value, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str)
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

pub struct MemoryBackend {
    state: Mutex<State>,
    messages_collection: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_config(&ClientConfig::default())
    }

    pub fn with_config(config: &ClientConfig) -> Self {
        MemoryBackend {
            state: Mutex::new(State::default()),
            messages_collection: config.messages_collection.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing (or regaining) the network
    pub fn set_offline(&self, offline: bool) {
        info!("Memory backend going {}", if offline { "offline" } else { "online" });
        self.lock().offline = offline;
    }

    /// While held, server timestamps stay null until `acknowledge_pending`
    pub fn hold_timestamps(&self, hold: bool) {
        self.lock().hold_timestamps = hold;
    }

    /// Assign server times to every held timestamp, oldest write first
    pub async fn acknowledge_pending(&self) {
        let touched = {
            let mut state = self.lock();
            let pending = std::mem::take(&mut state.pending_stamps);
            let mut touched = BTreeSet::new();
            for (collection, id, field) in pending {
                let stamp = stamp_value(state.next_stamp());
                if let Some(fields) = state
                    .collections
                    .get_mut(&collection)
                    .and_then(|docs| docs.get_mut(&id))
                    .and_then(Value::as_object_mut)
                {
                    fields.insert(field, stamp);
                    touched.insert(collection);
                }
            }
            touched
        };
        for collection in touched {
            self.publish(&collection).await;
        }
    }

    /// Store a document without access checks, e.g. to set up fixtures
    pub async fn seed(&self, collection: &str, id: &str, fields: Value) {
        {
            let mut state = self.lock();
            let mut fields = fields;
            state.resolve_server_values(collection, id, &mut fields);
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), fields);
        }
        self.publish(collection).await;
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.lock().collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn live_query_count(&self) -> usize {
        self.lock().live_queries.len()
    }

    /// Push the current result set of every live query on `collection`
    async fn publish(&self, collection: &str) {
        let deliveries: Vec<(u64, mpsc::Sender<FeedBatch>, FeedBatch)> = {
            let state = self.lock();
            state
                .live_queries
                .iter()
                .filter(|live| live.query.collection == collection)
                .map(|live| (live.id, live.tx.clone(), state.snapshot(&live.query)))
                .collect()
        };

        let mut closed = Vec::new();
        for (id, tx, batch) in deliveries {
            if tx.send(batch).await.is_err() {
                closed.push(id);
            }
        }
        if !closed.is_empty() {
            debug!("Dropping {} closed live queries on {}", closed.len(), collection);
            self.lock().live_queries.retain(|live| !closed.contains(&live.id));
        }
    }

    fn check_message_create(&self, me: &str, fields: &Value) -> Result<(), BackendError> {
        if str_field(fields, "senderId") != Some(me) {
            return Err(BackendError::PermissionDenied(
                "messages must be sent as the signed-in user".to_string(),
            ));
        }
        Ok(())
    }

    fn check_message_update(&self, me: &str, id: &str, existing: &Value, changes: &Value) -> Result<(), BackendError> {
        let Some(changes) = changes.as_object() else {
            return Err(BackendError::Other("update fields must be an object".to_string()));
        };
        let sender = str_field(existing, "senderId");
        let recipient = str_field(existing, "recipientId");
        for key in changes.keys() {
            let allowed = if SENDER_FIELDS.contains(&key.as_str()) {
                sender == Some(me)
            } else if key == "read" {
                recipient == Some(me)
            } else {
                sender == Some(me) || recipient == Some(me)
            };
            if !allowed {
                return Err(BackendError::PermissionDenied(format!(
                    "{} may not change '{}' of message {}",
                    me, key, id
                )));
            }
        }
        Ok(())
    }

    fn check_message_delete(&self, me: &str, id: &str, existing: &Value) -> Result<(), BackendError> {
        if str_field(existing, "senderId") == Some(me) || str_field(existing, "recipientId") == Some(me) {
            Ok(())
        } else {
            Err(BackendError::PermissionDenied(format!("{} may not delete message {}", me, id)))
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    fn current_user(&self) -> Option<Participant> {
        self.lock().current_user.clone()
    }

    fn on_auth_change(&self) -> mpsc::Receiver<AuthState> {
        let (tx, rx) = mpsc::channel(AUTH_BUFFER);
        let mut state = self.lock();
        let initial = match &state.current_user {
            Some(uid) => AuthState::SignedIn(uid.clone()),
            None => AuthState::SignedOut,
        };
        // Fresh channel, cannot be full
        let _ = tx.try_send(initial);
        state.auth_watchers.push(tx);
        rx
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<Participant, BackendError> {
        let mut state = self.lock();
        state.check_online()?;
        if !looks_like_email(email) {
            return Err(BackendError::InvalidEmail);
        }
        if password.chars().count() < DEFAULT_MIN_PASSWORD_LENGTH {
            return Err(BackendError::WeakPassword);
        }
        let key = email.to_lowercase();
        if state.accounts.contains_key(&key) {
            return Err(BackendError::EmailAlreadyInUse);
        }

        let uid = Uuid::new_v4().simple().to_string();
        state.accounts.insert(
            key,
            Account {
                uid: uid.clone(),
                password: password.to_string(),
            },
        );
        state.current_user = Some(uid.clone());
        state.notify_auth();
        info!("Created account {} for {}", uid, email);
        Ok(uid)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Participant, BackendError> {
        let mut state = self.lock();
        state.check_online()?;
        let uid = match state.accounts.get(&email.to_lowercase()) {
            Some(account) if account.password == password => account.uid.clone(),
            _ => return Err(BackendError::InvalidCredentials),
        };
        state.current_user = Some(uid.clone());
        state.notify_auth();
        debug!("Signed in {}", uid);
        Ok(uid)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(uid) = state.current_user.take() {
            debug!("Signed out {}", uid);
            state.notify_auth();
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentFeed for MemoryBackend {
    async fn subscribe(&self, query: Query) -> Result<FeedSubscription, BackendError> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let initial = {
            let mut state = self.lock();
            state.check_online()?;
            let id = state.next_query_id;
            state.next_query_id += 1;
            let initial = state.snapshot(&query);
            debug!("Live query {} on {} with {} filters", id, query.collection, query.filters.len());
            state.live_queries.push(LiveQuery { id, query, tx: tx.clone() });
            initial
        };
        tx.send(initial)
            .await
            .map_err(|_| BackendError::Other("live query closed before first batch".to_string()))?;
        Ok(rx)
    }

    async fn fetch(&self, query: Query) -> Result<Vec<Document>, BackendError> {
        let state = self.lock();
        state.check_online()?;
        Ok(state.snapshot(&query))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, BackendError> {
        let state = self.lock();
        state.check_online()?;
        Ok(state.document(collection, id).map(|fields| Document::new(id, fields.clone())))
    }

    async fn create(&self, collection: &str, fields: Value) -> Result<String, BackendError> {
        let id = {
            let mut state = self.lock();
            state.check_online()?;
            let me = state.require_user()?;
            if collection == self.messages_collection {
                self.check_message_create(&me, &fields)?;
            }
            let id = auto_id();
            let mut fields = fields;
            state.resolve_server_values(collection, &id, &mut fields);
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), fields);
            id
        };
        self.publish(collection).await;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, fields: Value) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            state.check_online()?;
            let me = state.require_user()?;
            if collection == self.messages_collection {
                self.check_message_create(&me, &fields)?;
            }
            let mut fields = fields;
            state.resolve_server_values(collection, id, &mut fields);
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), fields);
        }
        self.publish(collection).await;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            state.check_online()?;
            let me = state.require_user()?;
            let existing = state
                .document(collection, id)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
            if collection == self.messages_collection {
                self.check_message_update(&me, id, &existing, &fields)?;
            }

            let mut changes = fields;
            state.resolve_server_values(collection, id, &mut changes);
            let Value::Object(changes) = changes else {
                return Err(BackendError::Other("update fields must be an object".to_string()));
            };
            if let Some(target) = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .and_then(Value::as_object_mut)
            {
                target.extend(changes);
            }
        }
        self.publish(collection).await;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            state.check_online()?;
            let me = state.require_user()?;
            let existing = state
                .document(collection, id)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
            if collection == self.messages_collection {
                self.check_message_delete(&me, id, &existing)?;
            }
            if let Some(docs) = state.collections.get_mut(collection) {
                docs.remove(id);
            }
        }
        self.publish(collection).await;
        Ok(())
    }
}
