// src/backend/mod.rs
//! Boundary with the backend-as-a-service platform
//!
//! The messaging core never talks to a network itself. It is handed an
//! `IdentityProvider` and a `DocumentFeed` and does everything through them.
//! `memory::MemoryBackend` implements both in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::cmp::Ordering;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::models::{AuthState, Participant};

pub mod memory;

pub use memory::MemoryBackend;

/// A full snapshot of every document matching a subscribed query
pub type FeedBatch = Vec<Document>;

/// Receiving end of a live query. Dropping it ends the subscription.
pub type FeedSubscription = mpsc::Receiver<FeedBatch>;

const SERVER_VALUE_KEY: &str = ".sv";

/// Field value the backend replaces with its own clock when it stores the write
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some("timestamp")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Document {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.fields)
    }
}

/// Equality filters over one collection, optionally ordered ascending by a field
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<String>,
}

impl Query {
    pub fn new(collection: &str) -> Self {
        Query {
            collection: collection.to_string(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| document.field(field) == Some(expected))
    }

    /// Stable ascending sort on `order_by`; documents without a value go last
    pub fn sort(&self, documents: &mut [Document]) {
        if let Some(field) = &self.order_by {
            documents.sort_by(|a, b| compare_values(a.field(field), b.field(field)));
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            // RFC 3339 strings with different fraction widths don't sort lexically
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Authentication collaborator
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<Participant>;

    /// Auth transitions, starting with the state at the time of the call
    fn on_auth_change(&self) -> mpsc::Receiver<AuthState>;

    async fn create_account(&self, email: &str, password: &str) -> Result<Participant, BackendError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Participant, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Document database collaborator with live queries
#[async_trait]
pub trait DocumentFeed: Send + Sync {
    /// Start a live query. The first batch is the current result set.
    async fn subscribe(&self, query: Query) -> Result<FeedSubscription, BackendError>;

    /// One-shot read of a query's current result set
    async fn fetch(&self, query: Query) -> Result<Vec<Document>, BackendError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, BackendError>;

    /// Store a new document under a backend-assigned id
    async fn create(&self, collection: &str, fields: Value) -> Result<String, BackendError>;

    /// Store a document under a caller-chosen id, replacing any previous one
    async fn set(&self, collection: &str, id: &str, fields: Value) -> Result<(), BackendError>;

    /// Merge `fields` into an existing document
    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), BackendError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError>;
}
