// Unread message badges
//
// Follows every unread message addressed to the viewer and recounts the
// whole map on each batch. Marking a message read only sends the request;
// the count drops when the backend's next batch no longer contains it.

use log::{debug, error, info};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::subscription::{spawn_pump, Generation, SubscriptionHandle, Update, Updates};
use super::{decode_messages, fields};
use crate::backend::{DocumentFeed, Query};
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::{Participant, UnreadCounts};

struct ActiveViewer {
    handle: SubscriptionHandle,
    viewer: Participant,
    counts: Arc<watch::Sender<UnreadCounts>>,
    pump: JoinHandle<()>,
}

pub struct UnreadTracker {
    feed: Arc<dyn DocumentFeed>,
    collection: String,
    generation: Generation,
    updates_tx: mpsc::Sender<Update<UnreadCounts>>,
    active: Option<ActiveViewer>,
}

impl UnreadTracker {
    pub fn new(feed: Arc<dyn DocumentFeed>, config: &ClientConfig) -> (Self, Updates<UnreadCounts>) {
        let generation = Generation::new();
        let (updates_tx, updates) = Updates::channel(config.update_buffer, generation.clone());

        (
            Self {
                feed,
                collection: config.messages_collection.clone(),
                generation,
                updates_tx,
                active: None,
            },
            updates,
        )
    }

    /// Follow unread messages addressed to `viewer`. A previous subscription
    /// is replaced only once the new feed is established.
    pub async fn subscribe(&mut self, viewer: &str) -> Result<SubscriptionHandle, ChatError> {
        if viewer.is_empty() {
            return Err(ChatError::InvalidArgument("viewer id is empty".to_string()));
        }

        let query = Query::new(&self.collection)
            .where_eq(fields::RECIPIENT_ID, viewer)
            .where_eq(fields::READ, false);
        let batches = self.feed.subscribe(query).await.map_err(|e| {
            error!("Failed to follow unread messages for {}: {}", viewer, e);
            ChatError::ChannelUnavailable(e.to_string())
        })?;

        if let Some(previous) = self.handle() {
            self.close(previous);
        }

        let handle = self.generation.begin();
        let counts = Arc::new(watch::channel(UnreadCounts::default()).0);
        let owner = viewer.to_string();
        let pump = spawn_pump(
            batches,
            handle,
            self.generation.clone(),
            counts.clone(),
            self.updates_tx.clone(),
            move |_: &UnreadCounts, batch| UnreadCounts::from_messages(&owner, &decode_messages(batch)),
        );

        info!("Tracking unread messages for {} as subscription {}", viewer, handle);
        self.active = Some(ActiveViewer {
            handle,
            viewer: viewer.to_string(),
            counts,
            pump,
        });
        Ok(handle)
    }

    pub fn close(&mut self, handle: SubscriptionHandle) {
        if !self.generation.end(handle) {
            debug!("Unread subscription {} already closed", handle);
            return;
        }
        if let Some(active) = self.active.take() {
            active.pump.abort();
            info!("Stopped tracking unread messages for {}", active.viewer);
        }
    }

    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.active.as_ref().map(|active| active.handle)
    }

    pub fn current(&self) -> UnreadCounts {
        self.active
            .as_ref()
            .map(|active| active.counts.borrow().clone())
            .unwrap_or_default()
    }

    /// Ask the backend to mark `message_id` read. The counts are left alone
    /// until the backend confirms.
    pub async fn mark_read(&self, message_id: &str) -> Result<(), ChatError> {
        self.feed
            .update(&self.collection, message_id, json!({ "read": true }))
            .await
            .map_err(|e| {
                error!("Error marking message {} read: {}", message_id, e);
                ChatError::from(e)
            })
    }
}

impl Drop for UnreadTracker {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::channel_id;
    use crate::models::{Message, MessageType, UnreadCounts};

    fn incoming(id: &str, from: &str, to: &str, read: bool) -> Message {
        Message {
            id: id.to_string(),
            channel_id: channel_id(from, to).unwrap(),
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            content: "hey".to_string(),
            kind: MessageType::Text,
            timestamp: None,
            edited: false,
            read,
        }
    }

    #[test]
    fn test_counts_per_sender() {
        let batch = vec![
            incoming("1", "x", "me", false),
            incoming("2", "x", "me", false),
            incoming("3", "y", "me", false),
            incoming("4", "x", "me", false),
        ];
        let counts = UnreadCounts::from_messages("me", &batch);
        assert_eq!(counts, UnreadCounts::from([("x", 3), ("y", 1)]));
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_read_or_foreign_messages_are_not_counted() {
        let batch = vec![
            incoming("1", "x", "me", true),
            incoming("2", "x", "someone-else", false),
            incoming("3", "y", "me", false),
        ];
        let counts = UnreadCounts::from_messages("me", &batch);
        assert_eq!(counts, UnreadCounts::from([("y", 1)]));
        assert_eq!(counts.get("x"), 0);
    }
}
