// Live view of one conversation
//
// The backend pushes the full set of messages for the channel on every
// change. Each batch is sorted, de-duplicated and swapped in as the new view
// in one step; subscribers receive the whole view, never a patch.

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::subscription::{spawn_pump, Generation, SubscriptionHandle, Update, Updates};
use super::{decode_messages, fields};
use crate::backend::{server_timestamp, DocumentFeed, IdentityProvider, Query};
use crate::channel::ChannelId;
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::{Message, MessageType, Participant};

/// An ordered, de-duplicated snapshot of a conversation
pub type MessageView = Arc<Vec<Message>>;

pub type MessageSetUpdate = Update<MessageView>;

/// Build the next view from the previous one and a fresh full snapshot.
///
/// Timestamped messages come first, ascending. Messages still waiting for a
/// server timestamp follow in the order they were first received: those
/// already pending in `previous` keep their relative order, new ones are
/// appended in batch order. If an id occurs more than once in the batch the
/// last occurrence wins.
pub fn reconcile(previous: &[Message], batch: Vec<Message>) -> Vec<Message> {
    let mut last_index: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    for (index, message) in batch.iter().enumerate() {
        last_index.insert(message.id.clone(), index);
    }
    let latest: Vec<Message> = batch
        .into_iter()
        .enumerate()
        .filter(|(index, message)| last_index.get(&message.id) == Some(index))
        .map(|(_, message)| message)
        .collect();

    let pending_rank: HashMap<&str, usize> = previous
        .iter()
        .filter(|message| message.is_pending())
        .enumerate()
        .map(|(rank, message)| (message.id.as_str(), rank))
        .collect();

    let (mut ordered, mut pending): (Vec<Message>, Vec<Message>) =
        latest.into_iter().partition(|message| !message.is_pending());

    // Both sorts are stable, so ties keep batch order
    ordered.sort_by_key(|message| message.timestamp);
    pending.sort_by_key(|message| {
        pending_rank
            .get(message.id.as_str())
            .copied()
            .unwrap_or(usize::MAX)
    });

    ordered.extend(pending);
    ordered
}

struct ActiveChannel {
    handle: SubscriptionHandle,
    channel: ChannelId,
    view: Arc<watch::Sender<MessageView>>,
    pump: JoinHandle<()>,
}

pub struct MessageStream {
    feed: Arc<dyn DocumentFeed>,
    identity: Arc<dyn IdentityProvider>,
    collection: String,
    generation: Generation,
    updates_tx: mpsc::Sender<MessageSetUpdate>,
    active: Option<ActiveChannel>,
}

impl MessageStream {
    pub fn new(
        feed: Arc<dyn DocumentFeed>,
        identity: Arc<dyn IdentityProvider>,
        config: &ClientConfig,
    ) -> (Self, Updates<MessageView>) {
        let generation = Generation::new();
        let (updates_tx, updates) = Updates::channel(config.update_buffer, generation.clone());

        (
            Self {
                feed,
                identity,
                collection: config.messages_collection.clone(),
                generation,
                updates_tx,
                active: None,
            },
            updates,
        )
    }

    /// Start following `channel`, replacing any previous subscription once
    /// the new feed is established. If the feed cannot be opened the
    /// previous channel stays live.
    pub async fn open(&mut self, channel: &ChannelId) -> Result<SubscriptionHandle, ChatError> {
        let query = Query::new(&self.collection)
            .where_eq(fields::CHAT_ID, channel.as_str())
            .order_by(fields::TIMESTAMP);
        let batches = self.feed.subscribe(query).await.map_err(|e| {
            error!("Failed to open live feed for channel {}: {}", channel, e);
            ChatError::ChannelUnavailable(e.to_string())
        })?;

        if let Some(previous) = self.handle() {
            self.close(previous);
        }

        let handle = self.generation.begin();
        let view = Arc::new(watch::channel(MessageView::default()).0);
        let pump = spawn_pump(
            batches,
            handle,
            self.generation.clone(),
            view.clone(),
            self.updates_tx.clone(),
            |previous: &MessageView, batch| Arc::new(reconcile(previous, decode_messages(batch))),
        );

        info!("Opened channel {} as subscription {}", channel, handle);
        self.active = Some(ActiveChannel {
            handle,
            channel: channel.clone(),
            view,
            pump,
        });
        Ok(handle)
    }

    /// Stop delivery for `handle`. Closing twice, or closing a handle that
    /// was already replaced, does nothing.
    pub fn close(&mut self, handle: SubscriptionHandle) {
        if !self.generation.end(handle) {
            debug!("Subscription {} already closed", handle);
            return;
        }
        if let Some(active) = self.active.take() {
            active.pump.abort();
            info!("Closed channel {} (subscription {})", active.channel, active.handle);
        }
    }

    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.active.as_ref().map(|active| active.handle)
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        self.active.as_ref().map(|active| &active.channel)
    }

    /// The latest view, empty when no channel is open
    pub fn current(&self) -> MessageView {
        self.active
            .as_ref()
            .map(|active| active.view.borrow().clone())
            .unwrap_or_default()
    }

    fn signed_in_user(&self) -> Result<Participant, ChatError> {
        self.identity.current_user().ok_or_else(|| {
            error!("User is not authenticated");
            ChatError::Validation("You must be signed in to chat.".to_string())
        })
    }

    fn find(&self, message_id: &str) -> Result<Message, ChatError> {
        self.current()
            .iter()
            .find(|message| message.id == message_id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))
    }

    /// Ask the backend to store a new message. The local view is not touched;
    /// the message shows up when the backend's next batch includes it.
    pub async fn send(&self, channel: &ChannelId, content: &str, kind: MessageType) -> Result<Message, ChatError> {
        if kind == MessageType::Text && content.trim().is_empty() {
            return Err(ChatError::Validation("Message cannot be empty.".to_string()));
        }
        let me = self.signed_in_user()?;
        let recipient = channel.counterpart(&me)?.to_string();

        let mut message = Message {
            id: String::new(),
            channel_id: channel.clone(),
            sender_id: me,
            recipient_id: recipient,
            content: content.to_string(),
            kind,
            timestamp: None,
            edited: false,
            read: false,
        };
        let mut document = serde_json::to_value(&message).map_err(|e| ChatError::Backend(e.to_string()))?;
        if let Some(object) = document.as_object_mut() {
            object.insert(fields::TIMESTAMP.to_string(), server_timestamp());
        }

        message.id = self.feed.create(&self.collection, document).await.map_err(|e| {
            error!("Error sending message: {}", e);
            ChatError::from(e)
        })?;
        debug!("Sent {:?} message {} on {}", kind, message.id, channel);
        Ok(message)
    }

    /// Replace the content of one of our own messages
    pub async fn edit(&self, message_id: &str, new_content: &str) -> Result<(), ChatError> {
        let message = self.find(message_id)?;
        let me = self.signed_in_user()?;
        if message.sender_id != me {
            return Err(ChatError::Forbidden("only the sender can edit a message".to_string()));
        }
        if message.kind == MessageType::Text && new_content.trim().is_empty() {
            return Err(ChatError::Validation("Message cannot be empty.".to_string()));
        }

        let changes = json!({ "content": new_content, "edited": true });
        self.feed
            .update(&self.collection, message_id, changes)
            .await
            .map_err(|e| {
                error!("Error editing message {}: {}", message_id, e);
                ChatError::from(e)
            })
    }

    /// Remove a message for both participants
    pub async fn delete(&self, message_id: &str) -> Result<(), ChatError> {
        self.find(message_id)?;
        self.feed
            .delete(&self.collection, message_id)
            .await
            .map_err(|e| {
                error!("Error deleting message {}: {}", message_id, e);
                ChatError::from(e)
            })
    }

    /// Mark every unread message addressed to us in the current view as read.
    /// Returns how many were marked.
    pub async fn mark_read(&self) -> Result<usize, ChatError> {
        let me = self.signed_in_user()?;
        let unread: Vec<String> = self
            .current()
            .iter()
            .filter(|message| message.recipient_id == me && !message.read)
            .map(|message| message.id.clone())
            .collect();

        for id in &unread {
            let changes: Value = json!({ "read": true });
            if let Err(e) = self.feed.update(&self.collection, id, changes).await {
                warn!("Could not mark message {} as read: {}", id, e);
                return Err(e.into());
            }
        }
        Ok(unread.len())
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.pump.abort();
        }
    }
}
