use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::channel::ChannelId;

/// Opaque user identifier handed out by the identity provider
pub type Participant = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
}

impl MessageType {
    /// Image and video messages carry a media URI instead of text
    pub fn is_media(&self) -> bool {
        !matches!(self, MessageType::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Backend document id; not part of the stored fields
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "chatId")]
    pub channel_id: ChannelId,
    pub sender_id: Participant,
    pub recipient_id: Participant,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// None until the backend has acknowledged the write
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.timestamp.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(skip)]
    pub id: Participant,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Contact {
    /// Case-insensitive username match or literal phone match
    pub fn matches(&self, term: &str) -> bool {
        if term.is_empty() {
            return true;
        }
        self.username.to_lowercase().contains(&term.to_lowercase())
            || self.phone.as_deref().map_or(false, |phone| phone.contains(term))
    }
}

/// Profile document stored under `users/<uid>` at registration.
/// Credentials stay with the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    pub username: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

/// Unread message counts per sender. Senders with nothing unread are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounts(BTreeMap<Participant, usize>);

impl UnreadCounts {
    /// Count the messages addressed to `viewer` that are still unread
    pub fn from_messages<'a>(viewer: &str, messages: impl IntoIterator<Item = &'a Message>) -> Self {
        let mut counts = BTreeMap::new();
        for message in messages {
            if message.recipient_id == viewer && !message.read {
                *counts.entry(message.sender_id.clone()).or_insert(0) += 1;
            }
        }
        UnreadCounts(counts)
    }

    pub fn get(&self, sender: &str) -> usize {
        self.0.get(sender).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Participant, &usize)> {
        self.0.iter()
    }
}

impl<const N: usize> From<[(&str, usize); N]> for UnreadCounts {
    fn from(entries: [(&str, usize); N]) -> Self {
        UnreadCounts(
            entries
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(sender, count)| (sender.to_string(), count))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedIn(Participant),
    SignedOut,
}
