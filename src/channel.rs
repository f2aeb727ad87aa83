// src/channel.rs
//! Conversation identity
//!
//! A channel is the conversation between exactly two participants. Its key is
//! the lexicographically smaller participant id, `_`, then the larger one, so
//! both sides derive the same key without coordinating.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChatError;

/// Joins the two participant ids. Participant ids may not contain it.
pub const SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

fn check_participant(id: &str) -> Result<(), ChatError> {
    if id.is_empty() {
        return Err(ChatError::InvalidArgument("participant id is empty".to_string()));
    }
    if id.contains(SEPARATOR) {
        return Err(ChatError::InvalidArgument(format!(
            "participant id '{}' contains '{}'",
            id, SEPARATOR
        )));
    }
    Ok(())
}

/// Derive the channel key for the pair {a, b}
pub fn channel_id(a: &str, b: &str) -> Result<ChannelId, ChatError> {
    check_participant(a)?;
    check_participant(b)?;
    if a == b {
        return Err(ChatError::InvalidArgument(format!(
            "cannot open a conversation between '{}' and itself",
            a
        )));
    }

    let (low, high) = if a < b { (a, b) } else { (b, a) };
    Ok(ChannelId(format!("{}{}{}", low, SEPARATOR, high)))
}

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participants, smaller first
    pub fn participants(&self) -> Result<(&str, &str), ChatError> {
        match self.0.split_once(SEPARATOR) {
            Some((low, high)) if !low.is_empty() && !high.is_empty() && !high.contains(SEPARATOR) => {
                Ok((low, high))
            }
            _ => Err(ChatError::InvalidArgument(format!("malformed channel id '{}'", self.0))),
        }
    }

    pub fn contains(&self, participant: &str) -> bool {
        matches!(self.participants(), Ok((low, high)) if low == participant || high == participant)
    }

    /// The participant on the other side from `me`
    pub fn counterpart(&self, me: &str) -> Result<&str, ChatError> {
        let (low, high) = self.participants()?;
        if me == low {
            Ok(high)
        } else if me == high {
            Ok(low)
        } else {
            Err(ChatError::InvalidArgument(format!(
                "'{}' is not a participant of channel '{}'",
                me, self.0
            )))
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
