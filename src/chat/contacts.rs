// Contact list with client-side search

use log::{error, info};
use std::sync::Arc;

use super::decode_contacts;
use crate::backend::{DocumentFeed, Query};
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::Contact;

pub struct ContactIndex {
    feed: Arc<dyn DocumentFeed>,
    collection: String,
    snapshot: Arc<Vec<Contact>>,
}

impl ContactIndex {
    pub fn new(feed: Arc<dyn DocumentFeed>, config: &ClientConfig) -> Self {
        Self {
            feed,
            collection: config.users_collection.clone(),
            snapshot: Arc::new(Vec::new()),
        }
    }

    /// Replace the snapshot with the backend's current user list. On failure
    /// the previous snapshot stays in place.
    pub async fn refresh(&mut self) -> Result<(), ChatError> {
        let documents = self
            .feed
            .fetch(Query::new(&self.collection))
            .await
            .map_err(|e| {
                error!("Error fetching users: {}", e);
                ChatError::from(e)
            })?;

        let contacts = decode_contacts(documents);
        info!("Loaded {} contacts", contacts.len());
        self.snapshot = Arc::new(contacts);
        Ok(())
    }

    /// Contacts whose username contains `term` (ignoring case) or whose phone
    /// contains it verbatim, in snapshot order. An empty term matches all.
    pub fn search(&self, term: &str) -> Vec<&Contact> {
        self.snapshot.iter().filter(|contact| contact.matches(term)).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.snapshot.iter().find(|contact| contact.id == id)
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.snapshot
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}
