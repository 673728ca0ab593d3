//! Recipient directory.
//!
//! Holds delivery profiles: contact details, push tokens, per-type
//! preferences, and each tourist's emergency contact list. Injected as a
//! trait so the in-memory implementation can be swapped for a real user
//! service without touching the dispatcher.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

use crate::model::{NotificationType, Recipient};

/// Lookup and mutation of recipient delivery profiles.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Fetch one recipient.
    async fn get(&self, id: &str) -> anyhow::Result<Option<Recipient>>;

    /// Insert or replace a recipient profile.
    async fn upsert(&self, recipient: Recipient) -> anyhow::Result<()>;

    /// Register a push token, creating a bare profile when the mobile
    /// client registers before any profile sync.
    async fn set_push_token(&self, id: &str, token: &str) -> anyhow::Result<()>;

    /// Replace a recipient's notification preferences.
    async fn set_preferences(
        &self,
        id: &str,
        preferences: HashMap<NotificationType, bool>,
    ) -> anyhow::Result<()>;

    /// Replace a tourist's emergency contact list.
    async fn set_emergency_contacts(
        &self,
        id: &str,
        contact_ids: Vec<String>,
    ) -> anyhow::Result<()>;

    /// Resolved profiles of a tourist's emergency contacts.
    async fn emergency_contacts(&self, id: &str) -> anyhow::Result<Vec<Recipient>>;

    /// Resolve ids to profiles. Unknown ids are skipped with a warning,
    /// not errors: dispatch to the rest must proceed.
    async fn resolve(&self, ids: &[String]) -> anyhow::Result<Vec<Recipient>>;
}

/// In-memory recipient directory.
#[derive(Default)]
pub struct InMemoryRecipientDirectory {
    recipients: RwLock<HashMap<String, Recipient>>,
    contacts: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Recipient>> {
        let recipients = self
            .recipients
            .read()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
        Ok(recipients.get(id).cloned())
    }

    async fn upsert(&self, recipient: Recipient) -> anyhow::Result<()> {
        let mut recipients = self
            .recipients
            .write()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
        recipients.insert(recipient.id.clone(), recipient);
        Ok(())
    }

    async fn set_push_token(&self, id: &str, token: &str) -> anyhow::Result<()> {
        let mut recipients = self
            .recipients
            .write()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
        recipients
            .entry(id.to_string())
            .or_insert_with(|| Recipient::new(id))
            .push_token = Some(token.to_string());
        Ok(())
    }

    async fn set_preferences(
        &self,
        id: &str,
        preferences: HashMap<NotificationType, bool>,
    ) -> anyhow::Result<()> {
        let mut recipients = self
            .recipients
            .write()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
        recipients
            .entry(id.to_string())
            .or_insert_with(|| Recipient::new(id))
            .preferences = preferences;
        Ok(())
    }

    async fn set_emergency_contacts(
        &self,
        id: &str,
        contact_ids: Vec<String>,
    ) -> anyhow::Result<()> {
        let mut contacts = self
            .contacts
            .write()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
        contacts.insert(id.to_string(), contact_ids);
        Ok(())
    }

    async fn emergency_contacts(&self, id: &str) -> anyhow::Result<Vec<Recipient>> {
        let contact_ids = {
            let contacts = self
                .contacts
                .read()
                .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
            contacts.get(id).cloned().unwrap_or_default()
        };
        self.resolve(&contact_ids).await
    }

    async fn resolve(&self, ids: &[String]) -> anyhow::Result<Vec<Recipient>> {
        let recipients = self
            .recipients
            .read()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;

        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            match recipients.get(id) {
                Some(recipient) => resolved.push(recipient.clone()),
                None => warn!(user_id = %id, "unknown recipient id, skipping"),
            }
        }
        Ok(resolved)
    }
}
