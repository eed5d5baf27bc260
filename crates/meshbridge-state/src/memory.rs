//! In-memory contact store, used when no database is configured

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use meshbridge_core::node::normalize_key_prefix;
use meshbridge_core::{Contact, ContactStore, NetworkId, NodeId};

/// Contact store that lives for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryContactStore {
    contacts: RwLock<HashMap<(NetworkId, NodeId), Contact>>,
}

impl MemoryContactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored contacts
    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.contacts.read().is_empty()
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn upsert_contact(&self, contact: &Contact) -> meshbridge_core::Result<()> {
        self.contacts
            .write()
            .insert((contact.network, contact.node_id), contact.clone());
        Ok(())
    }

    async fn get_contact(
        &self,
        network: NetworkId,
        node_id: NodeId,
    ) -> meshbridge_core::Result<Option<Contact>> {
        Ok(self.contacts.read().get(&(network, node_id)).cloned())
    }

    async fn find_by_key_prefix(
        &self,
        network: NetworkId,
        prefix_hex: &str,
    ) -> meshbridge_core::Result<Option<Contact>> {
        let Ok(prefix) = normalize_key_prefix(prefix_hex) else {
            return Ok(None);
        };
        let contacts = self.contacts.read();
        let best = contacts
            .values()
            .filter(|c| c.network == network && c.public_key_hex().starts_with(&prefix))
            .max_by_key(|c| (c.public_key.len(), c.last_seen));
        Ok(best.cloned())
    }

    async fn list_contacts(&self) -> meshbridge_core::Result<Vec<Contact>> {
        let mut all: Vec<Contact> = self.contacts.read().values().cloned().collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbridge_core::ContactSource;

    #[tokio::test]
    async fn test_prefix_prefers_longest_key() {
        let store = MemoryContactStore::new();
        let short = Contact::new(NetworkId::MeshCore, 0x143bcd7f, ContactSource::Derived)
            .with_public_key(hex::decode("143bcd7f1b1f").unwrap());
        let long = Contact::new(NetworkId::MeshCore, 0x143bcd7e, ContactSource::Synced)
            .with_public_key(hex::decode("143bcd7f1b1f00112233").unwrap());
        store.upsert_contact(&short).await.unwrap();
        store.upsert_contact(&long).await.unwrap();

        let found = store
            .find_by_key_prefix(NetworkId::MeshCore, "143bcd7f1b1f")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.node_id, 0x143bcd7e);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_networks_are_separate() {
        let store = MemoryContactStore::new();
        let contact = Contact::new(NetworkId::Meshtastic, 42, ContactSource::Synced);
        store.upsert_contact(&contact).await.unwrap();

        assert!(store.get_contact(NetworkId::MeshCore, 42).await.unwrap().is_none());
        assert!(store.get_contact(NetworkId::Meshtastic, 42).await.unwrap().is_some());
    }
}
