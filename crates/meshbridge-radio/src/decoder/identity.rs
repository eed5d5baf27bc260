//! Sender identity resolution
//!
//! Radios do not always say who sent a packet. MeshCore message receipts
//! carry only a 6-byte public key prefix, and the sender may be missing
//! from the companion's contact list. [`IdentityResolver::resolve`] turns
//! whatever the decoder found into a node id:
//!
//! 1. a direct sender id field
//! 2. the key prefix, looked up in the fast table and then the contact store
//! 3. a node id derived from the first 4 key bytes
//! 4. located and derived contacts are written back to the store and the
//!    fast table, so outbound replies find the key without deriving again
//! 5. otherwise [`UNKNOWN_NODE_ID`]
//!
//! Resolution never fails; store errors are logged and the cascade moves on.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use meshbridge_core::node::{self, derive_node_id, format_node_id, lookup_key, normalize_key_prefix};
use meshbridge_core::{
    Contact, ContactSource, ContactStore, NetworkId, NodeId, ResolutionOutcome, UNKNOWN_NODE_ID,
};

/// Result of one resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Resolved node id, or `UNKNOWN_NODE_ID`
    pub node_id: NodeId,
    /// Which step produced it
    pub outcome: ResolutionOutcome,
    /// Contact entry after the sighting, when one exists
    pub contact: Option<Contact>,
}

impl Resolution {
    fn unresolved() -> Self {
        Self {
            node_id: UNKNOWN_NODE_ID,
            outcome: ResolutionOutcome::Unresolved,
            contact: None,
        }
    }
}

/// Resolution counters by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub direct: u64,
    pub contact_cache: u64,
    pub derived: u64,
    pub unresolved: u64,
    pub store_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    direct: AtomicU64,
    contact_cache: AtomicU64,
    derived: AtomicU64,
    unresolved: AtomicU64,
    store_errors: AtomicU64,
}

/// Resolves senders and owns the contact cache
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    /// (network, first 12 hex chars of key) -> node id
    fast: RwLock<HashMap<(NetworkId, String), NodeId>>,
    /// In-memory mirror of every contact seen this run
    contacts: RwLock<HashMap<(NetworkId, NodeId), Contact>>,
    /// Serializes read-merge-write against the store
    writer: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl IdentityResolver {
    /// Create a resolver backed by a contact store
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            fast: RwLock::new(HashMap::new()),
            contacts: RwLock::new(HashMap::new()),
            writer: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Load persisted contacts into the fast table
    pub async fn warm(&self) -> usize {
        match self.store.list_contacts().await {
            Ok(all) => {
                let count = all.len();
                for contact in all {
                    self.cache(contact);
                }
                info!(contacts = count, "Loaded contact cache");
                count
            }
            Err(e) => {
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to load contacts, starting empty");
                0
            }
        }
    }

    /// Run the cascade for one sender
    pub async fn resolve(
        &self,
        network: NetworkId,
        direct: Option<NodeId>,
        key_prefix: Option<&str>,
    ) -> Resolution {
        let resolution = self.run_cascade(network, direct, key_prefix).await;
        let counter = match resolution.outcome {
            ResolutionOutcome::Direct => &self.counters.direct,
            ResolutionOutcome::ContactCache => &self.counters.contact_cache,
            ResolutionOutcome::Derived => &self.counters.derived,
            ResolutionOutcome::Unresolved => &self.counters.unresolved,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(
            network = %network,
            node = %format_node_id(resolution.node_id),
            outcome = %resolution.outcome,
            prefix = key_prefix.unwrap_or(""),
            "Sender resolved"
        );
        resolution
    }

    async fn run_cascade(
        &self,
        network: NetworkId,
        direct: Option<NodeId>,
        key_prefix: Option<&str>,
    ) -> Resolution {
        // 1. direct field
        if let Some(id) = direct.filter(|id| !node::is_unknown(*id)) {
            let contact = self.touch(network, id).await;
            return Resolution {
                node_id: id,
                outcome: ResolutionOutcome::Direct,
                contact,
            };
        }

        let Some(prefix) = key_prefix.and_then(|p| normalize_key_prefix(p).ok()) else {
            return Resolution::unresolved();
        };

        // 2. key prefix lookup
        if let Some(found) = self.lookup_prefix(network, &prefix).await {
            let mut sighting = found.clone();
            sighting.last_seen = chrono::Utc::now();
            let contact = self.sync(sighting).await;
            return Resolution {
                node_id: contact.node_id,
                outcome: ResolutionOutcome::ContactCache,
                contact: Some(contact),
            };
        }

        // 3. derivation
        if network.derives_node_id_from_key() {
            if let Some(id) = derive_node_id(&prefix) {
                let derived = Contact::new(network, id, ContactSource::Derived)
                    .with_public_key(prefix_bytes(&prefix));
                // 4. write back
                let contact = self.sync(derived).await;
                info!(
                    network = %network,
                    node = %format_node_id(id),
                    prefix = %prefix,
                    "Derived node id from key prefix"
                );
                return Resolution {
                    node_id: id,
                    outcome: ResolutionOutcome::Derived,
                    contact: Some(contact),
                };
            }
        }

        // 5. give up
        Resolution::unresolved()
    }

    async fn lookup_prefix(&self, network: NetworkId, prefix: &str) -> Option<Contact> {
        if let Some(key) = lookup_key(prefix) {
            let id = self.fast.read().get(&(network, key.to_string())).copied();
            if let Some(id) = id {
                let hit = self.contacts.read().get(&(network, id)).cloned();
                if hit.is_some() {
                    return hit;
                }
            }
        }
        if prefix.len() < node::LOOKUP_PREFIX_HEX_LEN {
            return None;
        }
        match self.store.find_by_key_prefix(network, prefix).await {
            Ok(found) => found,
            Err(e) => {
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(network = %network, error = %e, "Contact lookup failed");
                None
            }
        }
    }

    /// Record a sighting of a node already identified by id
    async fn touch(&self, network: NetworkId, id: NodeId) -> Option<Contact> {
        let known = self.contacts.read().get(&(network, id)).cloned();
        let mut sighting = known?;
        sighting.last_seen = chrono::Utc::now();
        Some(self.sync(sighting).await)
    }

    /// Merge a contact learned from a full sync or an advert
    pub async fn learn(&self, contact: Contact) -> Contact {
        self.sync(contact).await
    }

    /// Contact for outbound addressing
    pub async fn contact_for(&self, network: NetworkId, node_id: NodeId) -> Option<Contact> {
        let cached = self.contacts.read().get(&(network, node_id)).cloned();
        if cached.is_some() {
            return cached;
        }
        match self.store.get_contact(network, node_id).await {
            Ok(Some(contact)) => {
                self.cache(contact.clone());
                Some(contact)
            }
            Ok(None) => None,
            Err(e) => {
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(network = %network, error = %e, "Contact lookup failed");
                None
            }
        }
    }

    /// Number of contacts in the fast table
    pub fn cached_contacts(&self) -> usize {
        self.contacts.read().len()
    }

    /// Snapshot of resolution counters
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            direct: self.counters.direct.load(Ordering::Relaxed),
            contact_cache: self.counters.contact_cache.load(Ordering::Relaxed),
            derived: self.counters.derived.load(Ordering::Relaxed),
            unresolved: self.counters.unresolved.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
        }
    }

    /// Read-merge-write under the single writer lock
    async fn sync(&self, incoming: Contact) -> Contact {
        let _writer = self.writer.lock().await;
        let key = (incoming.network, incoming.node_id);

        let cached = self.contacts.read().get(&key).cloned();
        let existing = match cached {
            Some(c) => Some(c),
            None => match self.store.get_contact(key.0, key.1).await {
                Ok(found) => found,
                Err(e) => {
                    self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(network = %key.0, error = %e, "Contact read failed");
                    None
                }
            },
        };

        let merged = match existing {
            Some(mut current) => {
                current.merge(&incoming);
                current
            }
            None => incoming,
        };

        if let Err(e) = self.store.upsert_contact(&merged).await {
            self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!(network = %merged.network, error = %e, "Contact write failed");
        }
        self.cache(merged.clone());
        merged
    }

    fn cache(&self, contact: Contact) {
        if let Some(prefix) = contact.lookup_prefix() {
            self.fast
                .write()
                .insert((contact.network, prefix), contact.node_id);
        }
        self.contacts
            .write()
            .insert((contact.network, contact.node_id), contact);
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("contacts", &self.contacts.read().len())
            .field("fast", &self.fast.read().len())
            .finish()
    }
}

/// Key bytes from a hex prefix (a trailing odd nibble is dropped)
fn prefix_bytes(prefix: &str) -> Vec<u8> {
    let even = &prefix[..prefix.len() - prefix.len() % 2];
    hex::decode(even).unwrap_or_default()
}
