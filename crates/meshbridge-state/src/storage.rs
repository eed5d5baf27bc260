//! SQLite-backed contact store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use meshbridge_core::node::normalize_key_prefix;
use meshbridge_core::{Contact, ContactSource, ContactStore, Location, NetworkId, NodeId};

use crate::error::{Result, StateError};

const CREATE_CONTACTS: &str = "CREATE TABLE IF NOT EXISTS contacts (
    network      TEXT    NOT NULL,
    node_id      INTEGER NOT NULL,
    display_name TEXT,
    public_key   TEXT    NOT NULL DEFAULT '',
    position     TEXT,
    first_seen   INTEGER NOT NULL,
    last_seen    INTEGER NOT NULL,
    source       TEXT    NOT NULL,
    PRIMARY KEY (network, node_id)
)";

const CREATE_KEY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_contacts_key ON contacts (network, public_key)";

const SELECT_COLUMNS: &str =
    "SELECT network, node_id, display_name, public_key, position, first_seen, last_seen, source FROM contacts";

/// Contact store persisted in SQLite
#[derive(Clone)]
pub struct SqliteContactStore {
    pool: SqlitePool,
}

impl SqliteContactStore {
    /// Connect using a sqlx URL such as `sqlite:contacts.db` or `sqlite::memory:`
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StateError::Connection(e.to_string()))?
            .create_if_missing(true);
        let in_memory = url.contains(":memory:");
        Self::connect(options, in_memory).await
    }

    /// Open (creating if needed) a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect(options, false).await
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn connect(options: SqliteConnectOptions, in_memory: bool) -> Result<Self> {
        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(in_memory, "Contact store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in [CREATE_CONTACTS, CREATE_KEY_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StateError::Migration(e.to_string()))?;
        }
        Ok(())
    }

    /// Insert or replace a contact
    pub async fn upsert(&self, contact: &Contact) -> Result<()> {
        let position = contact
            .position
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO contacts
                (network, node_id, display_name, public_key, position, first_seen, last_seen, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (network, node_id) DO UPDATE SET
                display_name = excluded.display_name,
                public_key   = excluded.public_key,
                position     = excluded.position,
                first_seen   = excluded.first_seen,
                last_seen    = excluded.last_seen,
                source       = excluded.source",
        )
        .bind(contact.network.as_str())
        .bind(i64::from(contact.node_id))
        .bind(contact.display_name.as_deref())
        .bind(contact.public_key_hex())
        .bind(position)
        .bind(contact.first_seen.timestamp_millis())
        .bind(contact.last_seen.timestamp_millis())
        .bind(contact.source.as_str())
        .execute(&self.pool)
        .await?;

        debug!(
            network = %contact.network,
            node_id = format_args!("0x{:08x}", contact.node_id),
            source = %contact.source,
            "Contact stored"
        );
        Ok(())
    }

    /// Fetch a contact by id
    pub async fn get(&self, network: NetworkId, node_id: NodeId) -> Result<Option<Contact>> {
        let sql = format!("{SELECT_COLUMNS} WHERE network = ?1 AND node_id = ?2");
        let row = sqlx::query(&sql)
            .bind(network.as_str())
            .bind(i64::from(node_id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(contact_from_row).transpose()
    }

    /// Find the best contact whose key starts with `prefix`
    ///
    /// Longer stored keys win over shorter ones, then the most recently seen.
    pub async fn find_by_prefix(&self, network: NetworkId, prefix: &str) -> Result<Option<Contact>> {
        // Only hex reaches the LIKE pattern, so no wildcard escaping is needed.
        let Ok(prefix) = normalize_key_prefix(prefix) else {
            return Ok(None);
        };
        let sql = format!(
            "{SELECT_COLUMNS} WHERE network = ?1 AND public_key LIKE ?2
             ORDER BY length(public_key) DESC, last_seen DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(network.as_str())
            .bind(format!("{prefix}%"))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(contact_from_row).transpose()
    }

    /// All contacts, most recently seen first
    pub async fn list(&self) -> Result<Vec<Contact>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY last_seen DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(contact_from_row).collect()
    }

    /// Number of contacts per provenance, for data-quality audits
    pub async fn count_by_source(&self) -> Result<HashMap<ContactSource, u64>> {
        let rows = sqlx::query("SELECT source, COUNT(*) AS n FROM contacts GROUP BY source")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let source: String = row.try_get("source")?;
            let n: i64 = row.try_get("n")?;
            let source = ContactSource::from_str(&source).map_err(|e| StateError::InvalidData {
                column: "source",
                reason: e.to_string(),
            })?;
            counts.insert(source, n.max(0) as u64);
        }
        Ok(counts)
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn contact_from_row(row: &SqliteRow) -> Result<Contact> {
    let network: String = row.try_get("network")?;
    let node_id: i64 = row.try_get("node_id")?;
    let display_name: Option<String> = row.try_get("display_name")?;
    let public_key: String = row.try_get("public_key")?;
    let position: Option<String> = row.try_get("position")?;
    let first_seen: i64 = row.try_get("first_seen")?;
    let last_seen: i64 = row.try_get("last_seen")?;
    let source: String = row.try_get("source")?;

    let invalid = |column: &'static str, reason: String| StateError::InvalidData { column, reason };

    let position = position
        .map(|json| serde_json::from_str::<Location>(&json))
        .transpose()?;

    Ok(Contact {
        network: NetworkId::from_str(&network).map_err(|e| invalid("network", e.to_string()))?,
        node_id: NodeId::try_from(node_id).map_err(|e| invalid("node_id", e.to_string()))?,
        display_name,
        public_key: hex::decode(&public_key).map_err(|e| invalid("public_key", e.to_string()))?,
        position,
        first_seen: timestamp(first_seen).ok_or_else(|| invalid("first_seen", first_seen.to_string()))?,
        last_seen: timestamp(last_seen).ok_or_else(|| invalid("last_seen", last_seen.to_string()))?,
        source: ContactSource::from_str(&source).map_err(|e| invalid("source", e.to_string()))?,
    })
}

fn timestamp(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

#[async_trait]
impl ContactStore for SqliteContactStore {
    async fn upsert_contact(&self, contact: &Contact) -> meshbridge_core::Result<()> {
        Ok(self.upsert(contact).await?)
    }

    async fn get_contact(
        &self,
        network: NetworkId,
        node_id: NodeId,
    ) -> meshbridge_core::Result<Option<Contact>> {
        Ok(self.get(network, node_id).await?)
    }

    async fn find_by_key_prefix(
        &self,
        network: NetworkId,
        prefix_hex: &str,
    ) -> meshbridge_core::Result<Option<Contact>> {
        Ok(self.find_by_prefix(network, prefix_hex).await?)
    }

    async fn list_contacts(&self) -> meshbridge_core::Result<Vec<Contact>> {
        Ok(self.list().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived(node_id: NodeId, key_hex: &str) -> Contact {
        Contact::new(NetworkId::MeshCore, node_id, ContactSource::Derived)
            .with_public_key(hex::decode(key_hex).unwrap())
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = SqliteContactStore::in_memory().await.unwrap();
        let contact = derived(0x143bcd7f, "143bcd7f1b1f").with_name("Ridge");
        store.upsert(&contact).await.unwrap();

        let loaded = store.get(NetworkId::MeshCore, 0x143bcd7f).await.unwrap().unwrap();
        assert_eq!(loaded.display_name.as_deref(), Some("Ridge"));
        assert_eq!(loaded.source, ContactSource::Derived);
        assert_eq!(loaded.public_key_hex(), "143bcd7f1b1f");
        assert_eq!(
            loaded.last_seen.timestamp_millis(),
            contact.last_seen.timestamp_millis()
        );

        assert!(store.get(NetworkId::Meshtastic, 0x143bcd7f).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = SqliteContactStore::in_memory().await.unwrap();
        store.upsert(&derived(0x143bcd7f, "143bcd7f1b1f")).await.unwrap();

        let mut synced = derived(0x143bcd7f, "143bcd7f1b1f2233");
        synced.source = ContactSource::Synced;
        store.upsert(&synced).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source, ContactSource::Synced);
    }

    #[tokio::test]
    async fn test_find_by_prefix() {
        let store = SqliteContactStore::in_memory().await.unwrap();
        store.upsert(&derived(0x143bcd7f, "143bcd7f1b1f")).await.unwrap();
        store.upsert(&derived(0x99887766, "998877665544")).await.unwrap();

        let found = store
            .find_by_prefix(NetworkId::MeshCore, "143BCD7F1B1F")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.node_id, 0x143bcd7f);

        assert!(store
            .find_by_prefix(NetworkId::MeshCore, "aaaaaaaaaaaa")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_prefix(NetworkId::MeshCore, "%")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_position_persists() {
        let store = SqliteContactStore::in_memory().await.unwrap();
        let contact = Contact::new(NetworkId::Meshtastic, 0xa1b2c3d4, ContactSource::Synced)
            .with_position(Location::new(47.6, -122.3).with_altitude(120.0));
        store.upsert(&contact).await.unwrap();

        let loaded = store.get(NetworkId::Meshtastic, 0xa1b2c3d4).await.unwrap().unwrap();
        assert_eq!(loaded.position, contact.position);
    }

    #[tokio::test]
    async fn test_count_by_source() {
        let store = SqliteContactStore::in_memory().await.unwrap();
        store.upsert(&derived(1, "000000011111")).await.unwrap();
        store.upsert(&derived(2, "000000022222")).await.unwrap();
        store
            .upsert(&Contact::new(NetworkId::MeshCore, 3, ContactSource::Synced))
            .await
            .unwrap();

        let counts = store.count_by_source().await.unwrap();
        assert_eq!(counts.get(&ContactSource::Derived), Some(&2));
        assert_eq!(counts.get(&ContactSource::Synced), Some(&1));
        assert_eq!(counts.get(&ContactSource::Advert), None);
    }

    #[tokio::test]
    async fn test_on_disk_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.db");

        {
            let store = SqliteContactStore::open(&path).await.unwrap();
            store.upsert(&derived(0x143bcd7f, "143bcd7f1b1f")).await.unwrap();
            store.close().await;
        }

        let store = SqliteContactStore::open(&path).await.unwrap();
        let found = store.get(NetworkId::MeshCore, 0x143bcd7f).await.unwrap();
        assert!(found.is_some());
    }
}
