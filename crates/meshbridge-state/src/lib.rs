//! meshbridge state - contact persistence
//!
//! ## Components
//!
//! - **storage**: SQLite-backed [`SqliteContactStore`] using sqlx
//! - **memory**: [`MemoryContactStore`] for runs without a database
//! - **error**: storage error types
//!
//! Both stores implement [`meshbridge_core::ContactStore`].
//!
//! ## Example
//!
//! ```ignore
//! use meshbridge_state::SqliteContactStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteContactStore::new("sqlite:contacts.db").await?;
//!     for contact in store.list().await? {
//!         println!("{:08x} {:?}", contact.node_id, contact.display_name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod storage;

pub use error::{Result, StateError};
pub use memory::MemoryContactStore;
pub use storage::SqliteContactStore;
