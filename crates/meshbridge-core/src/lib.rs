//! meshbridge core - shared types and traits for the two-network radio bridge
//!
//! This crate holds the network-agnostic model every other crate speaks:
//! decoded packets, contacts, node identifiers and reply requests, plus the
//! two seams the bridge is wired through.
//!
//! # Modules
//!
//! - [`network`] - Logical network identifiers
//! - [`node`] - Node ids, sentinels and key-prefix derivation
//! - [`packet`] - Normalized packet model
//! - [`contact`] - Known remote nodes
//! - [`location`] - Geographic positions
//! - [`message`] - Outbound reply requests and results
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust
//! use meshbridge_core::node::derive_node_id;
//!
//! assert_eq!(derive_node_id("143bcd7f1b1f"), Some(0x143bcd7f));
//! ```

pub mod contact;
pub mod error;
pub mod location;
pub mod message;
pub mod network;
pub mod node;
pub mod packet;

pub use contact::{Contact, ContactSource};
pub use error::{CoreError, Result};
pub use location::Location;
pub use message::{OutboundMessage, SendFailure, SendOutcome};
pub use network::NetworkId;
pub use node::{NodeId, BROADCAST_NODE_ID, UNKNOWN_NODE_ID};
pub use packet::{
    MessageShape, Packet, Payload, PayloadKind, ReceivedAt, ResolutionOutcome, RfMetrics,
};

use async_trait::async_trait;

/// Durable contact cache
///
/// Implementations only ever insert or update; contacts are never deleted by
/// the bridge.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Insert or replace a contact keyed by `(network, node_id)`
    async fn upsert_contact(&self, contact: &Contact) -> Result<()>;

    /// Fetch a contact by id
    async fn get_contact(&self, network: NetworkId, node_id: NodeId) -> Result<Option<Contact>>;

    /// Find the contact whose public key starts with `prefix_hex`
    async fn find_by_key_prefix(
        &self,
        network: NetworkId,
        prefix_hex: &str,
    ) -> Result<Option<Contact>>;

    /// List every stored contact
    async fn list_contacts(&self) -> Result<Vec<Contact>>;
}

/// What a command handler gets to see
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// The decoded packet
    pub packet: Packet,
    /// Its dispatch shape
    pub shape: MessageShape,
    /// Resolved contact, when the cache knows the sender
    pub contact: Option<Contact>,
}

impl DispatchContext {
    /// Message text (present for direct and broadcast shapes)
    pub fn text(&self) -> &str {
        self.packet.text_body().unwrap_or_default()
    }

    /// Sender id
    pub fn from_id(&self) -> NodeId {
        self.packet.from_id
    }

    /// Network the packet arrived on
    pub fn network(&self) -> NetworkId {
        self.packet.network
    }
}

/// Collaborator that turns inbound messages into optional reply text
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Handle a message addressed to one of our nodes
    async fn on_direct_message(&self, ctx: &DispatchContext) -> Option<String>;

    /// Handle a channel message
    async fn on_broadcast_message(&self, ctx: &DispatchContext) -> Option<String>;

    /// Observe a non-text packet addressed to us; never replied to
    async fn on_unknown_payload(&self, _ctx: &DispatchContext) {}
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'), "VERSION should be semver format");
    }

    #[test]
    fn test_dispatch_context_accessors() {
        let packet = Packet::text(NetworkId::MeshCore, "ping").with_from(0x143bcd7f);
        let ctx = DispatchContext {
            shape: packet.shape(),
            packet,
            contact: None,
        };
        assert_eq!(ctx.text(), "ping");
        assert_eq!(ctx.from_id(), 0x143bcd7f);
        assert_eq!(ctx.network(), NetworkId::MeshCore);
    }
}
