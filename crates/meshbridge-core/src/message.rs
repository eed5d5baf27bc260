//! Outbound reply requests and their results

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::NetworkId;
use crate::node::{format_node_id, NodeId, BROADCAST_NODE_ID};

/// A reply or announcement handed to the core by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Node the reply is for (`BROADCAST_NODE_ID` for channel messages)
    pub target_from_id: NodeId,
    /// Network hint from the caller; the sender route record wins for direct replies
    pub network_id: Option<NetworkId>,
    /// Message text
    pub text: String,
    /// Channel index; direct replies reuse the channel the request came in on
    pub channel: u8,
    /// Key prefix hint for key-addressed networks
    pub pubkey_prefix: Option<String>,
}

impl OutboundMessage {
    /// Direct reply to a node on whatever network it last used
    pub fn reply_to(target_from_id: NodeId, text: impl Into<String>) -> Self {
        Self {
            target_from_id,
            network_id: None,
            text: text.into(),
            channel: 0,
            pubkey_prefix: None,
        }
    }

    /// Channel broadcast on a specific network
    pub fn broadcast(network: NetworkId, channel: u8, text: impl Into<String>) -> Self {
        Self {
            target_from_id: BROADCAST_NODE_ID,
            network_id: Some(network),
            text: text.into(),
            channel,
            pubkey_prefix: None,
        }
    }

    /// Attach a network hint
    pub fn on_network(mut self, network: NetworkId) -> Self {
        self.network_id = Some(network);
        self
    }

    /// Send on a channel other than the default
    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Attach a key prefix hint
    pub fn with_pubkey_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.pubkey_prefix = Some(prefix.into());
        self
    }

    /// Whether this goes to a channel rather than one node
    pub fn is_broadcast(&self) -> bool {
        self.target_from_id == BROADCAST_NODE_ID
    }
}

/// Why a reply could not be handed to a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// No inbound message has been routed from this node yet
    #[error("no route recorded for {}", format_node_id(*.0))]
    NoRoute(NodeId),

    /// Replies cannot be addressed to the unknown sentinel
    #[error("sender identity unresolved")]
    UnresolvedSender,

    /// The target network has no open handle
    #[error("network {0} is not available")]
    NetworkUnavailable(NetworkId),

    /// Key-addressed network but no key prefix is known for the node
    #[error("no public key known for {}", format_node_id(*.0))]
    MissingPublicKey(NodeId),

    /// Broadcast without a network
    #[error("broadcast requires a network")]
    MissingNetwork,

    /// The transport rejected the write
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result of handing a reply to the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport; radio delivery is best-effort
    Sent {
        /// Network the frame left on
        network: NetworkId,
        /// Destination
        to_id: NodeId,
    },
    /// Not sent
    Failed(SendFailure),
}

impl SendOutcome {
    /// Whether the frame reached a transport
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }

    /// Network used, when sent
    pub fn network(&self) -> Option<NetworkId> {
        match self {
            SendOutcome::Sent { network, .. } => Some(*network),
            SendOutcome::Failed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_defaults() {
        let msg = OutboundMessage::reply_to(0x143bcd7f, "pong");
        assert!(!msg.is_broadcast());
        assert!(msg.network_id.is_none());
    }

    #[test]
    fn test_broadcast_constructor() {
        let msg = OutboundMessage::broadcast(NetworkId::MeshCore, 1, "net check");
        assert!(msg.is_broadcast());
        assert_eq!(msg.network_id, Some(NetworkId::MeshCore));
        assert_eq!(msg.channel, 1);
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            SendFailure::NoRoute(0x143bcd7f).to_string(),
            "no route recorded for !143bcd7f"
        );
        let outcome = SendOutcome::Failed(SendFailure::MissingNetwork);
        assert!(!outcome.is_sent());
        assert!(outcome.network().is_none());
    }
}
