//! Per-network session directives
//!
//! The frames a connection manager writes on its own behalf: the handshake
//! after every (re)connect, keepalives, message-queue sync, outbound text,
//! and the vendor reboot directive used for remote recovery.

use meshbridge_core::{NetworkId, NodeId, BROADCAST_NODE_ID};

use crate::decoder::{meshcore, meshtastic};
use crate::error::{BridgeError, Result};
use crate::router::Destination;

/// App name announced to MeshCore companion radios
pub const APP_NAME: &str = "meshbridge";

/// Delay requested in the Meshtastic admin reboot message
pub const REBOOT_DELAY_SECS: i32 = 2;

/// Frames written after the link comes up
pub fn handshake(network: NetworkId) -> Vec<Vec<u8>> {
    match network {
        NetworkId::Meshtastic => vec![meshtastic::want_config(rand::random())],
        NetworkId::MeshCore => vec![
            meshcore::app_start(APP_NAME),
            meshcore::get_contacts(),
            meshcore::sync_next_message(),
        ],
    }
}

/// Keepalive for networks whose radios drop idle clients
pub fn keepalive(network: NetworkId) -> Option<Vec<u8>> {
    match network {
        NetworkId::Meshtastic => Some(meshtastic::heartbeat(rand::random())),
        NetworkId::MeshCore => None,
    }
}

/// Request the next queued message (MeshCore only)
pub fn sync_next(network: NetworkId) -> Option<Vec<u8>> {
    (network == NetworkId::MeshCore).then(meshcore::sync_next_message)
}

/// Outbound text frame
pub fn text_frame(network: NetworkId, destination: &Destination, text: &str) -> Result<Vec<u8>> {
    match (network, destination) {
        (NetworkId::Meshtastic, Destination::Channel(ch)) => {
            Ok(meshtastic::text_packet(BROADCAST_NODE_ID, *ch, text))
        }
        (NetworkId::Meshtastic, Destination::Node { node_id, channel, .. }) => {
            Ok(meshtastic::text_packet(*node_id, *channel, text))
        }
        (NetworkId::MeshCore, Destination::Channel(ch)) => {
            Ok(meshcore::send_channel_text(*ch, text))
        }
        (NetworkId::MeshCore, Destination::Node { pubkey_prefix, node_id, .. }) => {
            let prefix = pubkey_prefix.as_deref().ok_or_else(|| {
                BridgeError::Send(meshbridge_core::SendFailure::MissingPublicKey(*node_id))
            })?;
            meshcore::send_text(prefix, text)
        }
    }
}

/// Reboot directive for a radio reached over a fresh connection.
///
/// Meshtastic addresses the admin request to the radio's own node number, so
/// the local id must be known.
pub fn reboot_directive(network: NetworkId, local_node: Option<NodeId>) -> Result<Vec<u8>> {
    match network {
        NetworkId::Meshtastic => {
            let node = local_node.ok_or_else(|| {
                BridgeError::RecoveryUnavailable("local node number not yet known".into())
            })?;
            Ok(meshtastic::reboot(node, REBOOT_DELAY_SECS))
        }
        NetworkId::MeshCore => Ok(meshcore::reboot()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_per_network() {
        let mc = handshake(NetworkId::MeshCore);
        assert_eq!(mc.len(), 3);
        assert_eq!(mc[0][0], meshcore::CMD_APP_START);
        assert_eq!(mc[1], vec![meshcore::CMD_GET_CONTACTS]);
        assert_eq!(handshake(NetworkId::Meshtastic).len(), 1);
    }

    #[test]
    fn test_keepalive_only_meshtastic() {
        assert!(keepalive(NetworkId::Meshtastic).is_some());
        assert!(keepalive(NetworkId::MeshCore).is_none());
        assert!(sync_next(NetworkId::Meshtastic).is_none());
    }

    #[test]
    fn test_meshcore_direct_needs_prefix() {
        let dest = Destination::Node {
            node_id: 5,
            pubkey_prefix: None,
            channel: 0,
        };
        assert!(text_frame(NetworkId::MeshCore, &dest, "hi").is_err());
        assert!(text_frame(NetworkId::Meshtastic, &dest, "hi").is_ok());
    }

    #[test]
    fn test_meshtastic_direct_uses_channel() {
        let dest = Destination::Node {
            node_id: 0x1234,
            pubkey_prefix: None,
            channel: 3,
        };
        let frame = text_frame(NetworkId::Meshtastic, &dest, "pong").unwrap();
        assert_eq!(
            crate::test_utils::decode_meshtastic_text_on(&frame),
            Some((0x1234, 3, "pong".to_string()))
        );
    }

    #[test]
    fn test_reboot_directive() {
        assert_eq!(
            reboot_directive(NetworkId::MeshCore, None).unwrap(),
            meshcore::reboot()
        );
        let err = reboot_directive(NetworkId::Meshtastic, None).unwrap_err();
        assert!(matches!(err, BridgeError::RecoveryUnavailable(_)));
        assert!(reboot_directive(NetworkId::Meshtastic, Some(0x1234)).is_ok());
    }
}
