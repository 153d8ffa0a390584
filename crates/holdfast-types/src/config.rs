//! Protocol configuration.

use crate::net::DeliveryClass;
use serde::{Deserialize, Serialize};

/// Built-in strategies for picking a new owner among the subscribers of a
/// released resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPolicyKind {
    /// First candidate in the order the departing owner registered them.
    #[default]
    FirstRegistered,
    /// Candidate with the numerically lowest peer id.
    LowestPeerId,
}

/// Tunables for one protocol session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Display name announced for the local peer.
    pub local_name: String,
    /// Most retired events each channel keeps after an acknowledgment for
    /// result correlation. Older ones in the same ack are forgotten.
    pub recent_ack_capacity: usize,
    /// Ticks after which an unanswered request is abandoned. `None` keeps it
    /// pending forever.
    pub request_timeout_ticks: Option<u64>,
    /// Delivery class used for event packets. Unacknowledged events are
    /// re-sent every tick regardless.
    pub event_delivery: DeliveryClass,
    /// Successor selection when an owner with subscribers releases.
    pub transfer_policy: TransferPolicyKind,
    /// Upper bound on loopback processing rounds per tick.
    pub max_loopback_rounds: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            local_name: "holdfast-peer".to_string(),
            recent_ack_capacity: 16,
            request_timeout_ticks: None,
            event_delivery: DeliveryClass::Unreliable,
            transfer_policy: TransferPolicyKind::FirstRegistered,
            max_loopback_rounds: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ProtocolConfig = toml::from_str(
            r#"
            local_name = "survivor"
            request_timeout_ticks = 40
            event_delivery = "reliable"
            "#,
        )
        .unwrap();
        assert_eq!(config.local_name, "survivor");
        assert_eq!(config.request_timeout_ticks, Some(40));
        assert_eq!(config.event_delivery, DeliveryClass::Reliable);
        assert_eq!(config.recent_ack_capacity, 16);
        assert_eq!(config.transfer_policy, TransferPolicyKind::FirstRegistered);
    }

    #[test]
    fn test_transfer_policy_names() {
        let config: ProtocolConfig = toml::from_str(r#"transfer_policy = "lowest_peer_id""#).unwrap();
        assert_eq!(config.transfer_policy, TransferPolicyKind::LowestPeerId);
    }

    #[test]
    fn test_default_has_no_timeout() {
        let config = ProtocolConfig::default();
        assert!(config.request_timeout_ticks.is_none());
        assert_eq!(config.event_delivery, DeliveryClass::Unreliable);
    }
}
