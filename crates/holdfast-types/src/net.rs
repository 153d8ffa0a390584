//! Transport hints attached to every outbound payload.

use serde::{Deserialize, Serialize};

/// Delivery class requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryClass {
    /// Eventually delivered or explicitly failed.
    Reliable,
    /// Best effort, may be dropped silently.
    #[default]
    Unreliable,
}

/// Logical channel a payload travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketChannel {
    /// Transport-internal traffic.
    Internal,
    /// Protocol events and game state.
    GameInfo,
    /// Player/session metadata.
    PlayerInfo,
}
