//! Transport descriptors for discovered peers.

use serde::{Deserialize, Serialize};

use crate::TypeError;

/// The transports a peer can be reached over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Lan,
    WifiAware,
    WifiDirect,
    Ble,
}

impl TransportKind {
    /// Fixed selection priority; higher is preferred.
    pub fn priority(self) -> u32 {
        match self {
            TransportKind::Lan => 100,
            TransportKind::WifiAware => 90,
            TransportKind::WifiDirect => 80,
            TransportKind::Ble => 50,
        }
    }

    /// Stable label used in addresses, logs and the database.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Lan => "lan",
            TransportKind::WifiAware => "wifi_aware",
            TransportKind::WifiDirect => "wifi_direct",
            TransportKind::Ble => "ble",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lan" => Ok(TransportKind::Lan),
            "wifi_aware" => Ok(TransportKind::WifiAware),
            "wifi_direct" => Ok(TransportKind::WifiDirect),
            "ble" => Ok(TransportKind::Ble),
            other => Err(TypeError::UnknownTransport(other.to_string())),
        }
    }
}

/// Last-known reachability of a peer over one transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportInfo {
    /// Transport-specific address (IP:port, MAC, service handle).
    pub address: String,
    /// When this transport last saw the peer, wall-clock milliseconds.
    pub last_seen_ms: u64,
    /// Signal strength in dBm where the transport reports one.
    pub rssi: Option<i32>,
}
