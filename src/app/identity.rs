//! Device identity and connectivity status types.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Who this device is, as far as the gateway is concerned.
///
/// `model` and `manufacturer` are fixed at build time; `device_id` and
/// `transmit_key` stay empty until provisioning or registration fills them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub model: String,
    pub manufacturer: String,
    pub device_id: String,
    pub transmit_key: String,
}

impl DeviceIdentity {
    pub fn new(model: &str, manufacturer: &str) -> Self {
        Self {
            model: model.into(),
            manufacturer: manufacturer.into(),
            ..Self::default()
        }
    }

    /// Both issued fields are present; a session may be established.
    pub fn is_complete(&self) -> bool {
        !self.device_id.is_empty() && !self.transmit_key.is_empty()
    }
}

/// How the device reaches the gateway.
///
/// Serialised as its integer discriminant in the discovery descriptor and
/// as [`label`](Self::label) in the declare message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ConnectionType {
    #[default]
    Lan = 0,
    Uart = 1,
}

impl ConnectionType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Lan => "LAN",
            Self::Uart => "UART",
        }
    }
}

impl From<ConnectionType> for u8 {
    fn from(c: ConnectionType) -> Self {
        c as u8
    }
}

impl TryFrom<u8> for ConnectionType {
    type Error = &'static str;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Lan),
            1 => Ok(Self::Uart),
            _ => Err("unknown connection type"),
        }
    }
}

/// Link or session state as rendered on the progress attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl ConnectivityStatus {
    pub const fn from_up(up: bool) -> Self {
        if up { Self::Connected } else { Self::Disconnected }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
