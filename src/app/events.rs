//! Outbound service events.
//!
//! The [`DeviceService`](super::service::DeviceService) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them.

use crate::error::{ConnectivityError, RegistrationError};

/// Structured events emitted by the connectivity core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Bring-up stopped: credentials or identity are missing.
    WaitingForProvisioning,

    /// The Wi-Fi link came up.
    NetworkUp,

    /// The Wi-Fi link went down or could not be joined.
    NetworkDown(Option<ConnectivityError>),

    /// The gateway issued an identity during bring-up.
    Registered { device_id: String },

    RegistrationFailed(RegistrationError),

    /// A session connect attempt was handed to the transport.
    SessionConnecting { attempt: u32 },

    /// The broker acknowledged the session; declare has been published.
    SessionLive,

    SessionLost,

    /// SSID and password are in; a restart is due at `at_ms`.
    RestartScheduled { at_ms: u64 },

    /// The scheduled restart is being executed now.
    RestartRequested,
}
