//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ DeviceService (domain)
//! ```
//!
//! Driven adapters (NVS, Wi-Fi, BLE attribute server, MQTT client, clock)
//! implement these traits. The [`DeviceService`](super::service::DeviceService)
//! consumes them via generics, so the domain core never touches ESP-IDF
//! directly and every flow runs on the host against mocks.
//!
//! Callbacks that arrive from foreign execution contexts (the MQTT task, the
//! BLE host task) never reach the domain through these traits. They are
//! pushed into the inboxes handed to the adapter at start-up
//! ([`SessionInbox`], [`ProvisioningInbox`](super::provisioning::ProvisioningInbox))
//! and drained from the tick loop.

use core::net::Ipv4Addr;

use crate::error::{ConnectivityError, SessionError, StorageError};

use super::events::ServiceEvent;
use super::provisioning::ProvisioningField;
use super::session::{ConnectOptions, SessionInbox};

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// Write operations MUST be atomic, with no partial writes on power loss. The
/// ESP-IDF NVS API guarantees this natively; in-memory simulation achieves
/// it trivially.
pub trait StoragePort {
    /// Read a value into `buf` and return its length.
    ///
    /// Fails with [`StorageError::BufferTooSmall`] when the stored value does
    /// not fit, rather than truncating.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Remove every key in `namespace`.
    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Network link port (Wi-Fi station)
// ───────────────────────────────────────────────────────────────

pub trait NetworkPort {
    /// Join `ssid`, waiting at most `timeout_ms` for an address.
    fn connect(&mut self, ssid: &str, password: &str, timeout_ms: u32)
    -> Result<(), ConnectivityError>;

    fn is_connected(&self) -> bool;

    /// Station MAC address, if the interface exists.
    fn mac_address(&self) -> Option<[u8; 6]>;

    /// Station IPv4 address, `None` until DHCP completes.
    fn ipv4(&self) -> Option<Ipv4Addr>;
}

// ───────────────────────────────────────────────────────────────
// Provisioning attribute surface (BLE GATT server)
// ───────────────────────────────────────────────────────────────

/// The short-range attribute server that exposes [`ProvisioningField`]s.
///
/// Inbound writes are delivered through the provisioning inbox the adapter
/// was constructed with; this trait only covers the outbound side.
pub trait AttributePort {
    /// Register the service and start advertising under `name`.
    fn start(&mut self, name: &str) -> bool;

    /// Stop advertising and tear down any connection.
    fn stop(&mut self);

    fn is_advertising(&self) -> bool;

    /// Replace the readable value of `field`.
    fn set_value(&mut self, field: ProvisioningField, value: &str);

    /// Push the current value of `field` to subscribed clients.
    fn notify(&mut self, field: ProvisioningField);
}

// ───────────────────────────────────────────────────────────────
// Publish/subscribe transport (MQTT client)
// ───────────────────────────────────────────────────────────────

/// Connection engine behind the session layer.
///
/// `start` only *begins* a connection: the transport reports liveness and
/// inbound messages later, from its own context, through `inbox`.
pub trait MqttTransport {
    fn start(&mut self, options: &ConnectOptions, inbox: SessionInbox) -> Result<(), SessionError>;

    /// Tear down the current client, if any.
    fn stop(&mut self);

    /// QoS 0 publish.
    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), SessionError>;

    /// QoS 0 subscribe.
    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;
}

// ───────────────────────────────────────────────────────────────
// System services
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds since boot.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

/// Chip-level control.
pub trait SystemPort {
    /// Reboot the device. Real implementations do not return.
    fn restart(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`ServiceEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &ServiceEvent);
}
