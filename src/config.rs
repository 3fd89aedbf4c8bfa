//! Device configuration parameters
//!
//! All tunables for onboarding and connectivity. The binary builds a
//! [`DeviceConfig`] at startup; host tests construct one directly.

use core::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::app::identity::ConnectionType;
use crate::error::Error;

/// Upper bound on MQTT payloads the session inbox can carry.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// Core device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Product model advertised in discovery and declare messages.
    pub model: String,
    /// Manufacturer advertised in discovery and declare messages.
    pub manufacturer: String,
    pub connection_type: ConnectionType,

    pub gateway: GatewayConfig,
    pub provisioning: ProvisioningConfig,
    pub registration: RegistrationConfig,
    pub features: FeatureLimits,

    /// Upper bound on the Wi-Fi association wait during bring-up.
    pub wifi_connect_timeout_ms: u32,

    /// CSV list of debug tags (`"DEVICE,MQTT,PROV"`); empty disables them.
    pub debug_tags: String,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u16,
    pub network_timeout_ms: u32,
    /// Transport RX/TX buffer size in bytes.
    pub buffer_size: usize,
    /// Minimum spacing between lazy reconnect attempts. Zero retries every tick.
    pub reconnect_interval_ms: u32,
}

/// BLE provisioning behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Schedule a restart once SSID and password have both been written.
    pub auto_finalize: bool,
    pub finalize_delay_ms: u32,
    /// Cadence of the progress attribute refresh.
    pub status_interval_ms: u32,
    /// BLE local name used while advertising.
    pub advertise_name: String,
}

/// Discovery / registration handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub enabled: bool,
    pub discovery_port: u16,
    /// TCP port the device listens on for the gateway reply. Zero picks an
    /// ephemeral port, which is then advertised in the descriptor.
    pub listen_port: u16,
    pub broadcast_addr: Ipv4Addr,
    pub accept_timeout_ms: u32,
    pub read_timeout_ms: u32,
}

/// Feature registry capacities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureLimits {
    pub max_events: usize,
    pub max_methods: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: String::from("MEO Node"),
            manufacturer: String::from("ThingAI Lab"),
            connection_type: ConnectionType::Lan,
            gateway: GatewayConfig::default(),
            provisioning: ProvisioningConfig::default(),
            registration: RegistrationConfig::default(),
            features: FeatureLimits::default(),
            wifi_connect_timeout_ms: 15_000,
            debug_tags: String::new(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: String::from("meo-open-service"),
            port: 1883,
            keep_alive_secs: 15,
            network_timeout_ms: 15_000,
            buffer_size: MAX_PAYLOAD_LEN,
            reconnect_interval_ms: 5_000,
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            auto_finalize: true,
            finalize_delay_ms: 300,
            status_interval_ms: 2_000,
            advertise_name: String::from("MEO-Provision"),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery_port: 8901,
            listen_port: 8091,
            broadcast_addr: Ipv4Addr::BROADCAST,
            accept_timeout_ms: 15_000,
            read_timeout_ms: 5_000,
        }
    }
}

impl Default for FeatureLimits {
    fn default() -> Self {
        Self {
            max_events: 8,
            max_methods: 8,
        }
    }
}

impl DeviceConfig {
    /// Set model and manufacturer strings.
    #[must_use]
    pub fn with_device_info(mut self, model: &str, manufacturer: &str) -> Self {
        self.model = model.into();
        self.manufacturer = manufacturer.into();
        self
    }

    /// Point the session at a different broker.
    #[must_use]
    pub fn with_gateway(mut self, host: &str, port: u16) -> Self {
        self.gateway.host = host.into();
        self.gateway.port = port;
        self
    }

    #[must_use]
    pub fn with_debug_tags(mut self, csv: &str) -> Self {
        self.debug_tags = csv.into();
        self
    }

    /// Reject values that would make bring-up meaningless.
    ///
    /// An empty gateway host is *not* rejected here: the session reports it
    /// as [`SessionError::EmptyHost`](crate::error::SessionError) at connect.
    pub fn validate(&self) -> Result<(), Error> {
        if self.model.is_empty() || self.manufacturer.is_empty() {
            return Err(Error::Config("model and manufacturer must be set"));
        }
        if self.gateway.port == 0 {
            return Err(Error::Config("gateway.port must be non-zero"));
        }
        if self.gateway.buffer_size == 0 || self.gateway.buffer_size > MAX_PAYLOAD_LEN {
            return Err(Error::Config("gateway.buffer_size must be 1–1024"));
        }
        if self.registration.discovery_port == 0 {
            return Err(Error::Config("registration.discovery_port must be non-zero"));
        }
        if self.features.max_events == 0 || self.features.max_methods == 0 {
            return Err(Error::Config("feature capacities must be non-zero"));
        }
        if self.provisioning.status_interval_ms == 0 {
            return Err(Error::Config("provisioning.status_interval_ms must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = DeviceConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.gateway.host, "meo-open-service");
        assert_eq!(c.gateway.port, 1883);
        assert_eq!(c.registration.discovery_port, 8901);
        assert_eq!(c.registration.listen_port, 8091);
        assert_eq!(c.features.max_events, 8);
        assert_eq!(c.features.max_methods, 8);
        assert!(c.provisioning.auto_finalize);
    }

    #[test]
    fn registration_bounds_fit_onboarding_window() {
        let c = DeviceConfig::default();
        let total = c.registration.accept_timeout_ms + c.registration.read_timeout_ms;
        assert!(total <= 20_000, "registration must block for at most ~20 s");
    }

    #[test]
    fn builders_override_fields() {
        let c = DeviceConfig::default()
            .with_device_info("DIY Sensor", "ThingAI Lab")
            .with_gateway("broker.local", 1884)
            .with_debug_tags("DEVICE,MQTT");
        assert_eq!(c.model, "DIY Sensor");
        assert_eq!(c.gateway.host, "broker.local");
        assert_eq!(c.gateway.port, 1884);
        assert_eq!(c.debug_tags, "DEVICE,MQTT");
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut c = DeviceConfig::default();
        c.features.max_methods = 0;
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_oversized_buffer() {
        let mut c = DeviceConfig::default();
        c.gateway.buffer_size = 4096;
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn serde_roundtrip() {
        let c = DeviceConfig::default().with_gateway("10.0.0.2", 1883);
        let json = serde_json::to_string(&c).unwrap();
        let c2: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c2.gateway.host, "10.0.0.2");
        assert_eq!(c2.registration.broadcast_addr, Ipv4Addr::BROADCAST);
        assert_eq!(c2.connection_type, ConnectionType::Lan);
    }
}
