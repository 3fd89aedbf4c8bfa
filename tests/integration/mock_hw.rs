//! Mock adapters for integration tests.
//!
//! The simulation backends of the crate's own adapters (NVS, BLE, MQTT)
//! are used as-is. Only the network link, the chip reset and the event
//! sink are mocked here so tests can script them.

use core::net::Ipv4Addr;

use meo_node::adapters::ble::BleAdapter;
use meo_node::adapters::mqtt::MqttAdapter;
use meo_node::adapters::nvs::NvsAdapter;
use meo_node::app::events::ServiceEvent;
use meo_node::app::ports::{EventSink, NetworkPort, StoragePort, SystemPort};
use meo_node::app::provisioning::ProvisioningInbox;
use meo_node::app::service::{Adapters, DeviceService};
use meo_node::app::store;
use meo_node::config::DeviceConfig;
use meo_node::error::ConnectivityError;

pub type TestService = DeviceService<MqttAdapter, NvsAdapter, MockNetwork, BleAdapter, MockSystem>;

// ── MockNetwork ───────────────────────────────────────────────

pub struct MockNetwork {
    pub link_up: bool,
    pub fail_join: bool,
    pub mac: Option<[u8; 6]>,
    pub ip: Ipv4Addr,
    /// Every `(ssid, password)` passed to `connect`.
    pub joins: Vec<(String, String)>,
}

#[allow(dead_code)]
impl MockNetwork {
    pub fn new() -> Self {
        Self {
            link_up: false,
            fail_join: false,
            mac: Some([0x24, 0x6F, 0x28, 0x01, 0x02, 0x03]),
            ip: Ipv4Addr::new(192, 168, 1, 20),
            joins: Vec::new(),
        }
    }

    /// A link whose address is the loopback, for socket-level tests.
    pub fn loopback() -> Self {
        Self {
            ip: Ipv4Addr::LOCALHOST,
            ..Self::new()
        }
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkPort for MockNetwork {
    fn connect(&mut self, ssid: &str, password: &str, _timeout_ms: u32) -> Result<(), ConnectivityError> {
        self.joins.push((ssid.into(), password.into()));
        if self.fail_join {
            return Err(ConnectivityError::ConnectionFailed);
        }
        self.link_up = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link_up
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        self.mac
    }

    fn ipv4(&self) -> Option<Ipv4Addr> {
        self.link_up.then_some(self.ip)
    }
}

// ── MockSystem ────────────────────────────────────────────────

#[derive(Default)]
pub struct MockSystem {
    pub restarts: usize,
}

impl SystemPort for MockSystem {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}

// ── RecordingSink ─────────────────────────────────────────────

/// Event sink that records every emission for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ServiceEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, event: &ServiceEvent) -> bool {
        self.events.contains(event)
    }

    pub fn count(&self, event: &ServiceEvent) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ServiceEvent) {
        self.events.push(event.clone());
    }
}

// ── Builders ──────────────────────────────────────────────────

/// Defaults with registration off so no test blocks on sockets by accident.
pub fn test_config() -> DeviceConfig {
    let mut config = DeviceConfig::default().with_device_info("DIY Sensor", "ThingAI Lab");
    config.registration.enabled = false;
    config
}

/// Simulated NVS pre-loaded with `(key, value)` pairs in the `meo` namespace.
pub fn seeded_storage(pairs: &[(&str, &str)]) -> NvsAdapter {
    let mut nvs = NvsAdapter::new().unwrap();
    for (key, value) in pairs {
        nvs.write(store::NAMESPACE, key, value.as_bytes()).unwrap();
    }
    nvs
}

/// Storage holding Wi-Fi credentials and a complete identity.
#[allow(dead_code)]
pub fn provisioned_storage() -> NvsAdapter {
    seeded_storage(&[
        (store::KEY_WIFI_SSID, "HomeNet"),
        (store::KEY_WIFI_PASS, "hunter22"),
        (store::KEY_DEVICE_ID, "dev-1"),
        (store::KEY_TX_KEY, "k1"),
    ])
}

pub fn build_service(config: DeviceConfig, storage: NvsAdapter, network: MockNetwork) -> TestService {
    let inbox = ProvisioningInbox::new();
    let adapters = Adapters {
        transport: MqttAdapter::new(),
        storage,
        network,
        attributes: BleAdapter::new(inbox.clone()),
        attribute_inbox: inbox,
        system: MockSystem::default(),
    };
    DeviceService::new(config, adapters).unwrap()
}
