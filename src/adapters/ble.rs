//! BLE provisioning adapter.
//!
//! Implements [`AttributePort`]: the GATT server that exposes the
//! provisioning characteristics to a phone app.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: NimBLE GATT server via `esp32-nimble`.
//! - **all other targets**: in-memory attribute table for host-side tests.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                          | Perms        |
//! |----------------|-------------------------------|--------------|
//! | Service        | `9f27f7f0-0000-1000-8000-…`   |              |
//! | WiFi SSID      | `9f27f7f1-…`                  | Read+Write   |
//! | WiFi Password  | `9f27f7f2-…`                  | Write        |
//! | Model          | `9f27f7f3-…`                  | Read         |
//! | Manufacturer   | `9f27f7f4-…`                  | Read         |
//! | Status         | `9f27f7f5-…`                  | Read+Notify  |
//! | Device ID      | `9f27f7f6-…`                  | Read+Write   |
//! | Transmit Key   | `9f27f7f7-…`                  | Write        |
//!
//! Client writes run on the NimBLE host task. They are pushed into the
//! [`ProvisioningInbox`] and never touch the store from that context.

use log::{info, warn};

use crate::app::ports::AttributePort;
use crate::app::provisioning::{ProvisioningField, ProvisioningInbox};

#[cfg(target_os = "espidf")]
use crate::app::provisioning::SERVICE_UUID;

// ───────────────────────────────────────────────────────────────
// BLE state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Failed,
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF (NimBLE)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod gatt {
    use std::collections::HashMap;
    use std::sync::Arc;

    use esp32_nimble::utilities::BleUuid;
    use esp32_nimble::utilities::mutex::Mutex;
    use esp32_nimble::{BLEAdvertisementData, BLECharacteristic, BLEDevice, NimbleProperties};
    use log::{info, warn};

    use super::{ProvisioningField, ProvisioningInbox, SERVICE_UUID};

    pub type Characteristics = HashMap<ProvisioningField, Arc<Mutex<BLECharacteristic>>>;

    fn uuid(value: u128) -> BleUuid {
        BleUuid::from_uuid128(value.to_le_bytes())
    }

    fn properties(field: ProvisioningField) -> NimbleProperties {
        let mut props = NimbleProperties::empty();
        if field.readable() {
            props |= NimbleProperties::READ;
        }
        if field.writable() {
            props |= NimbleProperties::WRITE;
        }
        if field.notifies() {
            props |= NimbleProperties::NOTIFY;
        }
        props
    }

    /// Build the service and register one characteristic per field.
    pub fn build_service(inbox: &ProvisioningInbox) -> Characteristics {
        let device = BLEDevice::take();
        let server = device.get_server();

        server.on_connect(|_server, desc| {
            info!("BLE: central connected (handle={})", desc.conn_handle());
        });
        server.on_disconnect(|_desc, reason| {
            info!("BLE: central disconnected ({:?})", reason);
        });

        let service = server.create_service(uuid(SERVICE_UUID));
        let mut chars = Characteristics::new();
        for field in ProvisioningField::ALL {
            let characteristic = service
                .lock()
                .create_characteristic(uuid(field.uuid()), properties(field));
            if field.writable() {
                let inbox = inbox.clone();
                characteristic.lock().on_write(move |args| {
                    if !inbox.push_write(field, args.recv_data()) {
                        warn!("BLE: inbox full, {:?} write dropped", field);
                    }
                });
            }
            chars.insert(field, characteristic);
        }
        chars
    }

    pub fn start_advertising(name: &str) -> bool {
        let device = BLEDevice::take();
        if let Err(e) = BLEDevice::set_device_name(name) {
            warn!("BLE: set_device_name failed: {:?}", e);
            return false;
        }
        // Restart advertising whenever a central drops.
        device.get_server().advertise_on_disconnect(true);

        let mut advertising = device.get_advertising().lock();
        let mut data = BLEAdvertisementData::new();
        data.name(name).add_service_uuid(uuid(SERVICE_UUID));
        if let Err(e) = advertising.set_data(&mut data) {
            warn!("BLE: advertising data rejected: {:?}", e);
            return false;
        }
        match advertising.start() {
            Ok(()) => true,
            Err(e) => {
                warn!("BLE: advertising start failed: {:?}", e);
                false
            }
        }
    }

    pub fn stop_advertising() {
        let device = BLEDevice::take();
        if let Err(e) = device.get_advertising().lock().stop() {
            warn!("BLE: advertising stop failed: {:?}", e);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// BLE adapter
// ───────────────────────────────────────────────────────────────

pub struct BleAdapter {
    state: BleState,
    inbox: ProvisioningInbox,
    #[cfg(target_os = "espidf")]
    chars: Option<gatt::Characteristics>,

    #[cfg(not(target_os = "espidf"))]
    sim_values: std::collections::HashMap<ProvisioningField, String>,
    #[cfg(not(target_os = "espidf"))]
    sim_notified: Vec<ProvisioningField>,
    #[cfg(not(target_os = "espidf"))]
    sim_name: String,
}

impl BleAdapter {
    /// `inbox` receives every client write.
    pub fn new(inbox: ProvisioningInbox) -> Self {
        Self {
            state: BleState::Idle,
            inbox,
            #[cfg(target_os = "espidf")]
            chars: None,
            #[cfg(not(target_os = "espidf"))]
            sim_values: std::collections::HashMap::new(),
            #[cfg(not(target_os = "espidf"))]
            sim_notified: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            sim_name: String::new(),
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }
}

// ── Simulation helpers ────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl BleAdapter {
    /// Simulate a central writing `raw` to `field`.
    ///
    /// Writes to fields without the write property are rejected, as the
    /// GATT server would.
    pub fn sim_client_write(&mut self, field: ProvisioningField, raw: &[u8]) -> bool {
        if !field.writable() {
            warn!("BLE(sim): write to read-only {:?} rejected", field);
            return false;
        }
        self.inbox.push_write(field, raw)
    }

    /// Simulate a central reading `field`. `None` for write-only fields.
    pub fn sim_client_read(&self, field: ProvisioningField) -> Option<&str> {
        if !field.readable() {
            return None;
        }
        Some(self.sim_values.get(&field).map_or("", String::as_str))
    }

    /// Fields notified so far, in order.
    pub fn notifications(&self) -> &[ProvisioningField] {
        &self.sim_notified
    }

    pub fn advertised_name(&self) -> &str {
        &self.sim_name
    }
}

impl AttributePort for BleAdapter {
    fn start(&mut self, name: &str) -> bool {
        #[cfg(target_os = "espidf")]
        {
            if self.chars.is_none() {
                self.chars = Some(gatt::build_service(&self.inbox));
            }
            if !gatt::start_advertising(name) {
                self.state = BleState::Failed;
                return false;
            }
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_name = name.into();
        }
        self.state = BleState::Advertising;
        info!("BLE: advertising as '{}'", name);
        true
    }

    fn stop(&mut self) {
        if self.state != BleState::Advertising {
            return;
        }
        #[cfg(target_os = "espidf")]
        gatt::stop_advertising();
        self.state = BleState::Idle;
        info!("BLE: advertising stopped");
    }

    fn is_advertising(&self) -> bool {
        self.state == BleState::Advertising
    }

    fn set_value(&mut self, field: ProvisioningField, value: &str) {
        #[cfg(target_os = "espidf")]
        if let Some(c) = self.chars.as_ref().and_then(|m| m.get(&field)) {
            c.lock().set_value(value.as_bytes());
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_values.insert(field, value.into());
        }
    }

    fn notify(&mut self, field: ProvisioningField) {
        if !field.notifies() {
            return;
        }
        #[cfg(target_os = "espidf")]
        if let Some(c) = self.chars.as_ref().and_then(|m| m.get(&field)) {
            c.lock().notify();
        }
        #[cfg(not(target_os = "espidf"))]
        self.sim_notified.push(field);
    }
}
