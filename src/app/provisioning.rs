//! BLE provisioning state machine.
//!
//! Owns the provisioning attribute surface and the per-boot written flags.
//!
//! ```text
//!  Unconfigured ──write──▶ PartiallyWritten ──both──▶ ReadyToFinalize
//!                                                        │ auto_finalize
//!                                                        ▼
//!                               (restart) ◀── FinalizeScheduled
//! ```
//!
//! Every write is trimmed and persisted as-is, empty values included. Only
//! the SSID/password pair drives the machine; device id and session key are
//! stored and otherwise left to the orchestrator. The restart is scheduled
//! at most once per boot.
//!
//! Writes arrive on the BLE host task. The adapter pushes them into a
//! [`ProvisioningInbox`]; [`Provisioner::poll`] drains it on the tick loop,
//! so the written flags have a single writer.

use std::sync::Arc;
use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, info, warn};

use crate::config::ProvisioningConfig;
use crate::debug::{DebugTags, TAG_PROV};

use super::identity::ConnectivityStatus;
use super::ports::{AttributePort, StoragePort};
use super::store::{self, CredentialStore};

// ───────────────────────────────────────────────────────────────
// Attribute surface
// ───────────────────────────────────────────────────────────────

/// Provisioning service UUID `9f27f7f0-0000-1000-8000-00805f9b34fb`.
pub const SERVICE_UUID: u128 = 0x9f27_f7f0_0000_1000_8000_0080_5f9b_34fb;

/// Largest attribute value accepted from a client.
pub const MAX_VALUE_LEN: usize = 128;

/// Pending writes buffered between the BLE task and the tick loop.
const INBOX_DEPTH: usize = 8;

/// One characteristic of the provisioning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningField {
    /// Wi-Fi SSID (read/write).
    NetworkName,
    /// Wi-Fi passphrase (write-only).
    NetworkSecret,
    Model,
    Manufacturer,
    /// `"WiFi: …, MQTT: …"` (read/notify).
    Progress,
    /// Issued device id (read/write).
    DeviceId,
    /// Issued transmit key (write-only).
    SessionKey,
}

impl ProvisioningField {
    pub const ALL: [Self; 7] = [
        Self::NetworkName,
        Self::NetworkSecret,
        Self::Model,
        Self::Manufacturer,
        Self::Progress,
        Self::DeviceId,
        Self::SessionKey,
    ];

    /// Characteristic UUID: the service UUID with the first group bumped.
    pub const fn uuid(self) -> u128 {
        let offset: u128 = match self {
            Self::NetworkName => 1,
            Self::NetworkSecret => 2,
            Self::Model => 3,
            Self::Manufacturer => 4,
            Self::Progress => 5,
            Self::DeviceId => 6,
            Self::SessionKey => 7,
        };
        SERVICE_UUID + (offset << 96)
    }

    pub const fn readable(self) -> bool {
        !matches!(self, Self::NetworkSecret | Self::SessionKey)
    }

    pub const fn writable(self) -> bool {
        matches!(
            self,
            Self::NetworkName | Self::NetworkSecret | Self::DeviceId | Self::SessionKey
        )
    }

    pub const fn notifies(self) -> bool {
        matches!(self, Self::Progress)
    }

    /// Credential-store key a write to this field persists under.
    pub const fn store_key(self) -> Option<&'static str> {
        match self {
            Self::NetworkName => Some(store::KEY_WIFI_SSID),
            Self::NetworkSecret => Some(store::KEY_WIFI_PASS),
            Self::DeviceId => Some(store::KEY_DEVICE_ID),
            Self::SessionKey => Some(store::KEY_TX_KEY),
            Self::Model | Self::Manufacturer | Self::Progress => None,
        }
    }

    pub fn from_uuid(uuid: u128) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.uuid() == uuid)
    }
}

// ───────────────────────────────────────────────────────────────
// Cross-context inbox
// ───────────────────────────────────────────────────────────────

/// A raw client write, captured on the BLE task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeWrite {
    pub field: ProvisioningField,
    pub value: heapless::String<MAX_VALUE_LEN>,
}

/// Cloneable handle shared by the BLE adapter and the [`Provisioner`].
#[derive(Clone)]
pub struct ProvisioningInbox {
    queue: Arc<Channel<CriticalSectionRawMutex, AttributeWrite, INBOX_DEPTH>>,
}

impl Default for ProvisioningInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningInbox {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Channel::new()),
        }
    }

    /// Queue a client write. Safe to call from any task.
    ///
    /// Invalid UTF-8 is replaced and over-long values are truncated. Returns
    /// `false` when the inbox is full and the write was dropped.
    pub fn push_write(&self, field: ProvisioningField, raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let mut value = heapless::String::new();
        for c in text.chars() {
            if value.push(c).is_err() {
                break;
            }
        }
        self.queue.try_send(AttributeWrite { field, value }).is_ok()
    }

    pub fn pop(&self) -> Option<AttributeWrite> {
        self.queue.try_receive().ok()
    }
}

// ───────────────────────────────────────────────────────────────
// State machine
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Unconfigured,
    PartiallyWritten,
    ReadyToFinalize,
    FinalizeScheduled,
}

/// Result of handling one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Field is read-only; nothing persisted.
    Ignored,
    Stored,
    /// This write completed the SSID/password pair; restart due at `at_ms`.
    FinalizeScheduled { at_ms: u64 },
}

/// What one [`Provisioner::poll`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Writes drained from the inbox and persisted.
    pub writes: usize,
    /// Set when a write in this poll scheduled the restart.
    pub finalize_scheduled: Option<u64>,
    /// The scheduled restart is due now. Reported once.
    pub restart_due: bool,
}

pub struct Provisioner<A: AttributePort> {
    attributes: A,
    inbox: ProvisioningInbox,
    settings: ProvisioningConfig,
    debug: DebugTags,

    ssid_written: bool,
    pass_written: bool,
    restart_at: Option<u64>,
    restart_reported: bool,

    network_status: ConnectivityStatus,
    session_status: ConnectivityStatus,
    last_status_ms: Option<u64>,
}

impl<A: AttributePort> Provisioner<A> {
    pub fn new(
        attributes: A,
        inbox: ProvisioningInbox,
        settings: ProvisioningConfig,
        debug: DebugTags,
    ) -> Self {
        Self {
            attributes,
            inbox,
            settings,
            debug,
            ssid_written: false,
            pass_written: false,
            restart_at: None,
            restart_reported: false,
            network_status: ConnectivityStatus::Unknown,
            session_status: ConnectivityStatus::Unknown,
            last_status_ms: None,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Seed readable attributes and start advertising.
    pub fn start<S: StoragePort>(
        &mut self,
        store: &CredentialStore<S>,
        model: &str,
        manufacturer: &str,
    ) -> bool {
        if let Some(ssid) = store.load_string(store::KEY_WIFI_SSID) {
            self.attributes.set_value(ProvisioningField::NetworkName, &ssid);
        }
        if let Some(id) = store.load_string(store::KEY_DEVICE_ID) {
            self.attributes.set_value(ProvisioningField::DeviceId, &id);
        }
        if !model.is_empty() {
            self.attributes.set_value(ProvisioningField::Model, model);
        }
        if !manufacturer.is_empty() {
            self.attributes.set_value(ProvisioningField::Manufacturer, manufacturer);
        }
        self.render_status();

        let ok = self.attributes.start(&self.settings.advertise_name);
        if ok {
            info!("Prov: advertising as '{}'", self.settings.advertise_name);
        } else {
            warn!("Prov: attribute server failed to start");
        }
        ok
    }

    pub fn stop(&mut self) {
        self.attributes.stop();
        info!("Prov: stopped");
    }

    pub fn is_active(&self) -> bool {
        self.attributes.is_advertising()
    }

    // ── Writes ────────────────────────────────────────────────

    /// Apply one client write: trim, persist, update flags, try to finalize.
    pub fn handle_write<S: StoragePort>(
        &mut self,
        store: &mut CredentialStore<S>,
        field: ProvisioningField,
        raw: &str,
        now_ms: u64,
    ) -> WriteOutcome {
        let Some(key) = field.store_key() else {
            warn!("Prov: write to read-only field {:?} ignored", field);
            return WriteOutcome::Ignored;
        };

        let value = trim_value(raw);
        if let Err(e) = store.save_string(key, value) {
            warn!("Prov: persisting {} failed: {}", key, e);
        }
        if field.readable() {
            self.attributes.set_value(field, value);
        }

        match field {
            ProvisioningField::NetworkName => {
                info!("Prov: SSID written (len={})", value.len());
                self.ssid_written = true;
            }
            ProvisioningField::NetworkSecret => {
                info!("Prov: password written (len={})", value.len());
                self.pass_written = true;
            }
            _ => {
                info!("Prov: {} written (len={})", key, value.len());
                return WriteOutcome::Stored;
            }
        }

        match self.try_finalize(now_ms) {
            Some(at_ms) => WriteOutcome::FinalizeScheduled { at_ms },
            None => WriteOutcome::Stored,
        }
    }

    fn try_finalize(&mut self, now_ms: u64) -> Option<u64> {
        if !self.settings.auto_finalize
            || !self.ssid_written
            || !self.pass_written
            || self.restart_at.is_some()
        {
            return None;
        }
        let at = now_ms + u64::from(self.settings.finalize_delay_ms);
        self.restart_at = Some(at);
        info!("Prov: credentials complete, restart in {} ms", self.settings.finalize_delay_ms);
        Some(at)
    }

    // ── Tick ──────────────────────────────────────────────────

    /// Drain pending writes, refresh the progress attribute when due and
    /// report whether the scheduled restart should run now.
    pub fn poll<S: StoragePort>(&mut self, store: &mut CredentialStore<S>, now_ms: u64) -> PollReport {
        let mut report = PollReport::default();

        while let Some(write) = self.inbox.pop() {
            report.writes += 1;
            if let WriteOutcome::FinalizeScheduled { at_ms } =
                self.handle_write(store, write.field, &write.value, now_ms)
            {
                report.finalize_scheduled = Some(at_ms);
            }
        }

        let due = self
            .last_status_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= u64::from(self.settings.status_interval_ms));
        if due {
            self.last_status_ms = Some(now_ms);
            self.render_status();
            self.attributes.notify(ProvisioningField::Progress);
        }

        if let Some(at) = self.restart_at {
            if now_ms >= at && !self.restart_reported {
                self.restart_reported = true;
                report.restart_due = true;
            }
        }

        report
    }

    // ── Status telemetry ──────────────────────────────────────

    /// Record link/session state and re-render the progress value.
    pub fn set_runtime_status(&mut self, network: ConnectivityStatus, session: ConnectivityStatus) {
        self.network_status = network;
        self.session_status = session;
        self.render_status();
    }

    /// Current progress line, e.g. `"WiFi: connected, MQTT: unknown"`.
    pub fn status_line(&self) -> String {
        let mut line = String::with_capacity(40);
        let _ = write!(line, "WiFi: {}, MQTT: {}", self.network_status, self.session_status);
        line
    }

    fn render_status(&mut self) {
        let line = self.status_line();
        if self.debug.enabled(TAG_PROV) {
            debug!("Prov: status '{}'", line);
        }
        self.attributes.set_value(ProvisioningField::Progress, &line);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> ProvisioningState {
        if self.restart_at.is_some() {
            ProvisioningState::FinalizeScheduled
        } else if self.ssid_written && self.pass_written {
            ProvisioningState::ReadyToFinalize
        } else if self.ssid_written || self.pass_written {
            ProvisioningState::PartiallyWritten
        } else {
            ProvisioningState::Unconfigured
        }
    }

    pub fn restart_at(&self) -> Option<u64> {
        self.restart_at
    }

    pub fn inbox(&self) -> &ProvisioningInbox {
        &self.inbox
    }

    pub fn attributes(&self) -> &A {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut A {
        &mut self.attributes
    }
}

/// Strip surrounding whitespace and control characters (CR/LF from
/// phone keyboards, trailing NULs from some BLE clients).
fn trim_value(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c.is_control())
}
