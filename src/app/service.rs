//! Connectivity orchestrator, the hexagonal core.
//!
//! [`DeviceService`] owns the identity, the feature registry, the session
//! layer and the provisioning state machine, plus the adapters they run on.
//! It exposes a linear bring-up ([`begin`](DeviceService::begin)) followed
//! by a repeating [`tick`](DeviceService::tick).
//!
//! ```text
//!  NetworkPort ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                  │        DeviceService          │
//!  StoragePort ◀──▶│ Provisioner · Registration    │◀──▶ MqttTransport
//!                  │ Session · FeatureRegistry     │
//! AttributePort ◀──└──────────────────────────────┘ ──▶ SystemPort
//! ```
//!
//! Lazy reconnect: while the link is up, the identity is complete and the
//! session is not live, every tick may start a fresh connect attempt. The
//! attempts are spaced by `gateway.reconnect_interval_ms`; a zero interval
//! retries on every tick.

use log::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::debug::{DebugTags, TAG_DEVICE};
use crate::error::{ConnectivityError, Error, RegistryError, SessionError};

use super::events::ServiceEvent;
use super::identity::{ConnectivityStatus, DeviceIdentity};
use super::ports::{AttributePort, EventSink, MqttTransport, NetworkPort, StoragePort, SystemPort};
use super::provisioning::{Provisioner, ProvisioningInbox};
use super::registration::RegistrationClient;
use super::registry::{FeatureCall, FeatureRegistry};
use super::session::{Responder, Session};
use super::store::{self, CredentialStore};

/// Wi-Fi credentials supplied by the application instead of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// How far bring-up got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUp {
    /// A session connect attempt is in flight.
    Connecting,
    /// Credentials or identity are missing; keep ticking for BLE writes.
    WaitingForProvisioning,
}

/// The adapters a [`DeviceService`] runs on.
pub struct Adapters<T, S, N, A, R> {
    pub transport: T,
    pub storage: S,
    pub network: N,
    pub attributes: A,
    /// The inbox `attributes` pushes client writes into.
    pub attribute_inbox: ProvisioningInbox,
    pub system: R,
}

pub struct DeviceService<T, S, N, A, R>
where
    T: MqttTransport,
    S: StoragePort,
    N: NetworkPort,
    A: AttributePort,
    R: SystemPort,
{
    config: DeviceConfig,
    debug: DebugTags,
    identity: DeviceIdentity,
    registry: FeatureRegistry,
    session: Session<T>,
    provisioning: Provisioner<A>,
    registration: RegistrationClient,
    store: CredentialStore<S>,
    network: N,
    system: R,

    network_up: Option<bool>,
    session_live: bool,
    last_connect_ms: Option<u64>,
    connect_attempts: u32,
}

impl<T, S, N, A, R> DeviceService<T, S, N, A, R>
where
    T: MqttTransport,
    S: StoragePort,
    N: NetworkPort,
    A: AttributePort,
    R: SystemPort,
{
    /// Validate `config` and assemble the service.
    ///
    /// Does **not** touch the radio or the network. Call [`begin`](Self::begin) next.
    pub fn new(config: DeviceConfig, adapters: Adapters<T, S, N, A, R>) -> Result<Self, Error> {
        config.validate()?;
        let debug = DebugTags::new(&config.debug_tags);

        let session = Session::new(
            adapters.transport,
            config.gateway.clone(),
            &config.model,
            &config.manufacturer,
            config.connection_type,
            debug.clone(),
        );
        let provisioning = Provisioner::new(
            adapters.attributes,
            adapters.attribute_inbox,
            config.provisioning.clone(),
            debug.clone(),
        );
        let registration =
            RegistrationClient::new(config.registration.clone(), config.connection_type, debug.clone());

        Ok(Self {
            identity: DeviceIdentity::new(&config.model, &config.manufacturer),
            registry: FeatureRegistry::new(config.features),
            session,
            provisioning,
            registration,
            store: CredentialStore::new(adapters.storage),
            network: adapters.network,
            system: adapters.system,
            debug,
            config,
            network_up: None,
            session_live: false,
            last_connect_ms: None,
            connect_attempts: 0,
        })
    }

    // ── Features ──────────────────────────────────────────────

    pub fn add_feature_event(&mut self, name: &str) -> Result<(), RegistryError> {
        self.registry.add_event(name)
    }

    pub fn add_feature_method<F>(&mut self, name: &str, handler: F) -> Result<(), RegistryError>
    where
        F: FnMut(&FeatureCall, &mut Responder<'_>) + Send + 'static,
    {
        self.registry.add_method(name, handler)
    }

    // ── Bring-up ──────────────────────────────────────────────

    /// Start provisioning, join Wi-Fi, register if needed and connect.
    ///
    /// `preset` Wi-Fi credentials win over stored ones. Registration blocks
    /// for up to the configured accept + read windows.
    pub fn begin(
        &mut self,
        preset: Option<&WifiCredentials>,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> BringUp {
        info!("Device: starting {} / {}", self.config.model, self.config.manufacturer);

        self.provisioning
            .start(&self.store, &self.config.model, &self.config.manufacturer);

        let up = self.join_network(preset, sink);
        self.network_up = Some(up);

        self.reload_identity();
        if up && !self.identity.is_complete() && self.config.registration.enabled {
            self.register(sink);
        }
        self.refresh_status();

        if up && self.identity.is_complete() {
            self.connect_session(now_ms, sink);
            BringUp::Connecting
        } else {
            sink.emit(&ServiceEvent::WaitingForProvisioning);
            BringUp::WaitingForProvisioning
        }
    }

    fn join_network(&mut self, preset: Option<&WifiCredentials>, sink: &mut impl EventSink) -> bool {
        let creds = preset.cloned().or_else(|| {
            let ssid = self.store.load_string(store::KEY_WIFI_SSID)?;
            if ssid.is_empty() {
                return None;
            }
            Some(WifiCredentials {
                ssid,
                password: self.store.load_string_or_empty(store::KEY_WIFI_PASS),
            })
        });

        let Some(creds) = creds else {
            info!("Device: no WiFi credentials yet");
            sink.emit(&ServiceEvent::NetworkDown(Some(ConnectivityError::NoCredentials)));
            return false;
        };

        info!("Device: joining '{}'", creds.ssid);
        match self
            .network
            .connect(&creds.ssid, &creds.password, self.config.wifi_connect_timeout_ms)
        {
            Ok(()) => {
                sink.emit(&ServiceEvent::NetworkUp);
                true
            }
            Err(e) => {
                warn!("Device: WiFi join failed: {}", e);
                sink.emit(&ServiceEvent::NetworkDown(Some(e)));
                false
            }
        }
    }

    fn register(&mut self, sink: &mut impl EventSink) {
        match self
            .registration
            .register_if_needed(&self.identity, &self.registry, &self.network)
        {
            Ok(reply) => {
                if let Err(e) = self.store.save_string(store::KEY_DEVICE_ID, &reply.device_id) {
                    warn!("Device: persisting device_id failed: {}", e);
                }
                if let Err(e) = self.store.save_string(store::KEY_TX_KEY, &reply.transmit_key) {
                    warn!("Device: persisting tx_key failed: {}", e);
                }
                self.identity.device_id = reply.device_id;
                self.identity.transmit_key = reply.transmit_key;
                sink.emit(&ServiceEvent::Registered {
                    device_id: self.identity.device_id.clone(),
                });
            }
            Err(e) => sink.emit(&ServiceEvent::RegistrationFailed(e)),
        }
    }

    fn reload_identity(&mut self) {
        self.identity.device_id = self.store.load_string_or_empty(store::KEY_DEVICE_ID);
        self.identity.transmit_key = self.store.load_string_or_empty(store::KEY_TX_KEY);
        if self.debug.enabled(TAG_DEVICE) {
            debug!(
                "Device: identity id='{}' key_len={}",
                self.identity.device_id,
                self.identity.transmit_key.len()
            );
        }
    }

    fn connect_session(&mut self, now_ms: u64, sink: &mut impl EventSink) {
        self.last_connect_ms = Some(now_ms);
        self.session
            .set_credentials(&self.identity.device_id, &self.identity.transmit_key);
        match self.session.connect() {
            Ok(()) => {
                self.connect_attempts += 1;
                sink.emit(&ServiceEvent::SessionConnecting {
                    attempt: self.connect_attempts,
                });
            }
            Err(e) => warn!("Device: session connect failed: {}", e),
        }
    }

    // ── Tick ──────────────────────────────────────────────────

    /// One pass of the steady-state loop. Call at sub-second cadence.
    pub fn tick(&mut self, now_ms: u64, sink: &mut impl EventSink) {
        let report = self.provisioning.poll(&mut self.store, now_ms);
        if let Some(at_ms) = report.finalize_scheduled {
            sink.emit(&ServiceEvent::RestartScheduled { at_ms });
        }
        if report.writes > 0 {
            self.reload_identity();
        }
        if report.restart_due {
            sink.emit(&ServiceEvent::RestartRequested);
            self.session.disconnect();
            self.system.restart();
            return;
        }

        self.session.poll(&mut self.registry);

        let up = self.network.is_connected();
        let live = self.session.is_connected();
        let mut changed = false;

        if self.network_up != Some(up) {
            self.network_up = Some(up);
            sink.emit(&if up {
                ServiceEvent::NetworkUp
            } else {
                ServiceEvent::NetworkDown(None)
            });
            changed = true;
        }
        if self.session_live != live {
            self.session_live = live;
            sink.emit(&if live {
                ServiceEvent::SessionLive
            } else {
                ServiceEvent::SessionLost
            });
            changed = true;
        }
        if changed {
            if self.debug.enabled(TAG_DEVICE) {
                debug!("Device: status WiFi={} MQTT={}", up, live);
            }
            self.refresh_status();
        }

        if !live && up && self.identity.is_complete() && self.reconnect_due(now_ms) {
            self.connect_session(now_ms, sink);
        }
    }

    fn reconnect_due(&self, now_ms: u64) -> bool {
        let interval = u64::from(self.config.gateway.reconnect_interval_ms);
        interval == 0
            || self
                .last_connect_ms
                .is_none_or(|t| now_ms.saturating_sub(t) >= interval)
    }

    fn refresh_status(&mut self) {
        let network = self
            .network_up
            .map_or(ConnectivityStatus::Unknown, ConnectivityStatus::from_up);
        let session = if self.network_up.is_some() {
            ConnectivityStatus::from_up(self.session_live)
        } else {
            ConnectivityStatus::Unknown
        };
        self.provisioning.set_runtime_status(network, session);
    }

    // ── Application publishing ────────────────────────────────

    /// Publish `fields` to `meo/{id}/event/{name}`.
    pub fn publish_event(&mut self, name: &str, fields: &[(&str, &str)]) -> Result<(), SessionError> {
        self.session.publish_event(name, fields)
    }

    pub fn send_feature_response(
        &mut self,
        call: &FeatureCall,
        success: bool,
        message: Option<&str>,
    ) -> Result<(), SessionError> {
        self.session.send_feature_response(call, success, message)
    }

    /// Stop BLE advertising, e.g. once the session is stable.
    pub fn stop_provisioning(&mut self) {
        self.provisioning.stop();
    }

    /// Wipe credentials and identity, then restart.
    pub fn factory_reset(&mut self) -> Result<(), Error> {
        warn!("Device: factory reset");
        self.store.clear_all()?;
        self.session.disconnect();
        self.system.restart();
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn is_network_up(&self) -> bool {
        self.network.is_connected()
    }

    pub fn is_session_live(&self) -> bool {
        self.session.is_connected()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn provisioning(&self) -> &Provisioner<A> {
        &self.provisioning
    }

    pub fn store(&self) -> &CredentialStore<S> {
        &self.store
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn system(&self) -> &R {
        &self.system
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }
}
