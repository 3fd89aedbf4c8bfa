//! MQTT transport adapter.
//!
//! Implements [`MqttTransport`] for the session layer.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`.
//!   The client runs its own task; its event callback only forwards into the
//!   [`SessionInbox`].
//! - **all other targets**: a recording stub. Tests drive liveness and
//!   inbound messages through the inbox captured at `start`.

use log::info;
#[cfg(not(target_os = "espidf"))]
use log::warn;

use crate::app::ports::MqttTransport;
use crate::app::session::{ConnectOptions, SessionInbox};
use crate::error::SessionError;

/// One publish seen by the simulated broker.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

pub struct MqttAdapter {
    #[cfg(target_os = "espidf")]
    client: Option<esp_idf_svc::mqtt::client::EspMqttClient<'static>>,

    #[cfg(not(target_os = "espidf"))]
    sim: SimBroker,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimBroker {
    inbox: Option<SessionInbox>,
    options: Option<ConnectOptions>,
    starts: usize,
    stops: usize,
    fail_start: bool,
    published: Vec<Published>,
    subscriptions: Vec<String>,
}

impl Default for MqttAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            sim: SimBroker::default(),
        }
    }
}

// ── ESP-IDF client ────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl MqttAdapter {
    fn create_client(
        options: &ConnectOptions,
        inbox: SessionInbox,
    ) -> Result<esp_idf_svc::mqtt::client::EspMqttClient<'static>, esp_idf_svc::sys::EspError> {
        use core::time::Duration;
        use esp_idf_svc::mqtt::client::{
            Details, EspMqttClient, EventPayload, LwtConfiguration, MqttClientConfiguration, QoS,
        };

        let lwt = options.last_will.as_ref().map(|will| LwtConfiguration {
            topic: &will.topic,
            payload: will.payload.as_bytes(),
            qos: QoS::AtMostOnce,
            retain: will.retained,
        });
        let conf = MqttClientConfiguration {
            client_id: Some(&options.client_id),
            username: (!options.username.is_empty()).then_some(options.username.as_str()),
            password: (!options.password.is_empty()).then_some(options.password.as_str()),
            keep_alive_interval: Some(Duration::from_secs(u64::from(options.keep_alive_secs))),
            network_timeout: Duration::from_millis(u64::from(options.network_timeout_ms)),
            buffer_size: options.buffer_size,
            out_buffer_size: options.buffer_size,
            lwt,
            ..Default::default()
        };

        EspMqttClient::new_cb(&options.uri, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => inbox.notify_connected(),
            EventPayload::Disconnected => inbox.notify_disconnected(),
            EventPayload::Received {
                topic: Some(topic),
                data,
                details: Details::Complete,
                ..
            } => {
                inbox.notify_message(topic, data);
            }
            EventPayload::Received { .. } => {
                log::warn!("MQTT: fragmented message dropped");
            }
            EventPayload::Error(e) => log::warn!("MQTT: client error {:?}", e),
            _ => {}
        })
    }
}

impl MqttTransport for MqttAdapter {
    #[cfg(target_os = "espidf")]
    fn start(&mut self, options: &ConnectOptions, inbox: SessionInbox) -> Result<(), SessionError> {
        self.stop();
        match Self::create_client(options, inbox) {
            Ok(client) => {
                self.client = Some(client);
                info!("MQTT: client started for {}", options.uri);
                Ok(())
            }
            Err(e) => {
                log::warn!("MQTT: client init failed: {}", e);
                Err(SessionError::ConnectFailed)
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn start(&mut self, options: &ConnectOptions, inbox: SessionInbox) -> Result<(), SessionError> {
        if self.sim.fail_start {
            warn!("MQTT(sim): start refused");
            return Err(SessionError::ConnectFailed);
        }
        self.sim.starts += 1;
        self.sim.options = Some(options.clone());
        self.sim.inbox = Some(inbox);
        info!("MQTT(sim): client started for {}", options.uri);
        Ok(())
    }

    fn stop(&mut self) {
        #[cfg(target_os = "espidf")]
        if self.client.take().is_some() {
            info!("MQTT: client destroyed");
        }
        #[cfg(not(target_os = "espidf"))]
        if self.sim.inbox.take().is_some() {
            self.sim.stops += 1;
            info!("MQTT(sim): client destroyed");
        }
    }

    #[cfg(target_os = "espidf")]
    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), SessionError> {
        use esp_idf_svc::mqtt::client::QoS;
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .enqueue(topic, QoS::AtMostOnce, retained, payload)
            .map(|_| ())
            .map_err(|_| SessionError::PublishFailed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), SessionError> {
        if self.sim.inbox.is_none() {
            return Err(SessionError::NotConnected);
        }
        self.sim.published.push(Published {
            topic: topic.into(),
            payload: payload.to_vec(),
            retained,
        });
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        use esp_idf_svc::mqtt::client::QoS;
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(|_| ())
            .map_err(|_| SessionError::SubscribeFailed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if self.sim.inbox.is_none() {
            return Err(SessionError::NotConnected);
        }
        self.sim.subscriptions.push(topic.into());
        Ok(())
    }
}

// ── Simulation helpers ────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl MqttAdapter {
    pub fn start_count(&self) -> usize {
        self.sim.starts
    }

    pub fn stop_count(&self) -> usize {
        self.sim.stops
    }

    /// Options passed to the most recent successful `start`.
    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.sim.options.clone()
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.sim.subscriptions
    }

    pub fn published(&self) -> &[Published] {
        &self.sim.published
    }

    /// Most recent publish to `topic`.
    pub fn published_to(&self, topic: &str) -> Option<&Published> {
        self.sim.published.iter().rev().find(|p| p.topic == topic)
    }

    /// Make subsequent `start` calls fail.
    pub fn set_start_failure(&mut self, fail: bool) {
        self.sim.fail_start = fail;
    }

    /// Broker accepted the current client.
    pub fn sim_accept(&self) {
        if let Some(inbox) = &self.sim.inbox {
            inbox.notify_connected();
        }
    }

    /// Broker dropped the current client.
    pub fn sim_drop(&self) {
        if let Some(inbox) = &self.sim.inbox {
            inbox.notify_disconnected();
        }
    }

    /// Deliver an inbound message to the current client.
    pub fn sim_deliver(&self, topic: &str, payload: &[u8]) -> bool {
        self.sim
            .inbox
            .as_ref()
            .is_some_and(|inbox| inbox.notify_message(topic, payload))
    }
}
