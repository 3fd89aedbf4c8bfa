//! MQTT session layer.
//!
//! Owns the transport handle and everything that happens on top of it:
//! connect options, the `meo/{id}/…` topic scheme, the declare manifest and
//! routing of `feature/{name}/invoke` messages to registered handlers.
//!
//! ```text
//!  transport task ──notify_*──▶ SessionInbox ──poll()──▶ Session ──▶ FeatureRegistry
//!                                (flags + channel)          │
//!                                                           └──publish──▶ transport
//! ```
//!
//! `connect()` only hands options to the transport. Liveness is learned
//! from the connected/disconnected notifications the transport pushes into
//! the [`SessionInbox`]; the follow-up work (subscribe, online status,
//! declare) runs in [`Session::poll`] on the tick loop. No reconnection
//! happens here; the orchestrator decides when to call `connect()` again.

use std::collections::BTreeMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{GatewayConfig, MAX_PAYLOAD_LEN};
use crate::debug::{DebugTags, TAG_MQTT};
use crate::error::SessionError;

use super::identity::ConnectionType;
use super::ports::MqttTransport;
use super::registry::{FeatureCall, FeatureRegistry};

/// Longest inbound topic carried through the inbox.
pub const MAX_TOPIC_LEN: usize = 128;

/// Longest accepted feature name in an invoke topic.
pub const MAX_FEATURE_NAME_LEN: usize = 63;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

const INBOX_DEPTH: usize = 8;
const FEATURE_MARKER: &str = "/feature/";
const INVOKE_MARKER: &str = "/invoke";
const NO_HANDLER_MESSAGE: &str = "No handler registered";

// ───────────────────────────────────────────────────────────────
// Topic scheme
// ───────────────────────────────────────────────────────────────

/// Topic builder for one device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(device_id: &str) -> Self {
        Self {
            prefix: format!("meo/{}", device_id),
        }
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.prefix)
    }

    pub fn declare(&self) -> String {
        format!("{}/declare", self.prefix)
    }

    pub fn event(&self, name: &str) -> String {
        format!("{}/event/{}", self.prefix, name)
    }

    pub fn feature_response(&self) -> String {
        self.event("feature_response")
    }

    /// Wildcard filter for every invocable feature.
    pub fn invoke_filter(&self) -> String {
        format!("{}/feature/+/invoke", self.prefix)
    }
}

/// Extract `{name}` from `…/feature/{name}/invoke`.
///
/// The name runs from the first `/feature/` to the next `/invoke` after
/// it. `None` if either marker is missing or the name is empty or longer
/// than [`MAX_FEATURE_NAME_LEN`].
///
/// An `/invoke` segment before `/feature/` is skipped rather than treated
/// as out of order, so `meo/invoke/feature/x/invoke` routes to `x`. Ids
/// containing `invoke` would otherwise make every invoke unroutable.
pub fn parse_invoke_topic(topic: &str) -> Option<&str> {
    let start = topic.find(FEATURE_MARKER)? + FEATURE_MARKER.len();
    let len = topic[start..].find(INVOKE_MARKER)?;
    let name = &topic[start..start + len];
    if name.is_empty() || name.len() > MAX_FEATURE_NAME_LEN {
        return None;
    }
    Some(name)
}

/// Decode an invoke body `{"params":{…}}`, keeping only string values.
///
/// A body without `params` yields an empty map; a body that is not JSON
/// yields `None`.
pub fn decode_params(payload: &[u8]) -> Option<BTreeMap<String, String>> {
    let root: serde_json::Value = serde_json::from_slice(payload).ok()?;
    let mut params = BTreeMap::new();
    if let Some(obj) = root.get("params").and_then(serde_json::Value::as_object) {
        for (key, value) in obj {
            if let Some(s) = value.as_str() {
                params.insert(key.clone(), s.into());
            }
        }
    }
    Some(params)
}

// ───────────────────────────────────────────────────────────────
// Wire payloads
// ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct DeclareInfo<'a> {
    model: &'a str,
    manufacturer: &'a str,
    connection: &'static str,
}

#[derive(Serialize)]
struct Declare<'a> {
    device_info: DeclareInfo<'a>,
    events: Vec<&'a str>,
    methods: Vec<&'a str>,
}

#[derive(Serialize)]
struct FeatureResponse<'a> {
    feature_name: &'a str,
    device_id: &'a str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Serialise the capability manifest published after every connect.
pub fn declare_payload(
    model: &str,
    manufacturer: &str,
    connection: ConnectionType,
    registry: &FeatureRegistry,
) -> Result<String, SessionError> {
    let declare = Declare {
        device_info: DeclareInfo {
            model,
            manufacturer,
            connection: connection.label(),
        },
        events: registry.events().collect(),
        methods: registry.method_names().collect(),
    };
    serde_json::to_string(&declare).map_err(|_| SessionError::Encode)
}

fn event_payload(fields: &[(&str, &str)]) -> Result<String, SessionError> {
    let map: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(k, v)| ((*k).into(), serde_json::Value::String((*v).into())))
        .collect();
    serde_json::to_string(&map).map_err(|_| SessionError::Encode)
}

fn publish_live(
    transport: &mut dyn MqttTransport,
    live: bool,
    topic: &str,
    payload: &[u8],
    retained: bool,
) -> Result<(), SessionError> {
    if !live {
        return Err(SessionError::NotConnected);
    }
    transport
        .publish(topic, payload, retained)
        .map_err(|_| SessionError::PublishFailed)
}

fn publish_feature_response(
    transport: &mut dyn MqttTransport,
    live: bool,
    topics: &Topics,
    call: &FeatureCall,
    success: bool,
    message: Option<&str>,
) -> Result<(), SessionError> {
    let body = FeatureResponse {
        feature_name: &call.feature_name,
        device_id: &call.device_id,
        success,
        message,
    };
    let json = serde_json::to_string(&body).map_err(|_| SessionError::Encode)?;
    publish_live(transport, live, &topics.feature_response(), json.as_bytes(), false)
}

// ───────────────────────────────────────────────────────────────
// Connect options
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

/// Everything a transport needs to open one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// `mqtt://host:port`
    pub uri: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub last_will: Option<LastWill>,
    pub keep_alive_secs: u16,
    pub network_timeout_ms: u32,
    pub buffer_size: usize,
}

fn fallback_client_id() -> String {
    let nonce = RandomState::new().hash_one(0u8) as u32;
    format!("meo-device-{}", nonce)
}

// ───────────────────────────────────────────────────────────────
// Cross-context inbox
// ───────────────────────────────────────────────────────────────

/// One inbound message, queued for the tick loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
}

/// Shared by the transport callback and the [`Session`].
///
/// Connection transitions are flags, not queue entries, so a full message
/// queue can never swallow one. The liveness flag is updated immediately
/// from the callback; [`Session::poll`] consumes the pending transitions
/// before draining messages.
#[derive(Clone)]
pub struct SessionInbox {
    live: Arc<AtomicBool>,
    pending_connect: Arc<AtomicBool>,
    pending_disconnect: Arc<AtomicBool>,
    queue: Arc<Channel<CriticalSectionRawMutex, InboundMessage, INBOX_DEPTH>>,
}

impl Default for SessionInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionInbox {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(false)),
            pending_connect: Arc::new(AtomicBool::new(false)),
            pending_disconnect: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(Channel::new()),
        }
    }

    pub fn notify_connected(&self) {
        self.live.store(true, Ordering::Release);
        self.pending_connect.store(true, Ordering::Release);
    }

    pub fn notify_disconnected(&self) {
        self.live.store(false, Ordering::Release);
        self.pending_disconnect.store(true, Ordering::Release);
    }

    /// Queue an inbound message. Oversized topics or payloads are dropped,
    /// as is anything arriving while the queue is full.
    pub fn notify_message(&self, topic: &str, payload: &[u8]) -> bool {
        let Ok(topic) = heapless::String::try_from(topic) else {
            warn!("Session: topic too long ({} bytes), dropped", topic.len());
            return false;
        };
        let Ok(payload) = heapless::Vec::from_slice(payload) else {
            warn!("Session: payload too large ({} bytes), dropped", payload.len());
            return false;
        };
        if self.queue.try_send(InboundMessage { topic, payload }).is_err() {
            warn!("Session: inbox full, message dropped");
            return false;
        }
        true
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn take_connected(&self) -> bool {
        self.pending_connect.swap(false, Ordering::AcqRel)
    }

    fn take_disconnected(&self) -> bool {
        self.pending_disconnect.swap(false, Ordering::AcqRel)
    }

    fn pop(&self) -> Option<InboundMessage> {
        self.queue.try_receive().ok()
    }

    /// Forget liveness and anything queued by a previous client.
    fn reset(&self) {
        self.live.store(false, Ordering::Release);
        self.pending_connect.store(false, Ordering::Release);
        self.pending_disconnect.store(false, Ordering::Release);
        self.queue.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// Responder
// ───────────────────────────────────────────────────────────────

/// Handed to a feature handler for the duration of one call.
pub struct Responder<'a> {
    transport: &'a mut dyn MqttTransport,
    topics: &'a Topics,
    call: &'a FeatureCall,
    live: bool,
    responded: bool,
}

impl<'a> Responder<'a> {
    pub fn new(
        transport: &'a mut dyn MqttTransport,
        topics: &'a Topics,
        call: &'a FeatureCall,
        live: bool,
    ) -> Self {
        Self {
            transport,
            topics,
            call,
            live,
            responded: false,
        }
    }

    /// Publish the `feature_response` for this call.
    pub fn respond(&mut self, success: bool, message: Option<&str>) -> Result<(), SessionError> {
        self.responded = true;
        publish_feature_response(&mut *self.transport, self.live, self.topics, self.call, success, message)
    }

    /// Publish an event while handling the call.
    pub fn publish_event(&mut self, name: &str, fields: &[(&str, &str)]) -> Result<(), SessionError> {
        let json = event_payload(fields)?;
        publish_live(&mut *self.transport, self.live, &self.topics.event(name), json.as_bytes(), false)
    }

    pub fn has_responded(&self) -> bool {
        self.responded
    }
}

// ───────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────

/// What one [`Session::poll`] observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionActivity {
    /// A connected notification was handled (declare published).
    pub connected: bool,
    pub disconnected: bool,
    /// Invoke messages routed, handled or not.
    pub invocations: usize,
}

pub struct Session<T: MqttTransport> {
    transport: T,
    gateway: GatewayConfig,
    model: String,
    manufacturer: String,
    connection: ConnectionType,

    device_id: String,
    transmit_key: String,
    topics: Topics,
    last_will: Option<LastWill>,

    inbox: SessionInbox,
    started: bool,
    debug: DebugTags,
}

impl<T: MqttTransport> Session<T> {
    pub fn new(
        transport: T,
        gateway: GatewayConfig,
        model: &str,
        manufacturer: &str,
        connection: ConnectionType,
        debug: DebugTags,
    ) -> Self {
        Self {
            transport,
            gateway,
            model: model.into(),
            manufacturer: manufacturer.into(),
            connection,
            device_id: String::new(),
            transmit_key: String::new(),
            topics: Topics::new(""),
            last_will: None,
            inbox: SessionInbox::new(),
            started: false,
            debug,
        }
    }

    // ── Configuration (applied at next connect) ───────────────

    pub fn configure(&mut self, host: &str, port: u16) {
        self.gateway.host = host.into();
        self.gateway.port = port;
    }

    pub fn set_credentials(&mut self, device_id: &str, transmit_key: &str) {
        self.device_id = device_id.into();
        self.transmit_key = transmit_key.into();
        self.topics = Topics::new(device_id);
    }

    pub fn set_last_will(&mut self, topic: &str, payload: &str) {
        self.last_will = Some(LastWill {
            topic: topic.into(),
            payload: payload.into(),
            retained: true,
        });
    }

    pub fn client_id(&self) -> String {
        if self.device_id.is_empty() {
            fallback_client_id()
        } else {
            format!("meo-{}", self.device_id)
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let last_will = self.last_will.clone().or_else(|| {
            (!self.device_id.is_empty()).then(|| LastWill {
                topic: self.topics.status(),
                payload: STATUS_OFFLINE.into(),
                retained: true,
            })
        });
        ConnectOptions {
            uri: format!("mqtt://{}:{}", self.gateway.host, self.gateway.port),
            client_id: self.client_id(),
            username: self.device_id.clone(),
            password: self.transmit_key.clone(),
            last_will,
            keep_alive_secs: self.gateway.keep_alive_secs,
            network_timeout_ms: self.gateway.network_timeout_ms,
            buffer_size: self.gateway.buffer_size,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Hand a fresh connection attempt to the transport.
    ///
    /// `Ok` means the attempt was accepted, not that the session is live.
    /// Any previous client is torn down first.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        if self.gateway.host.is_empty() {
            warn!("Session: connect refused, broker host is empty");
            return Err(SessionError::EmptyHost);
        }
        if self.started {
            self.transport.stop();
            self.started = false;
        }
        self.inbox.reset();

        let options = self.connect_options();
        info!("Session: connecting to {} as {}", options.uri, options.client_id);
        if let Err(e) = self.transport.start(&options, self.inbox.clone()) {
            warn!("Session: transport start failed: {}", e);
            return Err(SessionError::ConnectFailed);
        }
        self.started = true;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.started {
            self.transport.stop();
            self.started = false;
        }
        self.inbox.reset();
        info!("Session: disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.started && self.inbox.is_live()
    }

    /// Handle pending connection transitions, then every queued message.
    pub fn poll(&mut self, registry: &mut FeatureRegistry) -> SessionActivity {
        let mut activity = SessionActivity::default();
        if self.inbox.take_disconnected() {
            warn!("Session: connection lost");
            activity.disconnected = true;
        }
        // A connect already undone by a later disconnect needs no follow-up.
        if self.inbox.take_connected() && self.inbox.is_live() {
            info!("Session: connected");
            self.on_connected(registry);
            activity.connected = true;
        }
        while let Some(InboundMessage { topic, payload }) = self.inbox.pop() {
            if self.route(&topic, &payload, registry) {
                activity.invocations += 1;
            }
        }
        activity
    }

    fn on_connected(&mut self, registry: &FeatureRegistry) {
        let filter = self.topics.invoke_filter();
        match self.subscribe(&filter) {
            Ok(()) => {
                if self.debug.enabled(TAG_MQTT) {
                    debug!("Session: subscribed to {}", filter);
                }
            }
            Err(e) => warn!("Session: subscribe {} failed: {}", filter, e),
        }
        if let Err(e) = self.publish_status(true) {
            warn!("Session: online status failed: {}", e);
        }
        if let Err(e) = self.declare(registry) {
            warn!("Session: declare failed: {}", e);
        }
    }

    /// Dispatch one inbound message. Returns `true` if it was an invoke.
    fn route(&mut self, topic: &str, payload: &[u8], registry: &mut FeatureRegistry) -> bool {
        let Some(name) = parse_invoke_topic(topic) else {
            if self.debug.enabled(TAG_MQTT) {
                debug!("Session: ignoring message on {}", topic);
            }
            return false;
        };
        let Some(params) = decode_params(payload) else {
            warn!("Session: invoke '{}' has malformed body, dropped", name);
            return false;
        };

        let call = FeatureCall {
            device_id: self.device_id.clone(),
            feature_name: name.into(),
            params,
        };
        if self.debug.enabled(TAG_MQTT) {
            debug!("Session: invoke {} with {} params", call.feature_name, call.params.len());
        }

        let live = self.is_connected();
        let mut responder = Responder::new(&mut self.transport, &self.topics, &call, live);
        if !registry.dispatch(&call, &mut responder) {
            warn!("Session: no handler for '{}'", call.feature_name);
            if let Err(e) = responder.respond(false, Some(NO_HANDLER_MESSAGE)) {
                warn!("Session: negative response failed: {}", e);
            }
        }
        true
    }

    // ── Publishing ────────────────────────────────────────────

    /// QoS 0 publish; fails with `NotConnected` while the session is down.
    pub fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), SessionError> {
        let live = self.is_connected();
        publish_live(&mut self.transport, live, topic, payload, retained)
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.transport
            .subscribe(topic)
            .map_err(|_| SessionError::SubscribeFailed)
    }

    /// Publish the capability manifest to `meo/{id}/declare`.
    pub fn declare(&mut self, registry: &FeatureRegistry) -> Result<(), SessionError> {
        let json = declare_payload(&self.model, &self.manufacturer, self.connection, registry)?;
        if self.debug.enabled(TAG_MQTT) {
            debug!("Session: declare len={}", json.len());
        }
        let topic = self.topics.declare();
        self.publish(&topic, json.as_bytes(), false)
    }

    /// Retained `online` / `offline` on the status topic.
    pub fn publish_status(&mut self, online: bool) -> Result<(), SessionError> {
        let payload = if online { STATUS_ONLINE } else { STATUS_OFFLINE };
        let topic = self.topics.status();
        self.publish(&topic, payload.as_bytes(), true)
    }

    /// Flat string map to `meo/{id}/event/{name}`.
    pub fn publish_event(&mut self, name: &str, fields: &[(&str, &str)]) -> Result<(), SessionError> {
        let json = event_payload(fields)?;
        if self.debug.enabled(TAG_MQTT) {
            debug!("Session: event {} len={}", name, json.len());
        }
        let topic = self.topics.event(name);
        self.publish(&topic, json.as_bytes(), false)
    }

    /// Answer `call` outside its handler (e.g. after deferred work).
    pub fn send_feature_response(
        &mut self,
        call: &FeatureCall,
        success: bool,
        message: Option<&str>,
    ) -> Result<(), SessionError> {
        let live = self.is_connected();
        publish_feature_response(&mut self.transport, live, &self.topics, call, success, message)
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Handle for the transport callback context.
    pub fn inbox(&self) -> SessionInbox {
        self.inbox.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
