//! Discovery and registration handshake.
//!
//! One blocking round trip that turns an anonymous device into one with a
//! gateway-issued `device_id` and `transmit_key`:
//!
//! 1. bind a TCP listener on the registration port,
//! 2. broadcast a JSON [`DiscoveryDescriptor`] once over UDP,
//! 3. accept one gateway connection within the accept window,
//! 4. read one `\n`-terminated JSON [`RegistrationReply`].
//!
//! The listener is bound before the broadcast so a fast gateway cannot
//! connect before anyone is listening. Nothing is retried here and nothing
//! is persisted; the caller owns both decisions. The whole exchange blocks
//! for at most `accept_timeout_ms + read_timeout_ms`, so it must not run on
//! the steady-state tick.

use core::fmt::Write as _;
use core::net::{Ipv4Addr, SocketAddrV4};
use std::io::{ErrorKind, Read};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::RegistrationConfig;
use crate::debug::{DebugTags, TAG_REG};
use crate::error::RegistrationError;

use super::identity::{ConnectionType, DeviceIdentity};
use super::ports::NetworkPort;
use super::registry::FeatureRegistry;

/// Token the gateway uses to recognise discovery datagrams.
pub const DISCOVERY_MAGIC: &str = "MEO3_DISCOVERY_V1";

/// Accept is polled at this cadence until the window closes.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Replies longer than this are treated as malformed.
const MAX_REPLY_LEN: usize = 1024;

// ───────────────────────────────────────────────────────────────
// Wire entities
// ───────────────────────────────────────────────────────────────

/// Self-description broadcast to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDescriptor {
    pub magic: String,
    pub model: String,
    pub manufacturer: String,
    #[serde(rename = "connectionType")]
    pub connection_type: ConnectionType,
    /// `AA:BB:CC:DD:EE:FF`
    pub mac: String,
    pub ip: String,
    pub listen_port: u16,
    #[serde(rename = "featureEvents")]
    pub feature_events: Vec<String>,
    #[serde(rename = "featureMethods")]
    pub feature_methods: Vec<String>,
}

impl DiscoveryDescriptor {
    pub fn new(
        identity: &DeviceIdentity,
        connection_type: ConnectionType,
        registry: &FeatureRegistry,
        mac: [u8; 6],
        ip: Ipv4Addr,
        listen_port: u16,
    ) -> Self {
        Self {
            magic: DISCOVERY_MAGIC.into(),
            model: identity.model.clone(),
            manufacturer: identity.manufacturer.clone(),
            connection_type,
            mac: format_mac(&mac),
            ip: ip.to_string(),
            listen_port,
            feature_events: registry.events().map(String::from).collect(),
            feature_methods: registry.method_names().map(String::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, RegistrationError> {
        serde_json::to_string(self).map_err(|_| RegistrationError::Encode)
    }
}

/// The gateway's answer: the identity to persist.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistrationReply {
    pub device_id: String,
    pub transmit_key: String,
}

impl RegistrationReply {
    /// Parse one reply line. Both fields must be present and strings.
    pub fn parse(line: &str) -> Result<Self, RegistrationError> {
        serde_json::from_str(line.trim_end_matches(['\r', '\n']))
            .map_err(|_| RegistrationError::MalformedResponse)
    }
}

/// Uppercase, colon-separated MAC.
pub fn format_mac(mac: &[u8; 6]) -> String {
    let mut s = String::with_capacity(17);
    for (i, b) in mac.iter().enumerate() {
        if i > 0 {
            s.push(':');
        }
        let _ = write!(s, "{:02X}", b);
    }
    s
}

// ───────────────────────────────────────────────────────────────
// Client
// ───────────────────────────────────────────────────────────────

pub struct RegistrationClient {
    settings: RegistrationConfig,
    connection_type: ConnectionType,
    debug: DebugTags,
}

impl RegistrationClient {
    pub fn new(settings: RegistrationConfig, connection_type: ConnectionType, debug: DebugTags) -> Self {
        Self {
            settings,
            connection_type,
            debug,
        }
    }

    /// Obtain an identity unless `identity` already has one.
    ///
    /// Returns the existing pair untouched when complete; otherwise runs one
    /// broadcast-then-listen exchange.
    pub fn register_if_needed(
        &self,
        identity: &DeviceIdentity,
        registry: &FeatureRegistry,
        network: &impl NetworkPort,
    ) -> Result<RegistrationReply, RegistrationError> {
        if identity.is_complete() {
            return Ok(RegistrationReply {
                device_id: identity.device_id.clone(),
                transmit_key: identity.transmit_key.clone(),
            });
        }

        let (mac, ip) = match (network.is_connected(), network.mac_address(), network.ipv4()) {
            (true, Some(mac), Some(ip)) => (mac, ip),
            _ => {
                warn!("Reg: no usable network interface");
                return Err(RegistrationError::NoNetworkInterface);
            }
        };

        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.settings.listen_port))
            .map_err(|e| {
                warn!("Reg: cannot bind TCP {}: {}", self.settings.listen_port, e);
                RegistrationError::Socket
            })?;
        let listen_port = listener
            .local_addr()
            .map_err(|_| RegistrationError::Socket)?
            .port();

        let descriptor =
            DiscoveryDescriptor::new(identity, self.connection_type, registry, mac, ip, listen_port);
        self.broadcast(&descriptor)?;

        info!("Reg: listening for gateway on TCP {}", listen_port);
        let stream = self.accept(&listener)?;
        let line = self.read_line(stream)?;
        if self.debug.enabled(TAG_REG) {
            debug!("Reg: received '{}'", line);
        }

        let reply = RegistrationReply::parse(&line).inspect_err(|_| {
            warn!("Reg: reply missing device_id or transmit_key");
        })?;
        info!("Reg: registered as {}", reply.device_id);
        Ok(reply)
    }

    fn broadcast(&self, descriptor: &DiscoveryDescriptor) -> Result<(), RegistrationError> {
        let json = descriptor.to_json()?;
        let target = SocketAddrV4::new(self.settings.broadcast_addr, self.settings.discovery_port);

        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|_| RegistrationError::Socket)?;
        socket
            .set_broadcast(true)
            .map_err(|_| RegistrationError::Socket)?;

        match socket.send_to(json.as_bytes(), target) {
            Ok(_) => {
                info!("Reg: discovery sent to {} ({} bytes)", target, json.len());
                Ok(())
            }
            Err(e) => {
                warn!("Reg: broadcast to {} failed: {}", target, e);
                Err(RegistrationError::BroadcastFailed)
            }
        }
    }

    fn accept(&self, listener: &TcpListener) -> Result<TcpStream, RegistrationError> {
        listener
            .set_nonblocking(true)
            .map_err(|_| RegistrationError::Socket)?;

        let window = Duration::from_millis(u64::from(self.settings.accept_timeout_ms));
        let started = Instant::now();
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("Reg: gateway connected from {}", peer);
                    stream
                        .set_nonblocking(false)
                        .map_err(|_| RegistrationError::Socket)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= window {
                        warn!("Reg: no gateway within {} ms", self.settings.accept_timeout_ms);
                        return Err(RegistrationError::AcceptTimeout);
                    }
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!("Reg: accept failed: {}", e);
                    return Err(RegistrationError::Socket);
                }
            }
        }
    }

    /// Read until `\n`. EOF, a read timeout or an overlong reply before the
    /// terminator are all failures.
    fn read_line(&self, mut stream: TcpStream) -> Result<String, RegistrationError> {
        let timeout = Duration::from_millis(u64::from(self.settings.read_timeout_ms.max(1)));
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|_| RegistrationError::Socket)?;

        let mut received: Vec<u8> = Vec::with_capacity(128);
        let mut chunk = [0u8; 128];
        loop {
            let n = match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Reg: read ended: {}", e);
                    break;
                }
            };
            if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                received.extend_from_slice(&chunk[..pos]);
                return String::from_utf8(received).map_err(|_| RegistrationError::MalformedResponse);
            }
            received.extend_from_slice(&chunk[..n]);
            if received.len() > MAX_REPLY_LEN {
                warn!("Reg: reply exceeds {} bytes", MAX_REPLY_LEN);
                return Err(RegistrationError::MalformedResponse);
            }
        }

        warn!("Reg: incomplete response ({} bytes, no newline)", received.len());
        Err(RegistrationError::IncompleteResponse)
    }
}
