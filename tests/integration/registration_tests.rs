//! Integration tests for discovery and registration over loopback sockets.
//!
//! A scripted gateway thread receives the discovery datagram, then
//! connects back to the advertised TCP port and writes a reply.

use core::net::Ipv4Addr;
use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use meo_node::app::events::ServiceEvent;
use meo_node::app::identity::{ConnectionType, DeviceIdentity};
use meo_node::app::registration::{DISCOVERY_MAGIC, RegistrationClient};
use meo_node::app::registry::FeatureRegistry;
use meo_node::app::service::BringUp;
use meo_node::app::store;
use meo_node::config::{DeviceConfig, FeatureLimits, RegistrationConfig};
use meo_node::debug::DebugTags;
use meo_node::error::RegistrationError;

use crate::mock_hw::{MockNetwork, RecordingSink, build_service, seeded_storage, test_config};

/// Gateway stand-in. Returns the UDP port to target and a handle yielding
/// the decoded descriptor.
fn spawn_gateway(reply: Option<&'static [u8]>) -> (u16, JoinHandle<Option<serde_json::Value>>) {
    let udp = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    udp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let port = udp.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        let (n, _) = udp.recv_from(&mut buf).ok()?;
        let descriptor: serde_json::Value = serde_json::from_slice(&buf[..n]).ok()?;
        if let Some(reply) = reply {
            let listen_port = descriptor["listen_port"].as_u64()? as u16;
            let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, listen_port)).ok()?;
            stream.write_all(reply).ok()?;
        }
        Some(descriptor)
    });
    (port, handle)
}

fn registration_config(discovery_port: u16, accept_timeout_ms: u32) -> DeviceConfig {
    let mut config = test_config();
    config.registration = RegistrationConfig {
        enabled: true,
        discovery_port,
        listen_port: 0,
        broadcast_addr: Ipv4Addr::LOCALHOST,
        accept_timeout_ms,
        read_timeout_ms: 500,
    };
    config
}

fn wifi_only_storage() -> meo_node::adapters::nvs::NvsAdapter {
    seeded_storage(&[(store::KEY_WIFI_SSID, "HomeNet"), (store::KEY_WIFI_PASS, "pw")])
}

#[test]
fn registration_persists_identity_and_connects() {
    let (port, gateway) = spawn_gateway(Some(b"{\"device_id\":\"dev-1\",\"transmit_key\":\"k1\"}\n"));
    let mut service = build_service(
        registration_config(port, 3_000),
        wifi_only_storage(),
        MockNetwork::loopback(),
    );
    service.add_feature_method("turn_on_led", |_, _| {}).unwrap();
    service.add_feature_event("humid_temp_update").unwrap();
    let mut sink = RecordingSink::new();

    assert_eq!(service.begin(None, 0, &mut sink), BringUp::Connecting);

    assert!(sink.contains(&ServiceEvent::Registered { device_id: "dev-1".into() }));
    assert_eq!(service.store().load_string(store::KEY_DEVICE_ID).as_deref(), Some("dev-1"));
    assert_eq!(service.store().load_string(store::KEY_TX_KEY).as_deref(), Some("k1"));
    assert_eq!(service.session().transport().last_options().unwrap().username, "dev-1");

    let d = gateway.join().unwrap().expect("descriptor received");
    assert_eq!(d["magic"], DISCOVERY_MAGIC);
    assert_eq!(d["model"], "DIY Sensor");
    assert_eq!(d["manufacturer"], "ThingAI Lab");
    assert_eq!(d["connectionType"], 0);
    assert_eq!(d["mac"], "24:6F:28:01:02:03");
    assert_eq!(d["ip"], "127.0.0.1");
    assert_eq!(d["featureMethods"][0], "turn_on_led");
    assert_eq!(d["featureEvents"][0], "humid_temp_update");
}

#[test]
fn silent_gateway_times_out_without_touching_identity() {
    let (port, gateway) = spawn_gateway(None);
    let mut service = build_service(
        registration_config(port, 200),
        wifi_only_storage(),
        MockNetwork::loopback(),
    );
    let mut sink = RecordingSink::new();

    assert_eq!(service.begin(None, 0, &mut sink), BringUp::WaitingForProvisioning);

    assert!(sink.contains(&ServiceEvent::RegistrationFailed(RegistrationError::AcceptTimeout)));
    assert!(!service.store().contains(store::KEY_DEVICE_ID));
    assert!(!service.identity().is_complete());
    assert_eq!(service.session().transport().start_count(), 0);
    assert!(gateway.join().unwrap().is_some());
}

#[test]
fn reply_without_transmit_key_is_rejected() {
    let (port, gateway) = spawn_gateway(Some(b"{\"device_id\":\"dev-1\"}\n"));
    let mut service = build_service(
        registration_config(port, 3_000),
        wifi_only_storage(),
        MockNetwork::loopback(),
    );
    let mut sink = RecordingSink::new();

    service.begin(None, 0, &mut sink);

    assert!(sink.contains(&ServiceEvent::RegistrationFailed(RegistrationError::MalformedResponse)));
    assert!(!service.store().contains(store::KEY_DEVICE_ID));
    gateway.join().unwrap();
}

#[test]
fn reply_without_newline_is_incomplete() {
    let (port, gateway) = spawn_gateway(Some(b"{\"device_id\":\"dev-1\",\"transmit_key\":\"k1\"}"));
    let mut service = build_service(
        registration_config(port, 3_000),
        wifi_only_storage(),
        MockNetwork::loopback(),
    );
    let mut sink = RecordingSink::new();

    service.begin(None, 0, &mut sink);

    assert!(sink.contains(&ServiceEvent::RegistrationFailed(RegistrationError::IncompleteResponse)));
    assert!(!service.identity().is_complete());
    gateway.join().unwrap();
}

#[test]
fn complete_identity_skips_the_handshake() {
    let client = RegistrationClient::new(RegistrationConfig::default(), ConnectionType::Lan, DebugTags::default());
    let registry = FeatureRegistry::new(FeatureLimits::default());
    let mut identity = DeviceIdentity::new("M", "V");
    identity.device_id = "dev-7".into();
    identity.transmit_key = "k7".into();

    let reply = client
        .register_if_needed(&identity, &registry, &MockNetwork::new())
        .unwrap();
    assert_eq!(reply.device_id, "dev-7");
    assert_eq!(reply.transmit_key, "k7");
}

#[test]
fn link_down_reports_no_interface() {
    let client = RegistrationClient::new(RegistrationConfig::default(), ConnectionType::Lan, DebugTags::default());
    let registry = FeatureRegistry::new(FeatureLimits::default());
    let identity = DeviceIdentity::new("M", "V");

    assert_eq!(
        client.register_if_needed(&identity, &registry, &MockNetwork::new()),
        Err(RegistrationError::NoNetworkInterface)
    );
}
