//! Integration tests for the DeviceService orchestrator.
//!
//! Bring-up sequencing, session liveness tracking, lazy reconnect pacing
//! and feature dispatch, all against simulated adapters.

use std::sync::{Arc, Mutex};

use meo_node::app::events::ServiceEvent;
use meo_node::app::identity::ConnectivityStatus;
use meo_node::app::ports::StoragePort;
use meo_node::app::provisioning::ProvisioningField;
use meo_node::app::service::{BringUp, WifiCredentials};
use meo_node::app::store;
use meo_node::error::{ConnectivityError, SessionError};

use crate::mock_hw::{
    MockNetwork, RecordingSink, TestService, build_service, provisioned_storage, seeded_storage,
    test_config,
};

fn online_service() -> (TestService, RecordingSink) {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    assert_eq!(service.begin(None, 0, &mut sink), BringUp::Connecting);
    service.session().transport().sim_accept();
    service.tick(10, &mut sink);
    assert!(service.is_session_live());
    (service, sink)
}

fn progress(service: &TestService) -> String {
    service
        .provisioning()
        .attributes()
        .sim_client_read(ProvisioningField::Progress)
        .unwrap_or_default()
        .to_string()
}

// ── Bring-up ──────────────────────────────────────────────────

#[test]
fn begin_with_stored_credentials_connects_session() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();

    assert_eq!(service.begin(None, 0, &mut sink), BringUp::Connecting);

    assert_eq!(service.network().joins, vec![("HomeNet".to_string(), "hunter22".to_string())]);
    assert!(sink.contains(&ServiceEvent::NetworkUp));
    assert!(sink.contains(&ServiceEvent::SessionConnecting { attempt: 1 }));
    assert!(!sink.contains(&ServiceEvent::WaitingForProvisioning));

    let opts = service.session().transport().last_options().unwrap();
    assert_eq!(opts.client_id, "meo-dev-1");
    assert_eq!(opts.username, "dev-1");
    assert_eq!(opts.password, "k1");
    assert!(service.provisioning().is_active(), "BLE keeps advertising");
}

#[test]
fn preset_credentials_win_over_stored_ones() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    let preset = WifiCredentials::new("Lab", "labpass1");

    service.begin(Some(&preset), 0, &mut sink);

    assert_eq!(service.network().joins, vec![("Lab".to_string(), "labpass1".to_string())]);
}

#[test]
fn begin_without_credentials_waits_for_provisioning() {
    let mut service = build_service(test_config(), seeded_storage(&[]), MockNetwork::new());
    let mut sink = RecordingSink::new();

    assert_eq!(service.begin(None, 0, &mut sink), BringUp::WaitingForProvisioning);

    assert!(service.network().joins.is_empty());
    assert!(sink.contains(&ServiceEvent::NetworkDown(Some(ConnectivityError::NoCredentials))));
    assert!(sink.contains(&ServiceEvent::WaitingForProvisioning));
    assert_eq!(service.session().transport().start_count(), 0);
    assert!(service.provisioning().is_active());
}

#[test]
fn failed_join_waits_for_provisioning() {
    let mut network = MockNetwork::new();
    network.fail_join = true;
    let mut service = build_service(test_config(), provisioned_storage(), network);
    let mut sink = RecordingSink::new();

    assert_eq!(service.begin(None, 0, &mut sink), BringUp::WaitingForProvisioning);
    assert!(sink.contains(&ServiceEvent::NetworkDown(Some(ConnectivityError::ConnectionFailed))));
    assert_eq!(progress(&service), "WiFi: disconnected, MQTT: disconnected");
}

#[test]
fn missing_identity_without_registration_waits() {
    let storage = seeded_storage(&[(store::KEY_WIFI_SSID, "HomeNet"), (store::KEY_WIFI_PASS, "pw")]);
    let mut service = build_service(test_config(), storage, MockNetwork::new());
    let mut sink = RecordingSink::new();

    assert_eq!(service.begin(None, 0, &mut sink), BringUp::WaitingForProvisioning);
    assert!(service.is_network_up());
    assert!(!service.identity().is_complete());
    assert_eq!(service.session().transport().start_count(), 0);
}

// ── Liveness and status ───────────────────────────────────────

#[test]
fn session_goes_live_on_tick() {
    let (service, sink) = online_service();

    assert!(sink.contains(&ServiceEvent::SessionLive));
    let t = service.session().transport();
    assert!(t.published_to("meo/dev-1/declare").is_some());
    assert_eq!(t.published_to("meo/dev-1/status").unwrap().payload, b"online");
    assert_eq!(progress(&service), "WiFi: connected, MQTT: connected");
}

#[test]
fn session_loss_is_reported_once() {
    let (mut service, mut sink) = online_service();
    sink.clear();

    service.session().transport().sim_drop();
    service.tick(20, &mut sink);
    service.tick(30, &mut sink);

    assert_eq!(sink.count(&ServiceEvent::SessionLost), 1);
    assert_eq!(progress(&service), "WiFi: connected, MQTT: disconnected");
}

#[test]
fn link_loss_updates_status() {
    let (mut service, mut sink) = online_service();
    sink.clear();

    service.network_mut().link_up = false;
    service.tick(20, &mut sink);

    assert!(sink.contains(&ServiceEvent::NetworkDown(None)));
    assert!(progress(&service).starts_with("WiFi: disconnected"));
}

#[test]
fn broker_reconnect_after_invoke_burst_redeclares() {
    let (mut service, mut sink) = online_service();
    let declares = |s: &TestService| {
        s.session()
            .transport()
            .published()
            .iter()
            .filter(|p| p.topic == "meo/dev-1/declare")
            .count()
    };
    assert_eq!(declares(&service), 1);

    let t = service.session().transport();
    for i in 0..8 {
        t.sim_deliver(&format!("meo/dev-1/feature/f{}/invoke", i), b"{}");
    }
    t.sim_drop();
    t.sim_accept();
    service.tick(20, &mut sink);
    service.tick(30, &mut sink);

    assert!(service.is_session_live());
    assert_eq!(service.session().transport().subscriptions().len(), 2);
    assert_eq!(declares(&service), 2);
    assert_eq!(service.connect_attempts(), 1);
}

// ── Lazy reconnect ────────────────────────────────────────────

#[test]
fn reconnect_attempts_are_paced() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);
    assert_eq!(service.session().transport().start_count(), 1);

    service.tick(100, &mut sink);
    service.tick(4_999, &mut sink);
    assert_eq!(service.session().transport().start_count(), 1);

    service.tick(5_000, &mut sink);
    assert_eq!(service.session().transport().start_count(), 2);
    assert!(sink.contains(&ServiceEvent::SessionConnecting { attempt: 2 }));
    assert_eq!(service.connect_attempts(), 2);
}

#[test]
fn zero_interval_retries_every_tick() {
    let mut config = test_config();
    config.gateway.reconnect_interval_ms = 0;
    let mut service = build_service(config, provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);

    service.tick(1, &mut sink);
    service.tick(2, &mut sink);
    assert_eq!(service.session().transport().start_count(), 3);
}

#[test]
fn no_reconnect_while_link_is_down() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);

    service.network_mut().link_up = false;
    service.tick(10_000, &mut sink);
    service.tick(20_000, &mut sink);
    assert_eq!(service.session().transport().start_count(), 1);
}

#[test]
fn live_session_is_not_reconnected() {
    let (mut service, mut sink) = online_service();
    service.tick(60_000, &mut sink);
    assert_eq!(service.session().transport().start_count(), 1);
}

#[test]
fn empty_broker_host_never_starts_transport() {
    let mut config = test_config();
    config.gateway.host.clear();
    let mut service = build_service(config, provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();

    service.begin(None, 0, &mut sink);
    service.tick(10_000, &mut sink);

    assert_eq!(service.session().transport().start_count(), 0);
    assert!(!sink.events.iter().any(|e| matches!(e, ServiceEvent::SessionConnecting { .. })));
}

// ── Features ──────────────────────────────────────────────────

#[test]
fn invoke_reaches_registered_handler() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    service
        .add_feature_method("turn_on_led", move |call, responder| {
            let num = |k| call.param(k).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
            let sum = num("first") + num("second");
            log.lock().unwrap().push(sum);
            responder
                .respond(true, Some(&format!("LED on, sum={}", sum)))
                .unwrap();
        })
        .unwrap();
    service.add_feature_event("humid_temp_update").unwrap();

    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);
    service.session().transport().sim_accept();
    service.tick(10, &mut sink);

    let declare = service.session().transport().published_to("meo/dev-1/declare").unwrap();
    let v: serde_json::Value = serde_json::from_slice(&declare.payload).unwrap();
    assert_eq!(v["methods"][0], "turn_on_led");
    assert_eq!(v["events"][0], "humid_temp_update");

    assert!(service.session().transport().sim_deliver(
        "meo/dev-1/feature/turn_on_led/invoke",
        br#"{"params":{"first":"2","second":"3"}}"#,
    ));
    service.tick(20, &mut sink);

    assert_eq!(*seen.lock().unwrap(), [5]);
    let resp = service
        .session()
        .transport()
        .published_to("meo/dev-1/event/feature_response")
        .unwrap();
    let v: serde_json::Value = serde_json::from_slice(&resp.payload).unwrap();
    assert_eq!(v["feature_name"], "turn_on_led");
    assert_eq!(v["device_id"], "dev-1");
    assert_eq!(v["success"], true);
    assert_eq!(v["message"], "LED on, sum=5");
}

#[test]
fn publish_event_requires_live_session() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    assert_eq!(
        service.publish_event("humid_temp_update", &[("temperature", "25")]),
        Err(SessionError::NotConnected)
    );

    let (mut service, _) = online_service();
    service
        .publish_event("humid_temp_update", &[("temperature", "25"), ("humidity", "50")])
        .unwrap();
    let p = service
        .session()
        .transport()
        .published_to("meo/dev-1/event/humid_temp_update")
        .unwrap();
    let v: serde_json::Value = serde_json::from_slice(&p.payload).unwrap();
    assert_eq!(v["temperature"], "25");
    assert_eq!(v["humidity"], "50");
}

// ── Maintenance ───────────────────────────────────────────────

#[test]
fn factory_reset_wipes_store_and_restarts() {
    let (mut service, _) = online_service();
    service.factory_reset().unwrap();

    assert_eq!(service.system().restarts, 1);
    assert!(!service.store().contains(store::KEY_WIFI_SSID));
    assert!(!service.store().backend().exists(store::NAMESPACE, store::KEY_DEVICE_ID));
    assert!(!service.is_session_live());
}

#[test]
fn status_starts_unknown_before_begin() {
    let service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    assert_eq!(
        service.provisioning().status_line(),
        format!("WiFi: {}, MQTT: {}", ConnectivityStatus::Unknown, ConnectivityStatus::Unknown)
    );
}
