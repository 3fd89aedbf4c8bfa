//! Integration tests for the BLE provisioning flow.
//!
//! Client writes enter through the provisioning inbox (as the GATT
//! callback would deliver them) and are applied on the orchestrator tick.

use meo_node::app::events::ServiceEvent;
use meo_node::app::provisioning::{ProvisioningField, ProvisioningState};
use meo_node::app::service::BringUp;
use meo_node::app::store;

use crate::mock_hw::{
    MockNetwork, RecordingSink, build_service, provisioned_storage, seeded_storage, test_config,
};

#[test]
fn credentials_over_ble_schedule_one_restart() {
    let mut service = build_service(test_config(), seeded_storage(&[]), MockNetwork::new());
    let mut sink = RecordingSink::new();
    assert_eq!(service.begin(None, 0, &mut sink), BringUp::WaitingForProvisioning);

    let inbox = service.provisioning().inbox().clone();
    assert!(inbox.push_write(ProvisioningField::NetworkName, b"  HomeNet\r\n"));
    assert!(inbox.push_write(ProvisioningField::NetworkSecret, b"hunter22"));
    service.tick(1_000, &mut sink);

    assert!(sink.contains(&ServiceEvent::RestartScheduled { at_ms: 1_300 }));
    assert_eq!(service.provisioning().state(), ProvisioningState::FinalizeScheduled);
    assert_eq!(service.store().load_string(store::KEY_WIFI_SSID).as_deref(), Some("HomeNet"));
    assert_eq!(service.store().load_string(store::KEY_WIFI_PASS).as_deref(), Some("hunter22"));
    assert_eq!(
        service.provisioning().attributes().sim_client_read(ProvisioningField::NetworkName),
        Some("HomeNet")
    );

    service.tick(1_299, &mut sink);
    assert_eq!(service.system().restarts, 0);
    service.tick(1_300, &mut sink);
    assert!(sink.contains(&ServiceEvent::RestartRequested));
    assert_eq!(service.system().restarts, 1);

    service.tick(2_000, &mut sink);
    assert_eq!(service.system().restarts, 1, "restart runs exactly once");
}

#[test]
fn rewriting_credentials_does_not_reschedule() {
    let mut service = build_service(test_config(), seeded_storage(&[]), MockNetwork::new());
    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);

    let inbox = service.provisioning().inbox().clone();
    inbox.push_write(ProvisioningField::NetworkName, b"net");
    inbox.push_write(ProvisioningField::NetworkSecret, b"pw");
    service.tick(10, &mut sink);
    inbox.push_write(ProvisioningField::NetworkName, b"net2");
    service.tick(20, &mut sink);

    let scheduled = sink
        .events
        .iter()
        .filter(|e| matches!(e, ServiceEvent::RestartScheduled { .. }))
        .count();
    assert_eq!(scheduled, 1);
    assert_eq!(service.provisioning().restart_at(), Some(310));
}

#[test]
fn identity_written_over_ble_enables_session() {
    let storage = seeded_storage(&[(store::KEY_WIFI_SSID, "HomeNet"), (store::KEY_WIFI_PASS, "pw")]);
    let mut service = build_service(test_config(), storage, MockNetwork::new());
    let mut sink = RecordingSink::new();
    assert_eq!(service.begin(None, 0, &mut sink), BringUp::WaitingForProvisioning);

    let inbox = service.provisioning().inbox().clone();
    inbox.push_write(ProvisioningField::DeviceId, b"dev-9");
    inbox.push_write(ProvisioningField::SessionKey, b"k9\n");
    service.tick(100, &mut sink);

    assert!(service.identity().is_complete());
    assert_eq!(service.identity().transmit_key, "k9");
    assert_eq!(service.session().transport().start_count(), 1);
    let opts = service.session().transport().last_options().unwrap();
    assert_eq!(opts.username, "dev-9");
    assert_eq!(opts.client_id, "meo-dev-9");
    assert_eq!(service.provisioning().restart_at(), None);
}

#[test]
fn stored_values_seed_readable_attributes() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);

    let ble = service.provisioning().attributes();
    assert_eq!(ble.advertised_name(), "MEO-Provision");
    assert_eq!(ble.sim_client_read(ProvisioningField::NetworkName), Some("HomeNet"));
    assert_eq!(ble.sim_client_read(ProvisioningField::DeviceId), Some("dev-1"));
    assert_eq!(ble.sim_client_read(ProvisioningField::Model), Some("DIY Sensor"));
    assert_eq!(ble.sim_client_read(ProvisioningField::Manufacturer), Some("ThingAI Lab"));
    assert_eq!(ble.sim_client_read(ProvisioningField::NetworkSecret), None);
    assert_eq!(ble.sim_client_read(ProvisioningField::SessionKey), None);
}

#[test]
fn progress_is_notified_on_its_interval() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);

    service.tick(0, &mut sink);
    service.tick(1_000, &mut sink);
    service.tick(1_999, &mut sink);
    assert_eq!(service.provisioning().attributes().notifications().len(), 1);
    service.tick(2_000, &mut sink);
    assert_eq!(service.provisioning().attributes().notifications().len(), 2);
}

#[test]
fn read_only_fields_cannot_be_overwritten() {
    let mut service = build_service(test_config(), provisioned_storage(), MockNetwork::new());
    let mut sink = RecordingSink::new();
    service.begin(None, 0, &mut sink);

    service.provisioning().inbox().push_write(ProvisioningField::Model, b"Hacked");
    service.tick(10, &mut sink);

    assert_eq!(
        service.provisioning().attributes().sim_client_read(ProvisioningField::Model),
        Some("DIY Sensor")
    );
}
