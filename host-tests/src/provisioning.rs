use serde_json::Value;
use wordclock_core::http::Method;
use wordclock_core::led_events::LedEvent;
use wordclock_core::mock::ScriptedResponse;
use wordclock_core::network::{BootConnect, WifiDriver};
use wordclock_core::provisioning::{BleEvent, Characteristic, ProvisioningReason};
use wordclock_core::ProductConfig;

use crate::rig::{channel_url, product, Rig};

fn ble_product() -> ProductConfig {
    ProductConfig {
        ble_timeout_ms: Some(120_000),
        ..product(ProductConfig::logo_ble())
    }
}

fn json_statuses(rig: &Rig) -> Vec<Value> {
    rig.ble
        .statuses()
        .iter()
        .filter_map(|s| serde_json::from_str::<Value>(s).ok())
        .collect()
}

fn states(rig: &Rig) -> Vec<String> {
    json_statuses(rig)
        .iter()
        .filter_map(|v| v["state"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn first_boot_provisions_over_ble_and_goes_online() {
    let mut rig = Rig::new(ble_product());
    rig.wifi.set_network("home", "secret");
    rig.http.on(
        Method::Get,
        &channel_url("wordclock-logo", "early"),
        ScriptedResponse::json(200, r#"{"target":null}"#),
    );

    assert_eq!(
        rig.runtime.boot(),
        BootConnect::NeedsProvisioning(ProvisioningReason::FirstBootNoCreds)
    );
    assert!(rig.runtime.provisioning().is_some_and(|p| p.is_active()));
    assert_eq!(rig.ble.device_name().as_deref(), Some("wordclock-logo-4E5F6"));
    assert!(rig.ble.advertising());
    assert!(!rig.portal.is_active());
    assert!(!rig.display.frames().is_empty());

    rig.ble.push_event(BleEvent::ClientConnected);
    rig.ble.push_write(Characteristic::Ssid, "home");
    rig.ble.push_write(Characteristic::Password, "secret");
    rig.tick_after(100);
    assert!(!rig.runtime.network().is_connected());

    rig.tick_after(100);
    assert!(rig.runtime.network().is_connected());
    assert_eq!(
        states(&rig),
        vec!["ble_ready", "creds_partial", "creds_partial", "creds_received", "wifi_connecting", "wifi_ok"]
    );
    let last = json_statuses(&rig).pop().unwrap();
    assert_eq!(last["ip"], "192.168.1.50");
    assert_eq!(last["ble_reason"], "first_boot_no_creds");
    assert_eq!(last["hardware_id"], "A1B2C3D4E5F6");
    assert!(rig.ble.statuses().iter().any(|s| s == "ble_connected"));
    assert!(rig.ble.notifications() > 0);

    assert_eq!(rig.wifi.stored_credentials(), Some(("home".to_string(), "secret".to_string())));
    assert_eq!(rig.services.web_starts(), 1);
}

#[test]
fn status_never_leaks_the_password() {
    let mut rig = Rig::new(ble_product());
    rig.wifi.set_network("home", "hunter22");
    rig.runtime.boot();
    rig.ble.push_write(Characteristic::Ssid, "home");
    rig.ble.push_write(Characteristic::Password, "hunter22");
    rig.run_for(500, 100);
    assert!(rig.ble.statuses().iter().all(|s| !s.contains("hunter22")));
}

#[test]
fn stored_but_unreachable_network_restarts_provisioning() {
    let mut rig = Rig::new(ble_product());
    rig.wifi.store_credentials("old", "pw");
    assert_eq!(
        rig.runtime.boot(),
        BootConnect::NeedsProvisioning(ProvisioningReason::WiFiUnavailableAtBoot)
    );
    let first = json_statuses(&rig).remove(0);
    assert_eq!(first["ble_reason"], "wifi_unavailable_at_boot");
}

#[test]
fn clock_face_waits_for_provisioning_to_end() {
    let mut rig = Rig::new(ble_product());
    rig.wifi.set_network("home", "secret");
    rig.runtime.boot();
    rig.ble.push_write(Characteristic::Ssid, "home");
    rig.ble.push_write(Characteristic::Password, "secret");
    rig.run_for(1_000, 100);
    assert!(rig.runtime.network().is_connected());
    assert_eq!(rig.face.renders(), 0);

    rig.ble.push_write(Characteristic::Command, "stop");
    rig.run_for(1_000, 100);
    assert!(rig.runtime.provisioning().is_some_and(|p| !p.is_active()));
    assert!(states(&rig).contains(&"ble_stop_ack".to_string()));
    assert!(rig.face.renders() > 0);
}

#[test]
fn session_timeout_hands_over_to_the_portal() {
    let config = ProductConfig {
        ble_timeout_ms: Some(15_000),
        ..product(ProductConfig::logo_ble())
    };
    let mut rig = Rig::new(config);
    rig.runtime.boot();
    assert!(!rig.portal.is_active());

    rig.run_for(15_100, 100);
    assert!(rig.runtime.provisioning().is_some_and(|p| !p.is_active()));
    // network servicing precedes BLE, so the handover lands on the next tick
    assert!(!rig.portal.is_active());

    rig.tick_after(100);
    assert!(rig.portal.is_active());
    assert!(rig.wifi.access_point_active());
    assert!(rig.runtime.events().is_active(LedEvent::WifiManagerPortal));
    assert!(!rig.runtime.events().is_active(LedEvent::BleProvisioning));
}

#[test]
fn portal_submission_connects_without_ble() {
    let mut rig = Rig::new(product(ProductConfig::nextgen()));
    rig.wifi.set_network("cafe", "latte");
    assert_eq!(rig.runtime.boot(), BootConnect::PortalStarted);
    assert!(rig.runtime.provisioning().is_none());

    rig.portal.submit("cafe", "latte");
    rig.tick_after(100);
    assert!(rig.runtime.network().is_connected());
    assert!(!rig.portal.is_active());
    assert!(!rig.wifi.access_point_active());
    assert_eq!(rig.wifi.ssid().as_deref(), Some("cafe"));
}

#[test]
fn manual_trigger_opens_a_session_while_online() {
    let mut rig = Rig::new(ble_product()).with_home_network();
    rig.http.on(
        Method::Get,
        &channel_url("wordclock-logo", "early"),
        ScriptedResponse::json(200, r#"{"target":null}"#),
    );
    assert_eq!(rig.runtime.boot(), BootConnect::Connected);
    rig.tick_after(100);

    assert!(rig.runtime.start_provisioning(ProvisioningReason::ManualTrigger));
    let first = json_statuses(&rig).remove(0);
    assert_eq!(first["ble_reason"], "manual_trigger");

    rig.runtime.stop_provisioning();
    assert!(!rig.ble.advertising());
    assert!(rig.display.clears() > 0);
}
