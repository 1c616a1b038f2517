use chrono::NaiveDate;
use serde_json::Value;
use wordclock_core::heartbeat::{HEARTBEAT_INTERVAL_MS, HEARTBEAT_STARTUP_DELAY_MS};
use wordclock_core::http::Method;
use wordclock_core::identity::IdentityStore;
use wordclock_core::mock::{RecordedRequest, ScriptedResponse};
use wordclock_core::ProductConfig;

use crate::rig::{product, Rig, HEARTBEAT_URL, REGISTER_URL};

fn online_rig() -> Rig {
    let mut rig = Rig::new(product(ProductConfig::nextgen())).with_home_network();
    rig.runtime.update_settings(|s| s.auto_update = false);
    rig
}

fn heartbeats(rig: &Rig) -> Vec<RecordedRequest> {
    rig.http
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Post && r.url == HEARTBEAT_URL)
        .collect()
}

fn tokens(rig: &Rig) -> Vec<String> {
    heartbeats(rig)
        .iter()
        .map(|r| r.header("X-Device-Token").unwrap_or_default().to_string())
        .collect()
}

#[test]
fn revoked_token_is_replaced_by_reregistration() {
    let mut rig = online_rig().registered("dev-1", "old-token");
    rig.http.enqueue(Method::Post, HEARTBEAT_URL, ScriptedResponse::json(401, "unauthorized"));
    rig.http.on(Method::Post, HEARTBEAT_URL, ScriptedResponse::json(200, "{}"));
    rig.http.on(
        Method::Post,
        REGISTER_URL,
        ScriptedResponse::json(200, r#"{"deviceId":"dev-1","deviceToken":"new-token"}"#),
    );

    rig.runtime.boot();
    rig.tick_after(100);
    assert!(heartbeats(&rig).is_empty());

    rig.tick_after(HEARTBEAT_STARTUP_DELAY_MS);
    assert_eq!(tokens(&rig), vec!["old-token", "new-token"]);
    assert_eq!(rig.identity.device_token().as_deref(), Some("new-token"));
    assert_eq!(rig.http.count(Method::Post, REGISTER_URL), 1);

    rig.tick_after(HEARTBEAT_INTERVAL_MS / 2);
    assert_eq!(heartbeats(&rig).len(), 2);

    rig.tick_after(HEARTBEAT_INTERVAL_MS / 2);
    assert_eq!(tokens(&rig), vec!["old-token", "new-token", "new-token"]);
    assert_eq!(rig.runtime.heartbeat().last_http_status(), Some(200));
}

#[test]
fn failed_reregistration_stops_heartbeats_for_good() {
    let mut rig = online_rig().registered("dev-1", "old-token");
    rig.http.on(Method::Post, HEARTBEAT_URL, ScriptedResponse::json(401, "unauthorized"));
    rig.http.on(Method::Post, REGISTER_URL, ScriptedResponse::json(500, "down"));

    rig.runtime.boot();
    rig.tick_after(100);
    rig.tick_after(HEARTBEAT_STARTUP_DELAY_MS);
    assert!(rig.runtime.heartbeat().is_stopped());
    assert_eq!(heartbeats(&rig).len(), 1);

    for _ in 0..5 {
        rig.tick_after(HEARTBEAT_INTERVAL_MS);
    }
    assert_eq!(heartbeats(&rig).len(), 1);
    assert_eq!(rig.http.count(Method::Post, REGISTER_URL), 1);
}

#[test]
fn first_online_tick_registers_then_heartbeats() {
    let mut rig = online_rig();
    rig.http.on(
        Method::Post,
        REGISTER_URL,
        ScriptedResponse::json(201, r#"{"device_id":"dev-7","token":"tok-7"}"#),
    );
    rig.http.on(Method::Post, HEARTBEAT_URL, ScriptedResponse::json(200, "{}"));
    rig.runtime.update_settings(|s| {
        s.brightness = 12;
        s.grid_variant = "NL_V4".to_string();
    });

    rig.runtime.boot();
    rig.tick_after(100);
    let register = &rig.http.requests()[0];
    assert_eq!(register.url, REGISTER_URL);
    assert_eq!(register.header("X-Provisioning-Key"), Some("prov-secret"));
    let body: Value = serde_json::from_slice(&register.body).unwrap();
    assert_eq!(body["hardwareId"], "A1B2C3D4E5F6");
    assert_eq!(body["firmware"], rig.runtime.config().firmware_version.as_str());

    rig.tick_after(HEARTBEAT_STARTUP_DELAY_MS);
    assert_eq!(tokens(&rig), vec!["tok-7"]);
    let beat: Value = serde_json::from_slice(&heartbeats(&rig)[0].body).unwrap();
    assert_eq!(beat["deviceId"], "dev-7");
    assert_eq!(beat["brightness"], 12);
    assert_eq!(beat["gridVariant"], "NL_V4");
    assert_eq!(beat["rssi"], -58);
}

#[test]
fn no_heartbeat_while_offline_and_immediate_one_on_reconnect() {
    let mut rig = online_rig().registered("dev-1", "tok");
    rig.http.on(Method::Post, HEARTBEAT_URL, ScriptedResponse::json(200, "{}"));

    rig.runtime.boot();
    rig.tick_after(100);
    rig.tick_after(HEARTBEAT_STARTUP_DELAY_MS);
    assert_eq!(heartbeats(&rig).len(), 1);

    rig.wifi.drop_link();
    rig.wifi.clear_network();
    rig.tick_after(100);
    assert!(!rig.runtime.network().is_connected());
    for _ in 0..3 {
        rig.tick_after(HEARTBEAT_INTERVAL_MS);
    }
    assert_eq!(heartbeats(&rig).len(), 1);

    rig.wifi.set_network("home", "secret");
    rig.run_for(20_000, 1_000);
    assert!(rig.runtime.network().is_connected());
    assert_eq!(heartbeats(&rig).len(), 2);
}

#[test]
fn heartbeats_wait_for_the_half_minute_window() {
    let mut rig = online_rig().registered("dev-1", "tok");
    rig.http.on(Method::Post, HEARTBEAT_URL, ScriptedResponse::json(200, "{}"));
    let noon = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap().and_hms_opt(12, 0, 35).unwrap();
    rig.clock.set_local_time(Some(noon));

    rig.runtime.boot();
    rig.tick_after(100);
    rig.run_for(40_000, 1_000);
    assert!(heartbeats(&rig).is_empty());

    rig.run_for(14_000, 1_000);
    assert_eq!(heartbeats(&rig).len(), 1);
}

#[test]
fn already_registered_device_is_not_retried() {
    let mut rig = online_rig();
    rig.http.on(Method::Post, REGISTER_URL, ScriptedResponse::json(409, r#"{"error":"exists"}"#));

    rig.runtime.boot();
    rig.run_for(HEARTBEAT_STARTUP_DELAY_MS * 2, 1_000);
    assert_eq!(rig.http.count(Method::Post, REGISTER_URL), 1);
    assert!(heartbeats(&rig).is_empty());
    assert_eq!(rig.identity.device_id(), None);
}
