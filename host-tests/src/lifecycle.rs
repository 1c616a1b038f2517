use chrono::NaiveDate;
use proptest::prelude::*;
use wordclock_core::config::UpdateChannel;
use wordclock_core::http::Method;
use wordclock_core::mock::{MemorySettings, ScriptedResponse};
use wordclock_core::network::BootConnect;
use wordclock_core::ProductConfig;

use crate::rig::{channel_url, product, Rig};

fn nextgen_channel() -> String {
    channel_url("wordclock-nextgen", "stable")
}

fn quiet_nextgen() -> Rig {
    let rig = Rig::new(product(ProductConfig::nextgen()));
    rig.http.on(Method::Get, &nextgen_channel(), ScriptedResponse::json(200, r#"{"target":null}"#));
    rig
}

#[test]
fn online_services_start_once_after_portal_setup() {
    let mut rig = quiet_nextgen();
    rig.wifi.set_network("home", "secret");
    assert_eq!(rig.runtime.boot(), BootConnect::PortalStarted);

    rig.run_for(30_000, 500);
    assert_eq!(rig.services.web_starts(), 0);
    assert_eq!(rig.services.mqtt_starts(), 0);
    assert_eq!(rig.services.polls(), 0);
    assert!(rig.http.requests().is_empty());
    assert!(!rig.runtime.heartbeat().is_initialized());

    rig.portal.submit("home", "secret");
    rig.run_for(1_000, 100);
    assert!(rig.runtime.online_init().is_complete());
    assert_eq!(rig.services.web_starts(), 1);
    assert_eq!(rig.services.mqtt_starts(), 1);
    assert_eq!(rig.http.count(Method::Get, &nextgen_channel()), 1);

    rig.wifi.drop_link();
    rig.run_for(30_000, 500);
    assert!(rig.runtime.network().is_connected());
    assert_eq!(rig.services.web_starts(), 1);
    assert_eq!(rig.http.count(Method::Get, &nextgen_channel()), 1);
}

#[test]
fn mqtt_gets_the_persisted_broker() {
    let mut rig = quiet_nextgen().with_home_network();
    rig.runtime.update_settings(|s| s.mqtt_broker = "mqtt://broker.local".to_string());
    rig.runtime.boot();
    rig.tick_after(100);
    assert_eq!(rig.services.mqtt_brokers(), vec!["mqtt://broker.local".to_string()]);
}

#[test]
fn web_server_failure_does_not_block_the_rest() {
    let mut rig = quiet_nextgen().with_home_network();
    rig.services.fail_web(true);
    rig.runtime.boot();
    rig.run_for(300, 100);
    assert_eq!(rig.services.web_starts(), 1);
    assert!(rig.runtime.online_init().is_complete());
    assert_eq!(rig.services.polls(), 3);
}

#[test]
fn daily_check_fires_once_at_two_am() {
    let mut rig = quiet_nextgen().with_home_network();
    let evening = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap().and_hms_opt(1, 58, 0).unwrap();
    rig.clock.set_local_time(Some(evening));
    rig.runtime.boot();
    rig.tick_after(100);
    assert_eq!(rig.http.count(Method::Get, &nextgen_channel()), 1);

    // 01:58 -> 02:03
    rig.run_for(5 * 60 * 1_000, 1_000);
    assert_eq!(rig.http.count(Method::Get, &nextgen_channel()), 2);

    // rest of the day, into the next 02:00 minute
    rig.run_for(24 * 60 * 60 * 1_000, 60_000);
    assert_eq!(rig.http.count(Method::Get, &nextgen_channel()), 3);
}

#[test]
fn daily_check_respects_auto_update_setting() {
    let mut rig = quiet_nextgen().with_home_network();
    rig.runtime.update_settings(|s| s.auto_update = false);
    let two_am = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap().and_hms_opt(2, 0, 0).unwrap();
    rig.clock.set_local_time(Some(two_am));
    rig.runtime.boot();
    rig.run_for(30_000, 1_000);
    assert_eq!(rig.http.count(Method::Get, &nextgen_channel()), 0);
}

#[test]
fn settings_flush_every_second_online() {
    let mut rig = quiet_nextgen().with_home_network();
    rig.runtime.boot();
    rig.tick_after(1_000);
    let saves = rig.settings.saves();

    rig.runtime.update_settings(|s| s.night_mode_active = true);
    rig.tick_after(400);
    assert_eq!(rig.settings.settings().map(|s| s.night_mode_active), Some(false));
    rig.tick_after(600);
    assert_eq!(rig.settings.settings().map(|s| s.night_mode_active), Some(true));
    assert_eq!(rig.settings.saves(), saves + 1);

    rig.run_for(5_000, 500);
    assert_eq!(rig.settings.saves(), saves + 1);
}

#[test]
fn legacy_settings_are_migrated_before_use() {
    let stored = MemorySettings::default();
    stored.set_blob(br#"{"channel":"early","autoUpdate":true,"gridVariant":"NL_55x50_LOGO_V1","brightness":8}"#);
    let logo_channel = channel_url("wordclock-logo-nl-55x50-v1", "early");

    let mut rig = Rig::with_settings(product(ProductConfig::logo()), stored).with_home_network();
    rig.http.on(Method::Get, &logo_channel, ScriptedResponse::json(200, r#"{"target":null}"#));

    let settings = rig.runtime.settings();
    assert_eq!(settings.update_channel, UpdateChannel::Early);
    assert_eq!(settings.grid_variant, "NL_55x50_LOGO_V1");
    assert_eq!(settings.brightness, 8);
    assert_eq!(rig.settings.schema(), Some(2));

    rig.runtime.boot();
    rig.tick_after(100);
    assert_eq!(rig.http.count(Method::Get, &logo_channel), 1);
}

#[test]
fn wifi_reset_erases_credentials_and_restarts() {
    let mut rig = quiet_nextgen().with_home_network();
    rig.runtime.boot();
    rig.tick_after(100);
    rig.runtime.update_settings(|s| s.brightness = 1);

    rig.runtime.reset_wifi_settings();
    assert!(rig.wifi.stored_credentials().is_none());
    assert_eq!(rig.system.restarts(), 1);
    assert_eq!(rig.settings.settings().map(|s| s.brightness), Some(1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn nothing_leaves_the_device_while_offline(link in proptest::collection::vec(any::<bool>(), 1..40)) {
        let mut rig = quiet_nextgen().with_home_network();
        rig.runtime.boot();

        for up in link {
            if up {
                rig.wifi.set_network("home", "secret");
            } else {
                rig.wifi.clear_network();
                rig.wifi.drop_link();
            }
            let before = rig.http.requests().len();
            let polls = rig.services.polls();
            rig.tick_after(20_000);
            if !rig.runtime.network().is_connected() {
                prop_assert_eq!(rig.http.requests().len(), before);
                prop_assert_eq!(rig.services.polls(), polls);
            }
            prop_assert!(rig.services.web_starts() <= 1);
        }
    }
}
