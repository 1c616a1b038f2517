use sha2::{Digest, Sha256};
use wordclock_core::config::UpdateChannel;
use wordclock_core::http::Method;
use wordclock_core::led_events::LedEvent;
use wordclock_core::mock::ScriptedResponse;
use wordclock_core::ota::{OtaError, Partition, UiSyncOutcome, UpdateOutcome};
use wordclock_core::persistence::{MarkerKind, MarkerStore};
use wordclock_core::ProductConfig;

use crate::rig::{channel_url, product, Rig, LEGACY_MANIFEST, UI_BASE};

const FW_MANIFEST: &str = "https://ota.test/artifacts/fw-1.3.0.json";
const FW_BIN: &str = "https://ota.test/artifacts/fw-1.3.0.bin";
const FS_MANIFEST: &str = "https://ota.test/artifacts/fs-ui-7.json";
const FS_BIN: &str = "https://ota.test/artifacts/fs-ui-7.bin";

fn nextgen() -> ProductConfig {
    ProductConfig {
        firmware_version: "1.2.0".to_string(),
        ..product(ProductConfig::nextgen())
    }
}

fn stable() -> String {
    channel_url("wordclock-nextgen", "stable")
}

fn digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn publish_target(rig: &Rig, version: &str, fs_manifest: Option<&str>) {
    let fs = fs_manifest.map(|u| format!(r#","fs_manifest_url":"{u}""#)).unwrap_or_default();
    rig.http.on(
        Method::Get,
        &stable(),
        ScriptedResponse::json(
            200,
            &format!(r#"{{"target":{{"version":"{version}","manifest_url":"{FW_MANIFEST}"{fs}}}}}"#),
        ),
    );
}

fn publish_firmware(rig: &Rig, image: &[u8], sha256: &str) {
    rig.http.on(
        Method::Get,
        FW_MANIFEST,
        ScriptedResponse::json(200, &format!(r#"{{"url":"{FW_BIN}","sha256":"{sha256}"}}"#)),
    );
    rig.http.on(Method::Get, FW_BIN, ScriptedResponse::bytes(200, image));
}

fn publish_filesystem(rig: &Rig, image: &[u8], body: ScriptedResponse) {
    rig.http.on(
        Method::Get,
        FS_MANIFEST,
        ScriptedResponse::json(
            200,
            &format!(
                r#"{{"fs":"littlefs","version":"ui-7","filesize":{},"url":"{FS_BIN}"}}"#,
                image.len()
            ),
        ),
    );
    rig.http.on(Method::Get, FS_BIN, body);
}

#[test]
fn startup_check_flashes_newer_firmware_and_restarts() {
    let mut rig = Rig::new(nextgen()).with_home_network();
    let image = vec![0x5Au8; 5_000];
    publish_target(&rig, "1.3.0", None);
    publish_firmware(&rig, &image, &digest(&image));
    rig.runtime.update_settings(|s| s.brightness = 3);

    rig.runtime.boot();
    rig.tick_after(100);

    assert_eq!(rig.flash.commits(), vec![(Partition::App, image)]);
    assert_eq!(rig.system.restarts(), 1);
    assert!(rig.runtime.is_restarting());
    assert!(rig.runtime.events().is_active(LedEvent::FirmwareApplying));
    // settings reach storage before the reboot
    assert_eq!(rig.settings.settings().map(|s| s.brightness), Some(3));

    let fetch = rig.http.requests().into_iter().find(|r| r.url == FW_BIN).unwrap();
    assert_eq!(fetch.header("Cache-Control"), Some("no-cache, no-store, must-revalidate"));

    rig.tick_after(100);
    assert_eq!(rig.system.restarts(), 1);
}

#[test]
fn filesystem_only_update_restarts_and_records_marker() {
    let mut rig = Rig::new(nextgen()).with_home_network();
    let image = vec![0x11u8; 4_096];
    publish_target(&rig, "1.2.0", Some(FS_MANIFEST));
    publish_filesystem(&rig, &image, ScriptedResponse::bytes(200, &image));

    rig.runtime.boot();
    rig.tick_after(100);

    assert_eq!(rig.flash.commits(), vec![(Partition::Filesystem, image)]);
    assert_eq!(rig.markers.read(MarkerKind::FilesystemImage).as_deref(), Some("ui-7"));
    assert_eq!(rig.runtime.ui_version(), "ui-7");
    assert_eq!(rig.system.restarts(), 1);
}

#[test]
fn matching_filesystem_marker_skips_download() {
    let mut rig = Rig::new(nextgen()).with_home_network();
    let image = vec![0x11u8; 4_096];
    rig.markers.clone().write(MarkerKind::FilesystemImage, "ui-7").unwrap();
    publish_target(&rig, "1.2.0", Some(FS_MANIFEST));
    publish_filesystem(&rig, &image, ScriptedResponse::bytes(200, &image));

    rig.runtime.boot();
    rig.tick_after(100);

    assert_eq!(rig.http.count(Method::Get, FS_BIN), 0);
    assert!(rig.flash.commits().is_empty());
    assert_eq!(rig.system.restarts(), 0);
}

#[test]
fn truncated_filesystem_image_is_discarded() {
    let mut rig = Rig::new(nextgen()).with_home_network();
    let image = vec![0x22u8; 4_096];
    rig.flash.erase_in_place(true);
    rig.flash.preload(Partition::Filesystem, &[0x11u8; 4_096]);
    rig.markers.clone().write(MarkerKind::FilesystemImage, "ui-6").unwrap();
    publish_target(&rig, "1.2.0", Some(FS_MANIFEST));
    publish_filesystem(
        &rig,
        &image,
        ScriptedResponse::bytes(200, &image[..1_000]).with_content_length(Some(image.len() as u64)),
    );

    rig.runtime.boot();
    rig.tick_after(100);

    assert!(rig.flash.commits().is_empty());
    assert_eq!(rig.flash.aborts(), 1);
    // old image is gone, so the marker must not claim it
    assert_eq!(rig.flash.contents(Partition::Filesystem), Some(Vec::new()));
    assert_eq!(rig.markers.read(MarkerKind::FilesystemImage).as_deref(), Some(""));
    assert_eq!(rig.system.restarts(), 0);
}

#[test]
fn checksum_mismatch_never_commits() {
    let mut rig = Rig::new(nextgen()).with_home_network();
    let image = vec![0x77u8; 3_000];
    publish_target(&rig, "1.3.0", None);
    publish_firmware(&rig, &image, &digest(b"something else"));

    rig.runtime.boot();
    rig.tick_after(100);

    assert!(rig.flash.commits().is_empty());
    assert_eq!(rig.flash.aborts(), 1);
    assert_eq!(rig.system.restarts(), 0);
    assert!(!rig.runtime.events().is_active(LedEvent::FirmwareDownloading));

    assert_eq!(rig.runtime.check_for_update_now(), Err(OtaError::ChecksumMismatch));
    assert!(rig.flash.commits().is_empty());
}

#[test]
fn develop_channel_only_updates_on_request() {
    let mut rig = Rig::new(nextgen()).with_home_network();
    rig.runtime.update_settings(|s| s.update_channel = UpdateChannel::Develop);
    let develop = channel_url("wordclock-nextgen", "develop");
    rig.http.on(Method::Get, &develop, ScriptedResponse::json(200, r#"{"target":null}"#));

    rig.runtime.boot();
    rig.run_for(1_000, 100);
    assert_eq!(rig.http.count(Method::Get, &develop), 0);
    assert!(rig.runtime.online_init().update_check);

    assert_eq!(rig.runtime.check_for_update_now(), Ok(UpdateOutcome::NoTarget));
    assert_eq!(rig.http.count(Method::Get, &develop), 1);
}

#[test]
fn older_remote_firmware_is_left_alone() {
    let mut rig = Rig::new(nextgen()).with_home_network();
    publish_target(&rig, "1.1.0", None);

    rig.runtime.boot();
    rig.tick_after(100);
    assert_eq!(rig.http.count(Method::Get, FW_MANIFEST), 0);
    assert_eq!(rig.system.restarts(), 0);
    assert_eq!(rig.runtime.check_for_update_now(), Ok(UpdateOutcome::UpToDate));
}

fn legacy() -> ProductConfig {
    ProductConfig {
        firmware_version: "1.2.0".to_string(),
        ui_version: "ui-9".to_string(),
        ..product(ProductConfig::legacy())
    }
}

const PAGE: &str = "<!DOCTYPE html><html><head><title>Wordclock</title></head><body>settings page</body></html>";

#[test]
fn legacy_product_syncs_ui_files_on_connect() {
    let mut rig = Rig::new(legacy()).with_home_network();
    rig.http.on(
        Method::Get,
        &format!("{LEGACY_MANIFEST}?channel=stable"),
        ScriptedResponse::json(
            200,
            r#"{"channels":{"stable":{"version":"1.2.0","ui_version":"ui-9",
                "firmware":"https://ota.test/legacy/fw.bin","files":[
                {"path":"/setup.html","url":"https://ui.test/setup.html"},
                {"path":"/update.html","url":"https://ui.test/update.html"}]}}}"#,
        ),
    );
    rig.http.on(Method::Get, "https://ui.test/setup.html", ScriptedResponse::bytes(200, PAGE.as_bytes()));
    rig.http.on(Method::Get, "https://ui.test/update.html", ScriptedResponse::bytes(200, PAGE.as_bytes()));

    rig.runtime.boot();
    rig.tick_after(100);

    assert_eq!(rig.ui_files.get("/setup.html").as_deref(), Some(PAGE.as_bytes()));
    assert_eq!(rig.ui_files.get("/update.html").as_deref(), Some(PAGE.as_bytes()));
    assert!(rig.ui_files.files().iter().all(|f| !f.ends_with(".tmp")));
    assert_eq!(rig.markers.read(MarkerKind::UiFiles).as_deref(), Some("ui-9"));
    assert!(rig.runtime.online_init().ui_sync);
    assert_eq!(rig.system.restarts(), 0);
}

#[test]
fn legacy_configured_ui_sync_fetches_release_pages() {
    let mut rig = Rig::new(legacy()).with_home_network();
    rig.runtime.update_settings(|s| s.auto_update = false);
    for name in ["admin", "changepw", "dashboard", "logs", "mqtt", "setup", "update"] {
        rig.http.on(
            Method::Get,
            &format!("{UI_BASE}/vui-9/data/{name}.html"),
            ScriptedResponse::bytes(200, PAGE.as_bytes()),
        );
    }

    rig.runtime.boot();
    assert_eq!(rig.runtime.sync_configured_ui(), Ok(UiSyncOutcome::Synced));
    assert_eq!(rig.ui_files.files().len(), 7);
    assert_eq!(rig.markers.read(MarkerKind::UiFiles).as_deref(), Some("ui-9"));

    assert_eq!(rig.runtime.sync_configured_ui(), Ok(UiSyncOutcome::UpToDate));
}

#[test]
fn failed_ui_page_leaves_marker_untouched() {
    let mut rig = Rig::new(legacy()).with_home_network();
    rig.runtime.update_settings(|s| s.auto_update = false);
    for name in ["admin", "changepw", "dashboard", "logs", "mqtt", "setup"] {
        rig.http.on(
            Method::Get,
            &format!("{UI_BASE}/vui-9/data/{name}.html"),
            ScriptedResponse::bytes(200, PAGE.as_bytes()),
        );
    }
    rig.http.on(
        Method::Get,
        &format!("{UI_BASE}/vui-9/data/update.html"),
        ScriptedResponse::bytes(404, b"missing"),
    );

    rig.runtime.boot();
    assert_eq!(rig.runtime.sync_configured_ui(), Ok(UiSyncOutcome::Partial));
    assert_eq!(rig.markers.read(MarkerKind::UiFiles), None);
}
