//! Update check orchestration.
//!
//! One check resolves the channel target, optionally flashes a new
//! filesystem image, then flashes firmware when the remote build is newer.
//! The pipeline never reboots by itself: anything needing a restart is
//! reported as [`UpdateOutcome::RestartRequired`] for the caller to act on.

use std::sync::atomic::{AtomicBool, Ordering};

use super::download::{stream_to_flash, DownloadSpec};
use super::flash::{FlashTarget, Partition};
use super::manifest::{FilesystemArtifact, FirmwareArtifact};
use super::resolver::{
    fetch_json, ChannelManifestResolver, FirmwareSource, LegacyManifestResolver, ResolveRequest, UpdateResolver,
    UpdateTarget,
};
use super::ui_sync::{self, UiFileStore, UiSyncOutcome};
use super::version::is_version_newer;
use super::OtaError;
use crate::config::{OtaProtocol, ProductConfig, UpdateChannel};
use crate::http::HttpClient;
use crate::led_events::{LedEvent, LedEvents};
use crate::persistence::{MarkerKind, MarkerStore};
use crate::settings::DeviceSettings;

const SUPPORTED_FS: &str = "littlefs";

/// Collaborators borrowed for one check
pub struct OtaContext<'a> {
    pub http: &'a mut dyn HttpClient,
    pub flash: &'a mut dyn FlashTarget,
    pub markers: &'a mut dyn MarkerStore,
    /// Mounted web UI filesystem; legacy products only
    pub ui_files: Option<&'a mut dyn UiFileStore>,
    pub events: &'a mut LedEvents,
    pub channel: UpdateChannel,
    /// Effective OTA product id (after grid-variant remapping)
    pub product_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Firmware,
    Filesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Server publishes nothing for this channel
    NoTarget,
    UpToDate,
    RestartRequired(RestartReason),
}

pub struct OtaPipeline {
    resolver: Box<dyn UpdateResolver>,
    protocol: OtaProtocol,
    enabled: bool,
    no_cache: bool,
    firmware_version: String,
    bundled_ui_version: String,
    ui_release_base: String,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when dropped
pub struct CheckGuard<'p> {
    flag: &'p AtomicBool,
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl OtaPipeline {
    pub fn new(config: &ProductConfig) -> Self {
        let resolver: Box<dyn UpdateResolver> = match config.ota_protocol {
            OtaProtocol::V2 => Box::new(ChannelManifestResolver::new(
                &config.endpoints.ota_base,
                config.ota_no_cache,
            )),
            OtaProtocol::Legacy => Box::new(LegacyManifestResolver::new(&config.endpoints.legacy_manifest_url)),
        };
        Self {
            resolver,
            protocol: config.ota_protocol,
            enabled: config.ota_enabled,
            no_cache: config.ota_no_cache,
            firmware_version: config.firmware_version.clone(),
            bundled_ui_version: config.ui_version.clone(),
            ui_release_base: config.endpoints.ui_release_base.clone(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn UpdateResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn protocol(&self) -> OtaProtocol {
        self.protocol
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the single update slot
    pub fn begin_check(&self) -> Result<CheckGuard<'_>, OtaError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| CheckGuard { flag: &self.in_flight })
            .map_err(|_| OtaError::Busy)
    }

    /// Automatic checks run only with auto-update on and never on `develop`
    pub fn auto_update_allowed(settings: &DeviceSettings) -> bool {
        settings.auto_update && settings.update_channel != UpdateChannel::Develop
    }

    /// UI version currently installed, falling back to the bundled one
    pub fn installed_ui_version(&self, markers: &dyn MarkerStore) -> String {
        let kind = match self.protocol {
            OtaProtocol::V2 => MarkerKind::FilesystemImage,
            OtaProtocol::Legacy => MarkerKind::UiFiles,
        };
        markers
            .read(kind)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.bundled_ui_version.clone())
    }

    pub fn check_for_update(&self, ctx: &mut OtaContext<'_>) -> Result<UpdateOutcome, OtaError> {
        if !self.enabled {
            return Err(OtaError::Disabled);
        }
        let _guard = self.begin_check()?;

        log::info!("Checking for new firmware...");
        ctx.events.pulse(LedEvent::FirmwareCheck);

        let request = ResolveRequest {
            product_id: ctx.product_id,
            channel: ctx.channel,
        };
        let Some(target) = self.resolver.resolve(ctx.http, &request)? else {
            log::info!("No firmware update available");
            ctx.events.stop(LedEvent::FirmwareAvailable);
            return Ok(UpdateOutcome::NoTarget);
        };

        let fs_updated = match target.filesystem_manifest_url.as_deref() {
            Some(url) => self.update_filesystem(ctx, url).unwrap_or_else(|e| {
                log::error!("Filesystem update failed: {e}");
                false
            }),
            None => false,
        };

        log::info!("Remote version: {}", target.version);
        if !is_version_newer(&target.version, &self.firmware_version) {
            log::info!("Firmware already latest ({})", self.firmware_version);
            ctx.events.stop(LedEvent::FirmwareAvailable);
            if fs_updated {
                log::info!("Restart needed to apply filesystem update");
                return Ok(UpdateOutcome::RestartRequired(RestartReason::Filesystem));
            }
            if self.protocol == OtaProtocol::Legacy {
                if let Err(e) = self.sync_target_ui(ctx, &target) {
                    log::error!("UI sync failed: {e}");
                }
            }
            return Ok(UpdateOutcome::UpToDate);
        }

        ctx.events.start(LedEvent::FirmwareAvailable);
        let (url, sha256) = match &target.firmware {
            FirmwareSource::Direct(url) => (url.clone(), None),
            FirmwareSource::Manifest(manifest_url) => {
                log::debug!("OTA artifact URL: {manifest_url}");
                let artifact: FirmwareArtifact = fetch_json(ctx.http, manifest_url, self.no_cache).map_err(|e| {
                    ctx.events.stop(LedEvent::FirmwareAvailable);
                    e
                })?;
                if artifact.url.is_empty() {
                    log::error!("Firmware URL missing from artifact manifest");
                    ctx.events.stop(LedEvent::FirmwareAvailable);
                    return Err(OtaError::MissingField("url"));
                }
                (artifact.url, artifact.sha256.filter(|s| !s.is_empty()))
            }
        };
        if let Some(digest) = &sha256 {
            log::debug!("OTA SHA256: {digest}");
        }

        log::info!("Starting firmware update...");
        ctx.events.stop(LedEvent::FirmwareAvailable);
        ctx.events.start(LedEvent::FirmwareDownloading);

        let spec = DownloadSpec {
            url: &url,
            partition: Partition::App,
            expected_size: None,
            sha256: sha256.as_deref(),
            no_cache: self.no_cache && self.protocol == OtaProtocol::V2,
        };
        if let Err(e) = stream_to_flash(ctx.http, ctx.flash, &spec) {
            log::error!("Firmware update failed: {e}");
            ctx.events.stop(LedEvent::FirmwareDownloading);
            return Err(e);
        }

        log::info!("Firmware updated, restart required");
        ctx.events.stop(LedEvent::FirmwareDownloading);
        ctx.events.start(LedEvent::FirmwareApplying);
        Ok(UpdateOutcome::RestartRequired(RestartReason::Firmware))
    }

    /// Returns whether a new image was committed
    fn update_filesystem(&self, ctx: &mut OtaContext<'_>, manifest_url: &str) -> Result<bool, OtaError> {
        log::debug!("OTA artifact URL: {manifest_url}");
        let artifact: FilesystemArtifact = fetch_json(ctx.http, manifest_url, self.no_cache)?;

        if artifact.fs != SUPPORTED_FS {
            log::warn!("Filesystem type not supported: {}", artifact.fs);
            return Err(OtaError::UnsupportedFilesystem(artifact.fs));
        }
        if artifact.url.is_empty() {
            log::error!("Filesystem manifest URL missing");
            return Err(OtaError::MissingField("url"));
        }
        let current = ctx.markers.read(MarkerKind::FilesystemImage);
        if !artifact.version.is_empty() && current.as_deref() == Some(artifact.version.as_str()) {
            log::info!("Filesystem already latest ({})", artifact.version);
            return Ok(false);
        }

        log::info!("Updating filesystem ({})...", artifact.version);
        // The image is written in place, so the marker must not describe the
        // old contents while they are being replaced
        ctx.markers.write(MarkerKind::FilesystemImage, "")?;
        let spec = DownloadSpec {
            url: &artifact.url,
            partition: Partition::Filesystem,
            expected_size: Some(artifact.filesize),
            sha256: artifact.sha256.as_deref(),
            no_cache: self.no_cache,
        };
        stream_to_flash(ctx.http, ctx.flash, &spec)?;

        if !artifact.version.is_empty() {
            if let Err(e) = ctx.markers.write(MarkerKind::FilesystemImage, &artifact.version) {
                log::warn!("Could not record filesystem version: {e}");
            }
        }
        log::info!("Filesystem updated");
        Ok(true)
    }

    fn sync_target_ui(&self, ctx: &mut OtaContext<'_>, target: &UpdateTarget) -> Result<UiSyncOutcome, OtaError> {
        let Some(fs) = ctx.ui_files.as_deref_mut() else {
            log::debug!("No UI filesystem; skipping UI sync");
            return Ok(UiSyncOutcome::Skipped);
        };
        ui_sync::sync_from_manifest(ctx.http, fs, ctx.markers, target.ui_version.as_deref(), &target.ui_files)
    }

    /// Legacy UI sync against the channel manifest; a no-op on v2 products
    pub fn sync_ui_files(&self, ctx: &mut OtaContext<'_>) -> Result<UiSyncOutcome, OtaError> {
        if self.protocol != OtaProtocol::Legacy {
            log::info!("UI sync is legacy-only; skipping");
            return Ok(UiSyncOutcome::Skipped);
        }
        let _guard = self.begin_check()?;
        let request = ResolveRequest {
            product_id: ctx.product_id,
            channel: ctx.channel,
        };
        match self.resolver.resolve(ctx.http, &request)? {
            Some(target) => self.sync_target_ui(ctx, &target),
            None => Ok(UiSyncOutcome::Skipped),
        }
    }

    /// Legacy UI sync of the page set matching the bundled UI version
    pub fn sync_configured_ui(&self, ctx: &mut OtaContext<'_>) -> Result<UiSyncOutcome, OtaError> {
        if self.protocol != OtaProtocol::Legacy {
            log::info!("UI sync is legacy-only; skipping");
            return Ok(UiSyncOutcome::Skipped);
        }
        let _guard = self.begin_check()?;
        let Some(fs) = ctx.ui_files.as_deref_mut() else {
            return Ok(UiSyncOutcome::Skipped);
        };
        ui_sync::sync_from_configured_version(
            ctx.http,
            fs,
            ctx.markers,
            &self.ui_release_base,
            &self.bundled_ui_version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpError, Method};
    use crate::mock::{MemoryMarkers, MemoryUiFiles, RecordingFlash, ScriptedHttp, ScriptedResponse};
    use sha2::{Digest, Sha256};

    const CHANNEL: &str = "https://ota.test/wordclock-nextgen/channels/stable.json";
    const FW_MANIFEST: &str = "https://ota.test/fw/1.3.0.json";
    const FW_BIN: &str = "https://ota.test/fw/1.3.0.bin";
    const FS_MANIFEST: &str = "https://ota.test/fs/ui-7.json";
    const FS_BIN: &str = "https://ota.test/fs/ui-7.bin";

    struct Rig {
        pipeline: OtaPipeline,
        http: ScriptedHttp,
        flash: RecordingFlash,
        markers: MemoryMarkers,
        ui: MemoryUiFiles,
        events: LedEvents,
    }

    impl Rig {
        fn new(config: &ProductConfig) -> Self {
            Self {
                pipeline: OtaPipeline::new(config),
                http: ScriptedHttp::new(),
                flash: RecordingFlash::new(),
                markers: MemoryMarkers::default(),
                ui: MemoryUiFiles::new(),
                events: LedEvents::new(true),
            }
        }

        fn v2() -> Self {
            Self::new(&v2_config())
        }

        fn check(&mut self) -> Result<UpdateOutcome, OtaError> {
            let mut ctx = OtaContext {
                http: &mut self.http,
                flash: &mut self.flash,
                markers: &mut self.markers,
                ui_files: Some(&mut self.ui),
                events: &mut self.events,
                channel: UpdateChannel::Stable,
                product_id: "wordclock-nextgen",
            };
            self.pipeline.check_for_update(&mut ctx)
        }

        fn publish(&mut self, target: &str) {
            self.http.on(Method::Get, CHANNEL, ScriptedResponse::json(200, target));
        }

        fn publish_firmware(&mut self, image: &[u8], sha256: &str) {
            self.publish(&format!(
                r#"{{"target":{{"version":"1.3.0","manifest_url":"{FW_MANIFEST}"}}}}"#
            ));
            self.http.on(
                Method::Get,
                FW_MANIFEST,
                ScriptedResponse::json(200, &format!(r#"{{"url":"{FW_BIN}","sha256":"{sha256}"}}"#)),
            );
            self.http.on(Method::Get, FW_BIN, ScriptedResponse::bytes(200, image));
        }

        fn publish_filesystem(&mut self, fs_type: &str, image: &[u8]) {
            self.http.on(
                Method::Get,
                FS_MANIFEST,
                ScriptedResponse::json(
                    200,
                    &format!(
                        r#"{{"fs":"{fs_type}","version":"ui-7","filesize":{},"url":"{FS_BIN}"}}"#,
                        image.len()
                    ),
                ),
            );
            self.http.on(Method::Get, FS_BIN, ScriptedResponse::bytes(200, image));
        }
    }

    fn v2_config() -> ProductConfig {
        let mut config = ProductConfig::nextgen();
        config.firmware_version = "1.2.0".to_string();
        config.endpoints.ota_base = "https://ota.test".to_string();
        config
    }

    fn digest(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    #[test]
    fn newer_firmware_is_flashed_and_needs_restart() {
        let image = vec![0xA5u8; 3_000];
        let mut rig = Rig::v2();
        rig.publish_firmware(&image, &digest(&image));

        assert_eq!(rig.check(), Ok(UpdateOutcome::RestartRequired(RestartReason::Firmware)));
        assert_eq!(rig.flash.commits(), vec![(Partition::App, image)]);
        assert!(rig.events.is_active(LedEvent::FirmwareApplying));
        assert!(!rig.events.is_active(LedEvent::FirmwareDownloading));
        assert!(!rig.events.is_active(LedEvent::FirmwareAvailable));
        assert!(!rig.pipeline.is_busy());
    }

    #[test]
    fn same_or_older_version_is_up_to_date() {
        let mut rig = Rig::v2();
        rig.publish(&format!(r#"{{"target":{{"version":"1.2.0","manifest_url":"{FW_MANIFEST}"}}}}"#));
        assert_eq!(rig.check(), Ok(UpdateOutcome::UpToDate));

        rig.publish(&format!(r#"{{"target":{{"version":"1.1.9","manifest_url":"{FW_MANIFEST}"}}}}"#));
        assert_eq!(rig.check(), Ok(UpdateOutcome::UpToDate));
        assert_eq!(rig.flash.begins(), 0);
        assert!(rig.http.requests().iter().all(|r| r.url == CHANNEL));
    }

    #[test]
    fn null_target_means_nothing_to_do() {
        let mut rig = Rig::v2();
        rig.publish(r#"{"target":null}"#);
        assert_eq!(rig.check(), Ok(UpdateOutcome::NoTarget));
        assert_eq!(rig.http.requests().len(), 1);
    }

    #[test]
    fn checksum_mismatch_never_commits() {
        let image = vec![7u8; 2_500];
        let mut rig = Rig::v2();
        rig.publish_firmware(&image, &digest(b"other"));

        assert_eq!(rig.check(), Err(OtaError::ChecksumMismatch));
        assert!(rig.flash.commits().is_empty());
        assert_eq!(rig.flash.aborts(), 1);
        assert!(!rig.events.is_active(LedEvent::FirmwareDownloading));
        assert!(!rig.events.is_active(LedEvent::FirmwareApplying));
    }

    #[test]
    fn filesystem_only_update_requests_restart() {
        let fs_image = vec![0x11u8; 4_096];
        let mut rig = Rig::v2();
        rig.publish(&format!(
            r#"{{"target":{{"version":"1.2.0","manifest_url":"{FW_MANIFEST}","fs_manifest_url":"{FS_MANIFEST}"}}}}"#
        ));
        rig.publish_filesystem("littlefs", &fs_image);

        assert_eq!(rig.check(), Ok(UpdateOutcome::RestartRequired(RestartReason::Filesystem)));
        assert_eq!(rig.flash.commits(), vec![(Partition::Filesystem, fs_image)]);
        assert_eq!(rig.markers.read(MarkerKind::FilesystemImage).as_deref(), Some("ui-7"));

        // marker now matches: nothing is downloaded again
        assert_eq!(rig.check(), Ok(UpdateOutcome::UpToDate));
        assert_eq!(rig.flash.commits().len(), 1);
    }

    #[test]
    fn interrupted_filesystem_image_is_downloaded_again() {
        let fs_image = vec![0x22u8; 8_192];
        let mut rig = Rig::v2();
        rig.flash.erase_in_place(true);
        rig.flash.preload(Partition::Filesystem, &[0x11u8; 4_096]);
        rig.markers.write(MarkerKind::FilesystemImage, "ui-7").unwrap();
        rig.publish(&format!(
            r#"{{"target":{{"version":"1.2.0","manifest_url":"{FW_MANIFEST}","fs_manifest_url":"{FS_MANIFEST}"}}}}"#
        ));
        rig.publish_filesystem("littlefs", &fs_image);

        // same version already recorded: nothing is touched
        assert_eq!(rig.check(), Ok(UpdateOutcome::UpToDate));
        assert_eq!(rig.flash.begins(), 0);

        rig.markers.write(MarkerKind::FilesystemImage, "ui-6").unwrap();
        rig.http.on(
            Method::Get,
            FS_BIN,
            ScriptedResponse::bytes(200, &fs_image).failing_after(3_000, HttpError::Io("connection reset".to_string())),
        );
        assert_eq!(rig.check(), Ok(UpdateOutcome::UpToDate));
        assert_eq!(rig.flash.aborts(), 1);
        assert_ne!(rig.flash.contents(Partition::Filesystem), Some(fs_image.clone()));
        assert_eq!(rig.markers.read(MarkerKind::FilesystemImage).as_deref(), Some(""));
        assert_eq!(rig.pipeline.installed_ui_version(&rig.markers), v2_config().ui_version);

        // the cleared marker no longer matches any release, so the retry downloads
        rig.http.on(Method::Get, FS_BIN, ScriptedResponse::bytes(200, &fs_image));
        assert_eq!(rig.check(), Ok(UpdateOutcome::RestartRequired(RestartReason::Filesystem)));
        assert_eq!(rig.flash.contents(Partition::Filesystem), Some(fs_image));
        assert_eq!(rig.markers.read(MarkerKind::FilesystemImage).as_deref(), Some("ui-7"));
    }

    #[test]
    fn filesystem_marker_failure_leaves_partition_untouched() {
        let mut rig = Rig::v2();
        rig.flash.erase_in_place(true);
        rig.flash.preload(Partition::Filesystem, &[0x11u8; 4_096]);
        rig.markers.fail_writes(true);
        rig.publish(&format!(
            r#"{{"target":{{"version":"1.2.0","manifest_url":"{FW_MANIFEST}","fs_manifest_url":"{FS_MANIFEST}"}}}}"#
        ));
        rig.publish_filesystem("littlefs", &[0x22u8; 4_096]);

        assert_eq!(rig.check(), Ok(UpdateOutcome::UpToDate));
        assert_eq!(rig.flash.begins(), 0);
        assert_eq!(rig.flash.contents(Partition::Filesystem), Some(vec![0x11u8; 4_096]));
    }

    #[test]
    fn unsupported_filesystem_does_not_block_firmware() {
        let image = vec![1u8; 1_000];
        let mut rig = Rig::v2();
        rig.publish_firmware(&image, "");
        rig.publish(&format!(
            r#"{{"target":{{"version":"1.3.0","manifest_url":"{FW_MANIFEST}","fs_manifest_url":"{FS_MANIFEST}"}}}}"#
        ));
        rig.publish_filesystem("spiffs", &[0u8; 16]);

        assert_eq!(rig.check(), Ok(UpdateOutcome::RestartRequired(RestartReason::Firmware)));
        assert_eq!(rig.flash.commits(), vec![(Partition::App, image)]);
        assert_eq!(rig.markers.read(MarkerKind::FilesystemImage), None);
    }

    #[test]
    fn artifact_fetch_failure_clears_available() {
        let mut rig = Rig::v2();
        rig.publish(&format!(r#"{{"target":{{"version":"2.0.0","manifest_url":"{FW_MANIFEST}"}}}}"#));
        rig.http.on(Method::Get, FW_MANIFEST, ScriptedResponse::json(500, ""));

        assert_eq!(rig.check(), Err(OtaError::HttpStatus(500)));
        assert!(!rig.events.is_active(LedEvent::FirmwareAvailable));
    }

    #[test]
    fn concurrent_check_is_rejected() {
        let mut rig = Rig::v2();
        rig.publish(r#"{"target":null}"#);
        let guard = rig.pipeline.begin_check().unwrap();
        assert!(rig.pipeline.is_busy());
        assert!(matches!(rig.pipeline.begin_check(), Err(OtaError::Busy)));
        drop(guard);
        assert!(!rig.pipeline.is_busy());
        assert_eq!(rig.check(), Ok(UpdateOutcome::NoTarget));
    }

    #[test]
    fn disabled_products_never_fetch() {
        let mut config = v2_config();
        config.ota_enabled = false;
        let mut rig = Rig::new(&config);
        assert_eq!(rig.check(), Err(OtaError::Disabled));
        assert!(rig.http.requests().is_empty());
    }

    #[test]
    fn legacy_up_to_date_syncs_ui_files() {
        let mut config = ProductConfig::legacy();
        config.firmware_version = "26.2.6".to_string();
        config.endpoints.legacy_manifest_url = "https://x/version.json".to_string();
        let mut rig = Rig::new(&config);
        rig.http.on(
            Method::Get,
            "https://x/version.json?channel=stable",
            ScriptedResponse::json(
                200,
                r#"{"version":"26.2.6","firmware":"https://x/fw.bin","ui_version":"ui-9",
                    "files":[{"path":"/setup.html","url":"https://x/setup.html"}]}"#,
            ),
        );
        let page = format!("<!DOCTYPE html><html><body>{}</body></html>", "-".repeat(100));
        rig.http.on(Method::Get, "https://x/setup.html", ScriptedResponse::bytes(200, page.as_bytes()));

        assert_eq!(rig.check(), Ok(UpdateOutcome::UpToDate));
        assert_eq!(rig.ui.get("/setup.html"), Some(page.into_bytes()));
        assert_eq!(rig.markers.read(MarkerKind::UiFiles).as_deref(), Some("ui-9"));
        assert_eq!(rig.pipeline.installed_ui_version(&rig.markers), "ui-9");
    }

    #[test]
    fn legacy_flashes_direct_binary() {
        let mut config = ProductConfig::legacy();
        config.firmware_version = "26.2.6".to_string();
        config.endpoints.legacy_manifest_url = "https://x/version.json".to_string();
        let mut rig = Rig::new(&config);
        rig.http.on(
            Method::Get,
            "https://x/version.json?channel=stable",
            ScriptedResponse::json(200, r#"{"version":"26.3.0","firmware":"https://x/fw.bin"}"#),
        );
        rig.http.on(Method::Get, "https://x/fw.bin", ScriptedResponse::bytes(200, &[9u8; 700]));

        assert_eq!(rig.check(), Ok(UpdateOutcome::RestartRequired(RestartReason::Firmware)));
        assert_eq!(rig.flash.commits().len(), 1);
    }

    #[test]
    fn ui_sync_is_legacy_only() {
        let mut rig = Rig::v2();
        let mut ctx = OtaContext {
            http: &mut rig.http,
            flash: &mut rig.flash,
            markers: &mut rig.markers,
            ui_files: Some(&mut rig.ui),
            events: &mut rig.events,
            channel: UpdateChannel::Stable,
            product_id: "wordclock-nextgen",
        };
        assert_eq!(rig.pipeline.sync_ui_files(&mut ctx), Ok(UiSyncOutcome::Skipped));
        assert_eq!(rig.pipeline.sync_configured_ui(&mut ctx), Ok(UiSyncOutcome::Skipped));
    }

    #[test]
    fn installed_ui_version_falls_back_to_bundled() {
        let rig = Rig::v2();
        assert_eq!(rig.pipeline.installed_ui_version(&rig.markers), "ui-nextgen-0.1.1-dev.6");
    }

    #[test]
    fn auto_update_policy() {
        let mut settings = DeviceSettings::default();
        assert!(OtaPipeline::auto_update_allowed(&settings));
        settings.update_channel = UpdateChannel::Develop;
        assert!(!OtaPipeline::auto_update_allowed(&settings));
        settings.update_channel = UpdateChannel::Early;
        settings.auto_update = false;
        assert!(!OtaPipeline::auto_update_allowed(&settings));
    }
}
