//! Per-tick orchestration of the connectivity lifecycle.
//!
//! [`Runtime::tick`] runs one pass of the cooperative main loop. It never
//! blocks for long; the only bounded waits are the boot-time WiFi connect and
//! OTA downloads. Everything online (web server, MQTT, UI sync, the startup
//! update check, auto-registration, heartbeat) is initialised once, on the
//! first connected tick after boot.

use chrono::{NaiveDateTime, Timelike};
use rand::RngCore;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::{OtaProtocol, ProductConfig};
use crate::heartbeat::{HeartbeatEngine, HeartbeatOutcome, Telemetry, TelemetrySource};
use crate::http::HttpClient;
use crate::identity::{DeviceIdentity, IdentityStore};
use crate::led_events::{LedEvents, StatusLeds};
use crate::network::{BootConnect, CaptivePortal, LinkTransition, NetworkManager, WifiDriver};
use crate::ota::{
    FlashTarget, OtaContext, OtaError, OtaPipeline, RestartReason, UiFileStore, UiSyncOutcome, UpdateOutcome,
};
use crate::persistence::MarkerStore;
use crate::provisioning::{BleProvisioning, BleTransport, PasskeyDisplay, ProvisioningIo, ProvisioningReason};
use crate::registration::{register_device, Fleet};
use crate::settings::{DeviceSettings, SettingsBackend, SettingsStore};
use crate::system::{safe_restart, SystemControl};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("web server failed to start: {0}")]
    WebServer(String),

    #[error("MQTT client failed to start: {0}")]
    Mqtt(String),
}

/// Network-facing services that only run while the station link is up
pub trait OnlineServices {
    fn start_web_server(&mut self) -> Result<(), ServiceError>;

    /// An empty broker URL in `settings` means MQTT is disabled
    fn start_mqtt(&mut self, settings: &DeviceSettings) -> Result<(), ServiceError>;

    /// Web requests, OTA listener and MQTT event loop
    fn poll(&mut self, now_ms: u64);
}

/// The word grid itself
pub trait ClockFace {
    /// True while the boot animation still owns the grid
    fn startup_running(&mut self, now_ms: u64) -> bool;

    fn render(&mut self, time: Option<NaiveDateTime>, settings: &DeviceSettings);
}

/// Hardware adapters handed to the runtime at boot
pub struct Board<W: WifiDriver, B: BleTransport> {
    pub wifi: W,
    pub portal: Option<Box<dyn CaptivePortal>>,
    pub ble: Option<B>,
    pub clock: Box<dyn Clock>,
    pub http: Box<dyn HttpClient>,
    pub identity: Box<dyn IdentityStore>,
    pub markers: Box<dyn MarkerStore>,
    pub settings: Box<dyn SettingsBackend>,
    pub system: Box<dyn SystemControl>,
    pub flash: Box<dyn FlashTarget>,
    pub ui_files: Option<Box<dyn UiFileStore>>,
    pub services: Box<dyn OnlineServices>,
    pub face: Box<dyn ClockFace>,
    pub status_leds: Box<dyn StatusLeds>,
    pub passkey_display: Box<dyn PasskeyDisplay>,
    pub rng: Box<dyn RngCore>,
}

/// Which online services already ran their one-time initialisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OnlineInit {
    pub web_server: bool,
    pub mqtt: bool,
    pub ui_sync: bool,
    pub update_check: bool,
    pub registration: bool,
    pub heartbeat: bool,
}

impl OnlineInit {
    pub fn is_complete(&self) -> bool {
        self.web_server && self.mqtt && self.ui_sync && self.update_check && self.registration && self.heartbeat
    }
}

/// Heartbeat telemetry read live from the board
struct DeviceTelemetry<'a> {
    system: &'a dyn SystemControl,
    rssi: Option<i32>,
    settings: &'a DeviceSettings,
}

impl TelemetrySource for DeviceTelemetry<'_> {
    fn telemetry(&self) -> Telemetry {
        Telemetry {
            stats: self.system.stats(),
            rssi: self.rssi.unwrap_or(0),
            grid_variant: Some(self.settings.grid_variant.clone()).filter(|g| !g.is_empty()),
            brightness: self.settings.brightness,
            night_mode_active: self.settings.night_mode_active,
            setup_complete: self.settings.setup_complete,
        }
    }
}

pub struct Runtime<W: WifiDriver, B: BleTransport> {
    config: ProductConfig,
    network: NetworkManager<W>,
    ble: Option<BleProvisioning<B>>,
    clock: Box<dyn Clock>,
    http: Box<dyn HttpClient>,
    identity: Box<dyn IdentityStore>,
    markers: Box<dyn MarkerStore>,
    settings: SettingsStore,
    system: Box<dyn SystemControl>,
    flash: Box<dyn FlashTarget>,
    ui_files: Option<Box<dyn UiFileStore>>,
    services: Box<dyn OnlineServices>,
    face: Box<dyn ClockFace>,
    status_leds: Box<dyn StatusLeds>,
    passkey_display: Box<dyn PasskeyDisplay>,
    rng: Box<dyn RngCore>,

    events: LedEvents,
    heartbeat: HeartbeatEngine,
    ota: OtaPipeline,
    ui_version: String,
    online: OnlineInit,
    last_flush_ms: u64,
    last_clock_tick_ms: Option<u64>,
    last_daily_check_epoch: Option<i64>,
    restarting: bool,
}

impl<W: WifiDriver, B: BleTransport> Runtime<W, B> {
    /// Migrates and loads persisted settings; nothing touches the network yet
    pub fn new(config: ProductConfig, board: Board<W, B>) -> Self {
        let settings = SettingsStore::open(board.settings, DeviceSettings::for_product(&config));

        let ble = match (config.ble_provisioning, board.ble) {
            (true, Some(transport)) => Some(BleProvisioning::new(transport, &config, board.identity.hardware_id())),
            (true, None) => {
                log::warn!("BLE provisioning configured but no transport available");
                None
            }
            (false, _) => None,
        };

        let ota = OtaPipeline::new(&config);
        let ui_version = ota.installed_ui_version(board.markers.as_ref());

        Self {
            network: NetworkManager::new(board.wifi, board.portal, &config),
            ble,
            clock: board.clock,
            http: board.http,
            identity: board.identity,
            markers: board.markers,
            settings,
            system: board.system,
            flash: board.flash,
            ui_files: board.ui_files,
            services: board.services,
            face: board.face,
            status_leds: board.status_leds,
            passkey_display: board.passkey_display,
            rng: board.rng,
            events: LedEvents::new(config.status_events),
            heartbeat: HeartbeatEngine::new(&config),
            ota,
            ui_version,
            online: OnlineInit::default(),
            last_flush_ms: 0,
            last_clock_tick_ms: None,
            last_daily_check_epoch: None,
            restarting: false,
            config,
        }
    }

    /// Boot-time connect: stored credentials first, then BLE or the portal
    pub fn boot(&mut self) -> BootConnect {
        log::info!(
            "{} firmware {} (UI {})",
            self.config.product_id,
            self.config.firmware_version,
            self.ui_version
        );
        log::info!("Hardware id: {}", self.identity.hardware_id());

        let result = self.network.init(self.clock.as_ref(), &mut self.events);
        if let BootConnect::NeedsProvisioning(reason) = result {
            if !self.start_provisioning(reason) && !self.network.start_portal(&mut self.events) {
                log::warn!("No provisioning path available; staying offline");
            }
        }
        result
    }

    /// One pass of the main loop
    pub fn tick(&mut self) {
        if self.restarting {
            return;
        }
        let now = self.clock.now_ms();

        // Network runs first; a BLE timeout latched last tick starts the portal now
        let ble_timed_out = self.ble.as_mut().is_some_and(|ble| ble.take_timeout());
        if let Some(transition) = self.network.process(now, &mut self.events, ble_timed_out) {
            self.on_transition(transition);
        }
        self.process_provisioning(now);

        if !self.network.is_connected() {
            self.flush_settings_if_due(now, self.config.timings.settings_flush_offline_ms);
            self.events.tick(now, self.status_leds.as_mut());
            return;
        }

        self.ensure_online_services(now);
        if self.restarting {
            return;
        }
        self.service_online(now);
        self.flush_settings_if_due(now, self.config.timings.settings_flush_online_ms);

        if self.events.tick(now, self.status_leds.as_mut()) {
            return;
        }
        if self.ble.as_ref().is_some_and(|b| b.is_active()) {
            return;
        }
        if self.face.startup_running(now) {
            return;
        }
        self.clock_tick(now);
    }

    fn process_provisioning(&mut self, now: u64) {
        let Some(ble) = self.ble.as_mut() else {
            return;
        };
        let mut io = ProvisioningIo {
            now_ms: now,
            wifi: self.network.wifi_mut(),
            display: self.passkey_display.as_mut(),
            events: &mut self.events,
        };
        ble.process(&mut io);
    }

    fn on_transition(&mut self, transition: LinkTransition) {
        match transition {
            LinkTransition::Connected => {
                log::info!("Online");
                if self.heartbeat.is_initialized() {
                    self.heartbeat.trigger();
                }
            }
            LinkTransition::Disconnected => log::warn!("Offline; online services paused"),
        }
    }

    fn flush_settings_if_due(&mut self, now: u64, interval_ms: u64) {
        if now.saturating_sub(self.last_flush_ms) < interval_ms {
            return;
        }
        self.last_flush_ms = now;
        if let Err(e) = self.settings.flush() {
            log::warn!("Settings flush failed: {e}");
        }
    }

    fn ensure_online_services(&mut self, now: u64) {
        if !self.online.web_server {
            self.online.web_server = true;
            match self.services.start_web_server() {
                Ok(()) => log::info!("Web server started"),
                Err(e) => log::error!("{e}"),
            }
        }

        if !self.online.mqtt {
            self.online.mqtt = true;
            if let Err(e) = self.services.start_mqtt(self.settings.get()) {
                log::error!("{e}");
            }
        }

        if !self.online.ui_sync {
            self.online.ui_sync = true;
            if self.config.ota_enabled && self.ota.protocol() == OtaProtocol::Legacy {
                match self.run_ota(|ota, ctx| ota.sync_ui_files(ctx)) {
                    Ok(UiSyncOutcome::Partial) => log::warn!("UI sync incomplete; will retry on next check"),
                    Ok(outcome) => log::debug!("UI sync: {outcome:?}"),
                    Err(e) => log::warn!("UI sync failed: {e}"),
                }
            }
        }

        if !self.online.update_check {
            self.online.update_check = true;
            if self.config.ota_enabled {
                self.auto_update_check("Connected to WiFi");
                if self.restarting {
                    return;
                }
            }
        }

        if !self.online.registration {
            self.online.registration = true;
            self.auto_register();
        }

        if !self.online.heartbeat {
            self.online.heartbeat = true;
            self.heartbeat.init(now);
        }
    }

    fn auto_register(&mut self) {
        if DeviceIdentity::load(self.identity.as_ref()).is_registered() {
            log::debug!("Device already has credentials; skipping registration");
            return;
        }

        let channel = self.settings.get().update_channel;
        let mut fleet = Fleet {
            http: self.http.as_mut(),
            identity: self.identity.as_mut(),
            config: &self.config,
            link_up: self.network.is_connected(),
            ui_version: &self.ui_version,
            channel,
        };
        match register_device(&mut fleet) {
            Ok(creds) => log::info!("Registered as {}", creds.device_id),
            Err(e) if e.is_already_registered() => log::debug!("Registration skipped: {e}"),
            Err(e) => log::warn!("Auto-registration failed: {e}"),
        }
    }

    fn service_online(&mut self, now: u64) {
        self.services.poll(now);

        let wall = self.clock.local_time();
        let settings = self.settings.get();
        let telemetry = DeviceTelemetry {
            system: self.system.as_ref(),
            rssi: self.network.wifi().rssi(),
            settings,
        };
        let mut fleet = Fleet {
            http: self.http.as_mut(),
            identity: self.identity.as_mut(),
            config: &self.config,
            link_up: self.network.is_connected(),
            ui_version: &self.ui_version,
            channel: settings.update_channel,
        };
        match self.heartbeat.process(now, wall, &mut fleet, &telemetry) {
            HeartbeatOutcome::Reregistered { resent } => {
                log::info!("Heartbeat credentials refreshed (resent: {resent})")
            }
            HeartbeatOutcome::Stopped => log::error!("Heartbeat stopped until reboot"),
            _ => {}
        }
    }

    fn clock_tick(&mut self, now: u64) {
        if let Some(last) = self.last_clock_tick_ms {
            if now.saturating_sub(last) < self.config.timings.clock_tick_ms {
                return;
            }
        }
        self.last_clock_tick_ms = Some(now);

        let local = self.clock.local_time();
        self.face.render(local, self.settings.get());

        if !self.config.ota_enabled {
            return;
        }
        let Some(local) = local else {
            return;
        };
        let timings = self.config.timings;
        if local.hour() != timings.daily_check_hour || local.minute() != timings.daily_check_minute {
            return;
        }
        let epoch = local.and_utc().timestamp();
        let due = self
            .last_daily_check_epoch
            .map_or(true, |last| epoch - last > timings.daily_check_spacing_secs);
        if due {
            self.last_daily_check_epoch = Some(epoch);
            self.auto_update_check("Daily firmware check");
        }
    }

    /// Automatic check honouring the auto-update setting and channel
    fn auto_update_check(&mut self, trigger: &str) {
        if !OtaPipeline::auto_update_allowed(self.settings.get()) {
            log::info!("{trigger}: automatic firmware updates disabled, skipping check");
            return;
        }
        log::info!("{trigger}: starting firmware check");
        if let Err(e) = self.check_for_update_now() {
            log::error!("Firmware check failed: {e}");
        }
    }

    fn run_ota<T>(
        &mut self,
        op: impl FnOnce(&OtaPipeline, &mut OtaContext<'_>) -> Result<T, OtaError>,
    ) -> Result<T, OtaError> {
        let settings = self.settings.get();
        let product_id = self.config.ota_product_id(&settings.grid_variant);
        let channel = settings.update_channel;

        let mut ctx = OtaContext {
            http: self.http.as_mut(),
            flash: self.flash.as_mut(),
            markers: self.markers.as_mut(),
            ui_files: self.ui_files.as_mut().map(|fs| fs.as_mut() as &mut dyn UiFileStore),
            events: &mut self.events,
            channel,
            product_id: &product_id,
        };
        let result = op(&self.ota, &mut ctx);
        self.ui_version = self.ota.installed_ui_version(self.markers.as_ref());
        result
    }

    fn restart_after_update(&mut self, reason: RestartReason) {
        log::info!("Update applied ({reason:?}); restarting");
        self.restarting = true;
        self.clock.delay_ms(self.config.timings.apply_delay_ms);
        safe_restart(
            self.system.as_mut(),
            &mut self.settings,
            self.clock.as_ref(),
            self.config.timings.restart_settle_ms,
        );
    }

    /// Immediate firmware check (web UI, MQTT command or schedule).
    /// Restarts the device when an update was applied.
    pub fn check_for_update_now(&mut self) -> Result<UpdateOutcome, OtaError> {
        let outcome = self.run_ota(|ota, ctx| ota.check_for_update(ctx))?;
        if let UpdateOutcome::RestartRequired(reason) = outcome {
            self.restart_after_update(reason);
        }
        Ok(outcome)
    }

    /// Re-downloads the web UI matching the bundled UI version
    pub fn sync_configured_ui(&mut self) -> Result<UiSyncOutcome, OtaError> {
        self.run_ota(|ota, ctx| ota.sync_configured_ui(ctx))
    }

    /// Opens a BLE session; false when the product has no BLE transport
    pub fn start_provisioning(&mut self, reason: ProvisioningReason) -> bool {
        let Some(ble) = self.ble.as_mut() else {
            return false;
        };
        let mut io = ProvisioningIo {
            now_ms: self.clock.now_ms(),
            wifi: self.network.wifi_mut(),
            display: self.passkey_display.as_mut(),
            events: &mut self.events,
        };
        ble.start(reason, self.rng.as_mut(), &mut io);
        ble.is_active()
    }

    pub fn stop_provisioning(&mut self) {
        let now = self.clock.now_ms();
        if let Some(ble) = self.ble.as_mut() {
            let mut io = ProvisioningIo {
                now_ms: now,
                wifi: self.network.wifi_mut(),
                display: self.passkey_display.as_mut(),
                events: &mut self.events,
            };
            ble.stop(&mut io);
        }
    }

    /// Forgets the WiFi network and reboots into provisioning
    pub fn reset_wifi_settings(&mut self) {
        self.network.clear_credentials();
        self.restarting = true;
        safe_restart(
            self.system.as_mut(),
            &mut self.settings,
            self.clock.as_ref(),
            self.config.timings.restart_settle_ms,
        );
    }

    /// Flushes settings and reboots
    pub fn restart(&mut self) {
        self.restarting = true;
        safe_restart(
            self.system.as_mut(),
            &mut self.settings,
            self.clock.as_ref(),
            self.config.timings.restart_settle_ms,
        );
    }

    /// Mutates settings in memory; persisted by the next timed flush
    pub fn update_settings(&mut self, f: impl FnOnce(&mut DeviceSettings)) {
        self.settings.update(f);
    }

    pub fn settings(&self) -> &DeviceSettings {
        self.settings.get()
    }

    pub fn config(&self) -> &ProductConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkManager<W> {
        &self.network
    }

    pub fn provisioning(&self) -> Option<&BleProvisioning<B>> {
        self.ble.as_ref()
    }

    pub fn heartbeat(&self) -> &HeartbeatEngine {
        &self.heartbeat
    }

    pub fn events(&self) -> &LedEvents {
        &self.events
    }

    pub fn online_init(&self) -> OnlineInit {
        self.online
    }

    pub fn ui_version(&self) -> &str {
        &self.ui_version
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting
    }
}
