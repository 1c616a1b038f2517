use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::prelude::*;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_sys as _; // Binstart
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use wordclock_core::network::{BootConnect, CaptivePortal, WifiDriver};
use wordclock_core::ota::UiFileStore;
use wordclock_core::provisioning::ProvisioningReason;
use wordclock_core::{Board, OtaProtocol, Runtime};

// Generate ESP-IDF app descriptor
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod ble;
mod clock;
mod config;
mod leds;
mod logging;
mod network;
mod ota;
mod system;

use crate::ble::NimbleTransport;
use crate::leds::{CornerStatusLeds, GridFace, GridPasskeyDisplay, LedStrip};
use crate::network::services::{AdminBridge, AdminCommand, StatusSnapshot};
use crate::network::{EspHttpClient, EspOnlineServices, EspWifiDriver, SetupPortal};
use crate::ota::{EspFlashTarget, LittleFsUiStore};
use crate::system::{EspSystem, NvsIdentity, NvsMarkers, NvsSettings};

type ClockRuntime = Runtime<EspWifiDriver, NimbleTransport>;

const LOOP_DELAY_MS: u32 = 10;
const SNAPSHOT_INTERVAL_MS: u64 = 1_000;

fn main() -> Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    let product = config::product();
    if let Err(e) = logging::init_logger(config::log_level(&product)) {
        println!("Logger init failed: {:?}", e);
    }

    info!("Boot reason: {}", system::reset::get_reset_reason());
    info!("Free heap: {} bytes", unsafe { esp_idf_sys::esp_get_free_heap_size() });

    // Running image booted far enough to reach main; keep it
    let result = unsafe { esp_idf_sys::esp_ota_mark_app_valid_cancel_rollback() };
    if result != esp_idf_sys::ESP_OK as i32 {
        log::debug!("Rollback cancel returned {}", result);
    }

    if let Err(e) = ota::mount_ui() {
        log::warn!("UI filesystem unavailable: {}", e);
    }

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let strip = Rc::new(RefCell::new(LedStrip::new(
        peripherals.rmt.channel0,
        peripherals.pins.gpio4,
        config::NUM_LEDS,
    )?));
    info!("LED strip: {} pixels on GPIO{}", config::NUM_LEDS, config::DATA_PIN);

    let hardware_id = system::storage::read_hardware_id();
    let bridge = AdminBridge::default();

    let wifi = EspWifiDriver::new(peripherals.modem, sys_loop, nvs.clone())?;
    // WiFi is started now, so esp_random draws from RF noise
    let seed = hardware_seed();

    let board = Board {
        wifi,
        portal: product
            .captive_portal
            .then(|| Box::new(SetupPortal::new()) as Box<dyn CaptivePortal>),
        ble: product.ble_provisioning.then(NimbleTransport::new),
        clock: Box::new(clock::EspClock::new(clock::TZ_INFO)?),
        http: Box::new(EspHttpClient::new()),
        identity: Box::new(NvsIdentity::new(nvs.clone())?),
        markers: Box::new(NvsMarkers::new(nvs.clone())?),
        settings: Box::new(NvsSettings::new(nvs)?),
        system: Box::new(EspSystem::new()),
        flash: Box::new(EspFlashTarget::new()),
        ui_files: (product.ota_protocol == OtaProtocol::Legacy)
            .then(|| Box::new(LittleFsUiStore::new()) as Box<dyn UiFileStore>),
        services: Box::new(EspOnlineServices::new(bridge.clone(), hardware_id.clone())),
        face: Box::new(GridFace::new(strip.clone())),
        status_leds: Box::new(CornerStatusLeds::new(strip.clone())),
        passkey_display: Box::new(GridPasskeyDisplay::new(strip)),
        rng: Box::new(StdRng::seed_from_u64(seed)),
    };

    let mut runtime: ClockRuntime = Runtime::new(product, board);
    match runtime.boot() {
        BootConnect::Connected => info!("WiFi connected at boot"),
        BootConnect::NeedsProvisioning(reason) => info!("Provisioning needed: {}", reason.as_str()),
        BootConnect::PortalStarted => info!("Setup portal started"),
        BootConnect::Offline => log::warn!("Booted offline"),
    }

    let mut last_snapshot_ms = 0;
    loop {
        runtime.tick();
        if runtime.is_restarting() {
            FreeRtos::delay_ms(100);
            continue;
        }

        while let Some(command) = bridge.next_command() {
            handle_command(&mut runtime, command);
        }

        let now = uptime_ms();
        if now.saturating_sub(last_snapshot_ms) >= SNAPSHOT_INTERVAL_MS {
            bridge.publish(snapshot(&runtime, &hardware_id));
            last_snapshot_ms = now;
        }

        FreeRtos::delay_ms(LOOP_DELAY_MS);
    }
}

fn handle_command(runtime: &mut ClockRuntime, command: AdminCommand) {
    info!("Admin command: {:?}", command);
    match command {
        AdminCommand::CheckForUpdate => match runtime.check_for_update_now() {
            Ok(outcome) => info!("Update check: {:?}", outcome),
            Err(e) => log::warn!("Update check failed: {}", e),
        },
        AdminCommand::SyncUi => match runtime.sync_configured_ui() {
            Ok(outcome) => info!("UI sync: {:?}", outcome),
            Err(e) => log::warn!("UI sync failed: {}", e),
        },
        AdminCommand::StartProvisioning => {
            if !runtime.start_provisioning(ProvisioningReason::ManualTrigger) {
                log::warn!("BLE provisioning not available on this product");
            }
        }
        AdminCommand::ResetWifi => runtime.reset_wifi_settings(),
        AdminCommand::Restart => runtime.restart(),
        AdminCommand::UpdateSettings(patch) => runtime.update_settings(|s| patch.apply(s)),
    }
}

fn snapshot(runtime: &ClockRuntime, hardware_id: &str) -> StatusSnapshot {
    let wifi = runtime.network().wifi();
    StatusSnapshot {
        hardware_id: hardware_id.to_string(),
        firmware: runtime.config().firmware_version.clone(),
        ui: runtime.ui_version().to_string(),
        ssid: wifi.ssid(),
        rssi: wifi.rssi(),
        ip: wifi.local_ip().map(|ip| ip.to_string()),
        settings: runtime.settings().clone(),
        heartbeat_status: runtime.heartbeat().last_http_status(),
        provisioning: runtime
            .provisioning()
            .filter(|ble| ble.is_active())
            .map(|ble| ble.state_name()),
    }
}

fn uptime_ms() -> u64 {
    (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000) as u64
}

/// Only a true RNG while WiFi or BT is running
fn hardware_seed() -> u64 {
    let (hi, lo) = unsafe { (esp_idf_sys::esp_random(), esp_idf_sys::esp_random()) };
    (u64::from(hi) << 32) | u64::from(lo)
}
