use log::LevelFilter;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Wire protocol used to discover updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaProtocol {
    /// Single manifest document with optional per-channel blocks
    Legacy,
    /// Channel descriptor pointing at separate firmware/filesystem manifests
    V2,
}

/// Update track a device converges to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    #[default]
    Stable,
    Early,
    Develop,
}

impl UpdateChannel {
    /// Case-insensitive parse; anything unknown falls back to stable
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "early" => Self::Early,
            "develop" => Self::Develop,
            _ => Self::Stable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Early => "early",
            Self::Develop => "develop",
        }
    }
}

impl fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UpdateChannel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::normalize(&raw))
    }
}

/// Hardware line; drives OTA product-id remapping for multi-grid builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductVariant {
    Nextgen,
    Legacy,
    Logo,
}

/// Fleet backend endpoints and header names
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: String,
    pub ota_base: String,
    /// Legacy single-manifest URL
    pub legacy_manifest_url: String,
    /// Base for UI assets of a tagged release, `{base}/v{version}/data/{file}`
    pub ui_release_base: String,
    pub provisioning_header: String,
    pub provisioning_secret: String,
    pub device_header: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            ota_base: String::new(),
            legacy_manifest_url: String::new(),
            ui_release_base: "https://raw.githubusercontent.com/lumetric-io/Wordclock".to_string(),
            provisioning_header: "X-Provisioning-Key".to_string(),
            provisioning_secret: String::new(),
            device_header: "X-Device-Token".to_string(),
        }
    }
}

/// Scheduler tunables shared by the state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub wifi_connect_max_retries: u32,
    pub wifi_connect_retry_delay_ms: u32,
    pub wifi_reconnect_interval_ms: u64,
    pub portal_process_passes: u32,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_startup_delay_ms: u64,
    pub heartbeat_retry_interval_ms: u64,
    pub settings_flush_online_ms: u64,
    pub settings_flush_offline_ms: u64,
    pub clock_tick_ms: u64,
    pub daily_check_hour: u32,
    pub daily_check_minute: u32,
    pub daily_check_spacing_secs: i64,
    pub restart_settle_ms: u32,
    pub apply_delay_ms: u32,
    pub ble_status_renotify_ms: u64,
}

impl Timings {
    /// BLE connect attempts share the boot retry budget
    pub fn wifi_connect_window_ms(&self) -> u64 {
        u64::from(self.wifi_connect_max_retries) * u64::from(self.wifi_connect_retry_delay_ms)
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            wifi_connect_max_retries: 20,
            wifi_connect_retry_delay_ms: 500,
            wifi_reconnect_interval_ms: 15_000,
            portal_process_passes: 5,
            heartbeat_interval_ms: crate::heartbeat::HEARTBEAT_INTERVAL_MS,
            heartbeat_startup_delay_ms: crate::heartbeat::HEARTBEAT_STARTUP_DELAY_MS,
            heartbeat_retry_interval_ms: crate::heartbeat::HEARTBEAT_RETRY_INTERVAL_MS,
            settings_flush_online_ms: 1_000,
            settings_flush_offline_ms: 5_000,
            clock_tick_ms: 50,
            daily_check_hour: 2,
            daily_check_minute: 0,
            daily_check_spacing_secs: 3_600,
            restart_settle_ms: 100,
            apply_delay_ms: 500,
            ble_status_renotify_ms: 1_000,
        }
    }
}

/// When heartbeats may leave the device relative to the wall clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Inclusive seconds-of-minute range heartbeats are sent in
    pub window_start_sec: u32,
    pub window_end_sec: u32,
    /// Treat every second as inside the window while NTP is unsynced
    pub bypass_window_when_unsynced: bool,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            window_start_sec: 28,
            window_end_sec: 32,
            bypass_window_when_unsynced: true,
        }
    }
}

/// BLE passkey presentation on the letter grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasskeyTiming {
    pub on_ms: u64,
    pub off_ms: u64,
}

impl Default for PasskeyTiming {
    fn default() -> Self {
        Self {
            on_ms: 700,
            off_ms: 300,
        }
    }
}

/// Build-time capability descriptor for one product
#[derive(Debug, Clone)]
pub struct ProductConfig {
    pub product_id: String,
    pub firmware_version: String,
    /// UI bundle shipped inside the firmware image
    pub ui_version: String,
    pub variant: ProductVariant,
    pub ota_enabled: bool,
    pub ota_protocol: OtaProtocol,
    pub ota_no_cache: bool,
    pub ble_provisioning: bool,
    pub captive_portal: bool,
    pub passkey_display: bool,
    pub passkey_timing: PasskeyTiming,
    /// `None` disables the BLE session timeout
    pub ble_timeout_ms: Option<u64>,
    pub ble_name_prefix: String,
    pub status_events: bool,
    pub default_channel: UpdateChannel,
    pub log_level: LevelFilter,
    pub access_point_name: String,
    pub access_point_password: String,
    pub endpoints: Endpoints,
    pub timings: Timings,
    pub heartbeat_policy: HeartbeatPolicy,
}

impl ProductConfig {
    fn base(product_id: &str, firmware: &str, ui: &str, variant: ProductVariant) -> Self {
        Self {
            product_id: product_id.to_string(),
            firmware_version: firmware.to_string(),
            ui_version: ui.to_string(),
            variant,
            ota_enabled: true,
            ota_protocol: OtaProtocol::V2,
            ota_no_cache: true,
            ble_provisioning: false,
            captive_portal: true,
            passkey_display: false,
            passkey_timing: PasskeyTiming::default(),
            ble_timeout_ms: Some(15_000),
            ble_name_prefix: format!("{product_id}-"),
            status_events: true,
            default_channel: UpdateChannel::Stable,
            log_level: LevelFilter::Error,
            access_point_name: "Wordclock_AP".to_string(),
            access_point_password: String::new(),
            endpoints: Endpoints::default(),
            timings: Timings::default(),
            heartbeat_policy: HeartbeatPolicy::default(),
        }
    }

    pub fn nextgen() -> Self {
        Self::base(
            "wordclock-nextgen",
            "nextgen-0.1.1-dev.6",
            "ui-nextgen-0.1.1-dev.6",
            ProductVariant::Nextgen,
        )
    }

    /// Multi-grid classic hardware on the single-manifest protocol
    pub fn legacy() -> Self {
        Self {
            ota_protocol: OtaProtocol::Legacy,
            status_events: false,
            ..Self::base(
                "wordclock-legacy",
                "legacy-26.2.6-rc.13",
                "ui-legacy-26.2.6-rc.13",
                ProductVariant::Legacy,
            )
        }
    }

    pub fn logo() -> Self {
        Self {
            status_events: false,
            default_channel: UpdateChannel::Early,
            log_level: LevelFilter::Debug,
            ..Self::base(
                "wordclock-logo",
                "logo-26.2.10-rc.7",
                "ui-logo-26.2.10-rc.7",
                ProductVariant::Logo,
            )
        }
    }

    /// Logo hardware provisioned over BLE with the passkey on the grid
    pub fn logo_ble() -> Self {
        Self {
            ble_provisioning: true,
            passkey_display: true,
            ..Self::logo()
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Product id used for OTA lookups; multi-grid builds migrate to a
    /// grid-specific product once the user has picked a grid
    pub fn ota_product_id(&self, grid_variant: &str) -> String {
        let mapped = match self.variant {
            ProductVariant::Legacy => match grid_variant {
                "NL_V1" => Some("wordclock-legacy-nl-v1"),
                "NL_V2" => Some("wordclock-legacy-nl-v2"),
                "NL_V3" => Some("wordclock-legacy-nl-v3"),
                "NL_V4" => Some("wordclock-legacy-nl-v4"),
                "NL_50x50_V1" => Some("wordclock-legacy-nl-50x50-v1"),
                "NL_50x50_V2" => Some("wordclock-legacy-nl-50x50-v2"),
                "NL_50x50_V3" => Some("wordclock-legacy-nl-50x50-v3"),
                other => {
                    log::warn!("Unknown grid variant for OTA mapping: {other}");
                    None
                }
            },
            ProductVariant::Logo => match grid_variant {
                "NL_55x50_LOGO_V1" => Some("wordclock-logo-nl-55x50-v1"),
                "NL_100x100_LOGO_V1" => Some("wordclock-logo-nl-100x100-v1"),
                other => {
                    log::warn!("Unknown grid variant for OTA mapping: {other}");
                    None
                }
            },
            ProductVariant::Nextgen => None,
        };
        mapped.map(str::to_string).unwrap_or_else(|| self.product_id.clone())
    }
}
