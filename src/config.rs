use log::LevelFilter;
use wordclock_core::config::Endpoints;
use wordclock_core::ProductConfig;

// Backend URLs and secrets come from secrets.env via build.rs.
// They are empty when the file is missing, which disables the fleet API.
const API_BASE_URL: &str = env!("API_BASE_URL");
const OTA_BASE_URL: &str = env!("OTA_BASE_URL");
const VERSION_URL_BASE: &str = env!("VERSION_URL_BASE");
const REGISTER_API_TOKEN: &str = env!("REGISTER_API_TOKEN");
const AP_PASSWORD: &str = env!("AP_PASSWORD");

pub const MDNS_HOSTNAME: &str = "wordclock";

/// Strip data pin per product
pub const DATA_PIN: u8 = 4;

/// Pixels on the word grid strip, minute dots included
#[cfg(any(feature = "product-logo", feature = "product-logo-ble"))]
pub const NUM_LEDS: usize = 161;
#[cfg(not(any(feature = "product-logo", feature = "product-logo-ble")))]
pub const NUM_LEDS: usize = 114;

fn preset() -> ProductConfig {
    if cfg!(feature = "product-logo-ble") {
        ProductConfig::logo_ble()
    } else if cfg!(feature = "product-logo") {
        ProductConfig::logo()
    } else if cfg!(feature = "product-legacy") {
        ProductConfig::legacy()
    } else {
        ProductConfig::nextgen()
    }
}

/// The product descriptor this image was built for
pub fn product() -> ProductConfig {
    let mut config = preset().with_endpoints(Endpoints {
        api_base: API_BASE_URL.to_string(),
        ota_base: OTA_BASE_URL.to_string(),
        legacy_manifest_url: VERSION_URL_BASE.to_string(),
        provisioning_secret: REGISTER_API_TOKEN.to_string(),
        ..Endpoints::default()
    });
    config.access_point_password = AP_PASSWORD.to_string();

    if API_BASE_URL.is_empty() {
        log::warn!("API_BASE_URL not set, registration and heartbeat will fail");
    }
    if OTA_BASE_URL.is_empty() && VERSION_URL_BASE.is_empty() {
        log::warn!("No OTA endpoint configured");
        config.ota_enabled = false;
    }
    config
}

/// Serial log level; debug builds always log at least `Debug`
pub fn log_level(config: &ProductConfig) -> LevelFilter {
    if cfg!(debug_assertions) {
        config.log_level.max(LevelFilter::Debug)
    } else {
        config.log_level
    }
}
