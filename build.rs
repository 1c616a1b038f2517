use std::fs;
use std::path::Path;

/// Keys forwarded from `secrets.env` to the firmware as compile-time env vars
const SECRET_KEYS: &[&str] = &[
    "API_BASE_URL",
    "OTA_BASE_URL",
    "VERSION_URL_BASE",
    "REGISTER_API_TOKEN",
    "AP_PASSWORD",
];

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");

    let secrets_path = "secrets.env";
    println!("cargo:rerun-if-changed={}", secrets_path);

    let contents = if Path::new(secrets_path).exists() {
        fs::read_to_string(secrets_path)?
    } else {
        println!("cargo:warning=secrets.env not found! Copy secrets.env.example to secrets.env and fill in the backend URLs.");
        String::new()
    };

    for key in SECRET_KEYS {
        let value = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .find(|(k, _)| k.trim() == *key)
            .map(|(_, v)| v.trim().trim_matches('"').to_string())
            .unwrap_or_default();
        println!("cargo:rustc-env={}={}", key, value);
    }

    Ok(())
}
