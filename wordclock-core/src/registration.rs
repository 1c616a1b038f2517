use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{ProductConfig, UpdateChannel};
use crate::http::{HttpClient, HttpError, Request};
use crate::identity::IdentityStore;
use crate::persistence::StorageError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("WiFi not connected")]
    NotConnected,

    #[error("registration blocked on this device")]
    Blocked,

    #[error("HTTP error: {0}")]
    Transport(#[from] HttpError),

    /// 409; the fleet already knows this hardware id
    #[error("{0}")]
    AlreadyRegistered(String),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    MalformedResponse(String),

    #[error("Missing token or deviceId")]
    MissingCredentials,

    #[error("failed to store credentials: {0}")]
    Persist(#[from] StorageError),
}

impl RegistrationError {
    pub fn is_already_registered(&self) -> bool {
        matches!(self, Self::AlreadyRegistered(_))
    }
}

/// Everything a fleet exchange needs, borrowed for one call
pub struct Fleet<'a> {
    pub http: &'a mut dyn HttpClient,
    pub identity: &'a mut dyn IdentityStore,
    pub config: &'a ProductConfig,
    pub link_up: bool,
    pub ui_version: &'a str,
    pub channel: UpdateChannel,
}

impl Fleet<'_> {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoints.api_base.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub device_id: String,
    pub device_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    hardware_id: &'a str,
    product_id: &'a str,
    firmware: &'a str,
    ui_firmware: &'a str,
    ota_channel: &'a str,
}

fn first_str<'v>(doc: &'v Value, keys: &[&str]) -> Option<&'v str> {
    keys.iter()
        .filter_map(|k| doc.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Trades the hardware id for a device id and token, persisting both.
///
/// Safe to call repeatedly; a device the fleet already knows gets
/// [`RegistrationError::AlreadyRegistered`], which callers must not retry.
pub fn register_device(fleet: &mut Fleet<'_>) -> Result<Credentials, RegistrationError> {
    if !fleet.link_up {
        return Err(RegistrationError::NotConnected);
    }
    if fleet.identity.registration_blocked() {
        return Err(RegistrationError::Blocked);
    }

    let hardware_id = fleet.identity.hardware_id();
    let body = serde_json::to_vec(&RegisterRequest {
        hardware_id: &hardware_id,
        product_id: &fleet.config.product_id,
        firmware: &fleet.config.firmware_version,
        ui_firmware: fleet.ui_version,
        ota_channel: fleet.channel.as_str(),
    })
    .map_err(|e| RegistrationError::MalformedResponse(e.to_string()))?;

    let url = fleet.url("/api/v1/devices/register");
    let endpoints = &fleet.config.endpoints;
    let request = Request::post_json(&url, &body)
        .header(&endpoints.provisioning_header, &endpoints.provisioning_secret);

    log::debug!("Registering hardware {hardware_id} at {url}");
    let response = fleet.http.send(&request)?;
    let text = response.text();

    if !response.is_success() {
        let api_error = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|doc| doc.get("error").and_then(Value::as_str).map(str::to_string))
            .filter(|s| !s.is_empty());
        if response.status == 409 {
            return Err(RegistrationError::AlreadyRegistered(
                api_error.unwrap_or_else(|| "Device already registered".to_string()),
            ));
        }
        return Err(RegistrationError::Rejected {
            status: response.status,
            message: api_error.unwrap_or_else(|| format!("HTTP {}: {}", response.status, text)),
        });
    }

    let doc: Value =
        serde_json::from_str(&text).map_err(|e| RegistrationError::MalformedResponse(e.to_string()))?;
    let token = first_str(&doc, &["deviceToken", "token"]);
    let id = first_str(&doc, &["deviceId", "device_id"]);
    let (Some(token), Some(id)) = (token, id) else {
        return Err(RegistrationError::MissingCredentials);
    };

    persist_credentials(fleet.identity, id, token)?;

    log::info!("Device registered with fleet");
    Ok(Credentials {
        device_id: id.to_string(),
        device_token: token.to_string(),
    })
}

/// Stores id and token as a pair. A failed id write puts the previous token
/// back so the store never holds a token next to a stale id.
fn persist_credentials(identity: &mut dyn IdentityStore, id: &str, token: &str) -> Result<(), StorageError> {
    let previous_token = identity.device_token().unwrap_or_default();
    identity.set_device_token(token)?;
    if let Err(e) = identity.set_device_id(id) {
        if let Err(restore) = identity.set_device_token(&previous_token) {
            log::warn!("Could not restore previous device token: {restore}");
        }
        return Err(e);
    }
    Ok(())
}
