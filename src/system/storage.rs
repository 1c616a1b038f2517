//! NVS-backed persistence for identity, version markers and settings.

use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::EspError;
use wordclock_core::identity::{format_hardware_id, IdentityStore};
use wordclock_core::persistence::{MarkerKind, MarkerStore, StorageError};
use wordclock_core::settings::SettingsBackend;

const SYSTEM_NAMESPACE: &str = "wc_system";
const SETTINGS_NAMESPACE: &str = "wc_settings";

const KEY_DEVICE_ID: &str = "device_id";
const KEY_DEVICE_TOKEN: &str = "device_token";
const KEY_REG_BLOCKED: &str = "reg_blocked";
const KEY_SETTINGS: &str = "settings";
const KEY_SCHEMA: &str = "schema";

const MAX_STR_LEN: usize = 256;
const MAX_BLOB_LEN: usize = 4096;

fn write_err(key: &str, e: EspError) -> StorageError {
    StorageError::Write {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn read_err(key: &str, e: EspError) -> StorageError {
    StorageError::Read {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

/// Reads a string key, treating errors and empty values as absent
fn read_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
    let mut buf = [0u8; MAX_STR_LEN];
    match nvs.get_str(key, &mut buf) {
        Ok(Some(value)) if !value.is_empty() => Some(value.to_string()),
        Ok(_) => None,
        Err(e) => {
            log::warn!("NVS read {} failed: {:?}", key, e);
            None
        }
    }
}

/// Chip MAC as the 12-character hardware id
pub fn read_hardware_id() -> String {
    let mut mac = [0u8; 6];
    let result = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if result != esp_idf_svc::sys::ESP_OK as i32 {
        log::error!("Failed to read eFuse MAC: {}", result);
    }
    format_hardware_id(mac)
}

pub struct NvsIdentity {
    nvs: EspNvs<NvsDefault>,
    hardware_id: String,
}

impl NvsIdentity {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, SYSTEM_NAMESPACE, true)?;
        Ok(Self {
            nvs,
            hardware_id: read_hardware_id(),
        })
    }
}

impl IdentityStore for NvsIdentity {
    fn hardware_id(&self) -> String {
        self.hardware_id.clone()
    }

    fn device_id(&self) -> Option<String> {
        read_str(&self.nvs, KEY_DEVICE_ID)
    }

    fn set_device_id(&mut self, id: &str) -> Result<(), StorageError> {
        self.nvs.set_str(KEY_DEVICE_ID, id).map_err(|e| write_err(KEY_DEVICE_ID, e))
    }

    fn device_token(&self) -> Option<String> {
        read_str(&self.nvs, KEY_DEVICE_TOKEN)
    }

    fn set_device_token(&mut self, token: &str) -> Result<(), StorageError> {
        self.nvs
            .set_str(KEY_DEVICE_TOKEN, token)
            .map_err(|e| write_err(KEY_DEVICE_TOKEN, e))
    }

    fn registration_blocked(&self) -> bool {
        matches!(self.nvs.get_u8(KEY_REG_BLOCKED), Ok(Some(1)))
    }

    fn set_registration_blocked(&mut self, blocked: bool) -> Result<(), StorageError> {
        self.nvs
            .set_u8(KEY_REG_BLOCKED, u8::from(blocked))
            .map_err(|e| write_err(KEY_REG_BLOCKED, e))
    }
}

pub struct NvsMarkers {
    nvs: EspNvs<NvsDefault>,
}

impl NvsMarkers {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, SYSTEM_NAMESPACE, true)?,
        })
    }
}

impl MarkerStore for NvsMarkers {
    fn read(&self, kind: MarkerKind) -> Option<String> {
        read_str(&self.nvs, kind.key())
    }

    fn write(&mut self, kind: MarkerKind, version: &str) -> Result<(), StorageError> {
        self.nvs.set_str(kind.key(), version).map_err(|e| write_err(kind.key(), e))
    }
}

/// Settings JSON blob plus the schema version used by migration
pub struct NvsSettings {
    nvs: EspNvs<NvsDefault>,
}

impl NvsSettings {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, SETTINGS_NAMESPACE, true)?,
        })
    }
}

impl SettingsBackend for NvsSettings {
    fn load(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        let mut buf = vec![0u8; MAX_BLOB_LEN];
        let blob = self
            .nvs
            .get_blob(KEY_SETTINGS, &mut buf)
            .map_err(|e| read_err(KEY_SETTINGS, e))?;
        Ok(blob.map(<[u8]>::to_vec))
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), StorageError> {
        self.nvs.set_blob(KEY_SETTINGS, blob).map_err(|e| write_err(KEY_SETTINGS, e))
    }

    fn schema_version(&mut self) -> Result<Option<u32>, StorageError> {
        self.nvs.get_u32(KEY_SCHEMA).map_err(|e| read_err(KEY_SCHEMA, e))
    }

    fn set_schema_version(&mut self, version: u32) -> Result<(), StorageError> {
        self.nvs.set_u32(KEY_SCHEMA, version).map_err(|e| write_err(KEY_SCHEMA, e))
    }
}
