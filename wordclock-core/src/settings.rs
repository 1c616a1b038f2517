use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ProductConfig, UpdateChannel};
use crate::persistence::StorageError;

/// Current layout of the persisted settings blob
pub const SETTINGS_SCHEMA: u32 = 2;

/// User-facing settings persisted as one JSON blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub brightness: u8,
    pub auto_update: bool,
    pub update_channel: UpdateChannel,
    pub grid_variant: String,
    pub night_mode_active: bool,
    pub setup_complete: bool,
    /// Empty disables the MQTT client
    pub mqtt_broker: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            brightness: 5,
            auto_update: true,
            update_channel: UpdateChannel::Stable,
            grid_variant: String::new(),
            night_mode_active: false,
            setup_complete: false,
            mqtt_broker: String::new(),
        }
    }
}

impl DeviceSettings {
    pub fn for_product(config: &ProductConfig) -> Self {
        Self {
            update_channel: config.default_channel,
            ..Self::default()
        }
    }
}

/// Raw blob storage behind the settings cache
pub trait SettingsBackend {
    fn load(&mut self) -> Result<Option<Vec<u8>>, StorageError>;
    fn save(&mut self, blob: &[u8]) -> Result<(), StorageError>;
    fn schema_version(&mut self) -> Result<Option<u32>, StorageError>;
    fn set_schema_version(&mut self, version: u32) -> Result<(), StorageError>;
}

/// In-memory settings with timer-driven flushing
pub struct SettingsStore {
    current: DeviceSettings,
    dirty: bool,
    backend: Box<dyn SettingsBackend>,
}

impl SettingsStore {
    /// Runs the one-time migration, then loads. Any failure falls back to
    /// `defaults` so the clock keeps running.
    pub fn open(mut backend: Box<dyn SettingsBackend>, defaults: DeviceSettings) -> Self {
        if let Err(e) = migrate(backend.as_mut()) {
            log::warn!("Settings migration failed: {e}");
        }

        let (current, dirty) = match backend.load() {
            Ok(Some(blob)) => match serde_json::from_slice::<DeviceSettings>(&blob) {
                Ok(settings) => {
                    log::info!("Loaded settings from storage");
                    (settings, false)
                }
                Err(e) => {
                    log::warn!("Stored settings unreadable ({e}), using defaults");
                    (defaults, true)
                }
            },
            Ok(None) => {
                log::info!("No stored settings, using defaults");
                (defaults, true)
            }
            Err(e) => {
                log::warn!("Failed to load settings: {e}, using defaults");
                (defaults, true)
            }
        };

        Self {
            current,
            dirty,
            backend,
        }
    }

    pub fn get(&self) -> &DeviceSettings {
        &self.current
    }

    /// Mutate in memory; persisted on the next flush
    pub fn update(&mut self, f: impl FnOnce(&mut DeviceSettings)) {
        let before = self.current.clone();
        f(&mut self.current);
        if self.current != before {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the blob if anything changed. Returns whether a write happened.
    pub fn flush(&mut self) -> Result<bool, StorageError> {
        if !self.dirty {
            return Ok(false);
        }
        let blob = serde_json::to_vec(&self.current).map_err(|e| StorageError::Write {
            key: "settings".to_string(),
            reason: e.to_string(),
        })?;
        self.backend.save(&blob)?;
        self.dirty = false;
        log::debug!("Settings flushed ({} bytes)", blob.len());
        Ok(true)
    }
}

/// Legacy key names from the first blob layout
const RENAMED_KEYS: [(&str, &str); 4] = [
    ("channel", "update_channel"),
    ("autoUpdate", "auto_update"),
    ("gridVariant", "grid_variant"),
    ("setupDone", "setup_complete"),
];

fn migrate(backend: &mut dyn SettingsBackend) -> Result<(), StorageError> {
    let version = backend.schema_version()?;
    if version == Some(SETTINGS_SCHEMA) {
        return Ok(());
    }

    if let Some(blob) = backend.load()? {
        if let Ok(Value::Object(mut map)) = serde_json::from_slice::<Value>(&blob) {
            for (old, new) in RENAMED_KEYS {
                if let Some(v) = map.remove(old) {
                    map.entry(new.to_string()).or_insert(v);
                }
            }
            let migrated = serde_json::to_vec(&Value::Object(map)).map_err(|e| StorageError::Write {
                key: "settings".to_string(),
                reason: e.to_string(),
            })?;
            backend.save(&migrated)?;
            log::info!("Migrated settings from schema {:?} to {}", version, SETTINGS_SCHEMA);
        }
    }

    backend.set_schema_version(SETTINGS_SCHEMA)
}
