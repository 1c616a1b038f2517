use crate::persistence::StorageError;

/// Key-value persistence for the fleet identity
pub trait IdentityStore {
    /// 12 upper-hex chars derived from the chip MAC, stable across boots
    fn hardware_id(&self) -> String;

    fn device_id(&self) -> Option<String>;
    fn set_device_id(&mut self, id: &str) -> Result<(), StorageError>;

    fn device_token(&self) -> Option<String>;
    fn set_device_token(&mut self, token: &str) -> Result<(), StorageError>;

    /// Manual override; registration is never attempted while set
    fn registration_blocked(&self) -> bool;
    fn set_registration_blocked(&mut self, blocked: bool) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub hardware_id: String,
    pub device_id: Option<String>,
    pub device_token: Option<String>,
}

impl DeviceIdentity {
    pub fn load(store: &dyn IdentityStore) -> Self {
        Self {
            hardware_id: store.hardware_id(),
            device_id: store.device_id().filter(|s| !s.is_empty()),
            device_token: store.device_token().filter(|s| !s.is_empty()),
        }
    }

    /// Both id and token present and non-empty
    pub fn is_registered(&self) -> bool {
        self.credentials().is_some()
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.device_id, &self.device_token) {
            (Some(id), Some(token)) => Some((id.as_str(), token.as_str())),
            _ => None,
        }
    }
}

/// Formats the factory MAC as the fleet hardware id.
///
/// Bytes are emitted last to first, matching the 64-bit eFuse word read high
/// to low, so ids stay identical to those already known to the fleet.
pub fn format_hardware_id(mac: [u8; 6]) -> String {
    mac.iter().rev().map(|b| format!("{b:02X}")).collect()
}
