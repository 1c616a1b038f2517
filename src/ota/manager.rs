//! Flash targets for the update pipeline: the next OTA app slot via the
//! ESP-IDF OTA API and the raw LittleFS data partition.

use core::ffi::c_void;

use esp_idf_svc::sys::{
    esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition, esp_ota_handle_t,
    esp_ota_set_boot_partition, esp_ota_write, esp_partition_erase_range, esp_partition_find_first,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS, esp_partition_t,
    esp_partition_type_t_ESP_PARTITION_TYPE_DATA, esp_partition_write, ESP_ERR_OTA_VALIDATE_FAILED, ESP_OK,
};
use wordclock_core::ota::{FlashError, FlashTarget, FlashWriter, Partition};

use super::ui_files::{mount_ui, unmount_ui, UI_PARTITION_LABEL};

const SECTOR_SIZE: u64 = 4096;

fn partition_size(partition: *const esp_partition_t) -> u64 {
    u64::from(unsafe { (*partition).size })
}

pub struct EspFlashTarget;

impl EspFlashTarget {
    pub fn new() -> Self {
        Self
    }

    fn begin_app(&mut self, size: u64) -> Result<Box<dyn FlashWriter + '_>, FlashError> {
        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(FlashError::NoPartition(Partition::App));
        }
        if size > partition_size(partition) {
            return Err(FlashError::TooLarge {
                partition: Partition::App,
                size,
            });
        }

        let mut handle: esp_ota_handle_t = 0;
        let result = unsafe { esp_ota_begin(partition, size as _, &mut handle as *mut _) };
        if result != ESP_OK as i32 {
            return Err(FlashError::Begin(format!("esp_ota_begin: {}", result)));
        }

        log::info!("OTA app slot opened for {} bytes", size);
        Ok(Box::new(AppWriter {
            partition,
            handle: Some(handle),
        }))
    }

    fn begin_filesystem(&mut self, size: u64) -> Result<Box<dyn FlashWriter + '_>, FlashError> {
        let partition = unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
                UI_PARTITION_LABEL.as_ptr(),
            )
        };
        if partition.is_null() {
            return Err(FlashError::NoPartition(Partition::Filesystem));
        }
        let capacity = partition_size(partition);
        if size > capacity {
            return Err(FlashError::TooLarge {
                partition: Partition::Filesystem,
                size,
            });
        }

        // The filesystem cannot stay mounted while its partition is rewritten
        unmount_ui();

        let erased = (size.div_ceil(SECTOR_SIZE) * SECTOR_SIZE).min(capacity) as usize;
        erase_filesystem(partition, erased).map_err(FlashError::Begin)?;

        log::info!("Filesystem partition erased for {} bytes", size);
        Ok(Box::new(FilesystemWriter {
            partition,
            offset: 0,
            erased,
        }))
    }
}

impl FlashTarget for EspFlashTarget {
    fn begin(&mut self, partition: Partition, size: u64) -> Result<Box<dyn FlashWriter + '_>, FlashError> {
        match partition {
            Partition::App => self.begin_app(size),
            Partition::Filesystem => self.begin_filesystem(size),
        }
    }
}

struct AppWriter {
    partition: *const esp_partition_t,
    handle: Option<esp_ota_handle_t>,
}

impl FlashWriter for AppWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let handle = self
            .handle
            .ok_or_else(|| FlashError::Write("update already closed".to_string()))?;
        let result = unsafe { esp_ota_write(handle, data.as_ptr() as *const c_void, data.len() as _) };
        if result != ESP_OK as i32 {
            return Err(FlashError::Write(format!("esp_ota_write: {}", result)));
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), FlashError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| FlashError::Finish("update already closed".to_string()))?;

        let result = unsafe { esp_ota_end(handle) };
        if result == ESP_ERR_OTA_VALIDATE_FAILED as i32 {
            return Err(FlashError::Finish("image validation failed".to_string()));
        } else if result != ESP_OK as i32 {
            return Err(FlashError::Finish(format!("esp_ota_end: {}", result)));
        }

        let result = unsafe { esp_ota_set_boot_partition(self.partition) };
        if result != ESP_OK as i32 {
            return Err(FlashError::Finish(format!("esp_ota_set_boot_partition: {}", result)));
        }
        log::info!("New firmware set as boot partition");
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        if let Some(handle) = self.handle.take() {
            unsafe { esp_ota_abort(handle) };
        }
    }
}

impl Drop for AppWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe { esp_ota_abort(handle) };
        }
    }
}

fn erase_filesystem(partition: *const esp_partition_t, len: usize) -> Result<(), String> {
    let result = unsafe { esp_partition_erase_range(partition, 0, len) };
    if result != ESP_OK as i32 {
        return Err(format!("esp_partition_erase_range: {}", result));
    }
    Ok(())
}

struct FilesystemWriter {
    partition: *const esp_partition_t,
    offset: usize,
    erased: usize,
}

impl FlashWriter for FilesystemWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let result = unsafe { esp_partition_write(self.partition, self.offset, data.as_ptr() as *const c_void, data.len()) };
        if result != ESP_OK as i32 {
            return Err(FlashError::Write(format!("esp_partition_write: {}", result)));
        }
        self.offset += data.len();
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), FlashError> {
        log::info!("Filesystem image written ({} bytes)", self.offset);
        Ok(())
    }

    /// Wipes the partial image; the remount formats an empty filesystem
    fn abort(self: Box<Self>) {
        log::warn!("Filesystem image aborted after {} bytes", self.offset);
        if let Err(e) = erase_filesystem(self.partition, self.erased) {
            log::error!("Could not wipe partial filesystem image: {}", e);
            return;
        }
        if let Err(e) = mount_ui() {
            log::warn!("UI filesystem remount failed: {}", e);
        }
    }
}
