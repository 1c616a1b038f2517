use std::ffi::CStr;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};

use esp_idf_svc::sys;
use wordclock_core::ota::UiFileStore;
use wordclock_core::persistence::StorageError;

pub const UI_MOUNT_POINT: &str = "/littlefs";
pub const UI_PARTITION_LABEL: &CStr = c"littlefs";
const UI_BASE_PATH: &CStr = c"/littlefs";

/// Mounts the UI partition on the VFS, formatting it when it holds no filesystem
pub fn mount_ui() -> Result<(), StorageError> {
    let mut conf: sys::esp_vfs_littlefs_conf_t = unsafe { std::mem::zeroed() };
    conf.base_path = UI_BASE_PATH.as_ptr();
    conf.partition_label = UI_PARTITION_LABEL.as_ptr();
    conf.set_format_if_mount_failed(1);

    let result = unsafe { sys::esp_vfs_littlefs_register(&conf) };
    if result == sys::ESP_ERR_INVALID_STATE as i32 {
        return Ok(());
    }
    if result != sys::ESP_OK as i32 {
        return Err(StorageError::Unavailable(format!("littlefs mount failed: {}", result)));
    }
    log::info!("UI filesystem mounted at {}", UI_MOUNT_POINT);
    Ok(())
}

pub fn unmount_ui() {
    let result = unsafe { sys::esp_vfs_littlefs_unregister(UI_PARTITION_LABEL.as_ptr()) };
    if result == sys::ESP_OK as i32 {
        log::info!("UI filesystem unmounted");
    }
}

fn full_path(path: &str) -> String {
    format!("{}{}", UI_MOUNT_POINT, path)
}

fn io_err(path: &str, e: std::io::Error) -> StorageError {
    StorageError::Write {
        key: path.to_string(),
        reason: e.to_string(),
    }
}

/// Web UI files on the LittleFS partition
pub struct LittleFsUiStore;

impl LittleFsUiStore {
    pub fn new() -> Self {
        Self
    }
}

impl UiFileStore for LittleFsUiStore {
    fn mount(&mut self) -> Result<(), StorageError> {
        mount_ui()
    }

    fn create(&mut self, path: &str) -> Result<Box<dyn Write + '_>, StorageError> {
        let file = File::create(full_path(path)).map_err(|e| io_err(path, e))?;
        Ok(Box::new(file))
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        match fs::remove_file(full_path(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(path, e)),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        fs::rename(full_path(from), full_path(to)).map_err(|e| io_err(to, e))
    }

    fn size(&self, path: &str) -> Option<u64> {
        fs::metadata(full_path(path)).ok().map(|m| m.len())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let read_err = |e: std::io::Error| StorageError::Read {
            key: path.to_string(),
            reason: e.to_string(),
        };
        let mut file = File::open(full_path(path)).map_err(read_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(read_err)?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf).map_err(read_err)?;
        Ok(buf)
    }
}
