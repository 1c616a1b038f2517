//! Per-file web UI sync for products on the legacy update protocol.
//!
//! Files are downloaded to `<path>.tmp` and renamed over the live file only
//! after the byte count checks out. The `ui_ver` marker moves forward only when
//! every file of a sync landed.

use std::io::Write;

use super::download::CHUNK_SIZE;
use super::manifest::FileEntry;
use super::OtaError;
use crate::http::{HttpClient, Request, ResponseStream};
use crate::persistence::{MarkerKind, MarkerStore, StorageError};

pub const UI_FILES: [&str; 7] = [
    "admin.html",
    "changepw.html",
    "dashboard.html",
    "logs.html",
    "mqtt.html",
    "setup.html",
    "update.html",
];

const MIN_HTML_SIZE: u64 = 64;
const PROBE_LEN: usize = 256;

/// Mounted web UI filesystem. Paths are absolute (`/admin.html`).
pub trait UiFileStore {
    fn mount(&mut self) -> Result<(), StorageError>;

    /// Creates or truncates `path`
    fn create(&mut self, path: &str) -> Result<Box<dyn Write + '_>, StorageError>;

    /// Removing a missing file is not an error
    fn remove(&mut self, path: &str) -> Result<(), StorageError>;

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError>;

    fn size(&self, path: &str) -> Option<u64>;

    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiSyncOutcome {
    /// Marker matched and the files passed the health check
    UpToDate,
    Synced,
    /// At least one file failed; marker left untouched
    Partial,
    /// Nothing to sync (no version or no file list)
    Skipped,
}

/// Downloads one file via its temp path, returning the bytes written
pub fn download_to_fs(
    http: &mut dyn HttpClient,
    fs: &mut dyn UiFileStore,
    url: &str,
    path: &str,
) -> Result<u64, OtaError> {
    let request = Request::get(url);
    let mut stream = http.open(&request)?;
    let status = stream.status();
    if status != 200 {
        log::warn!("UI download {path} failed: HTTP {status}");
        return Err(OtaError::HttpStatus(status));
    }
    // chunked responses carry no length; an explicit zero is an error
    let declared = stream.content_length();
    if declared == Some(0) {
        return Err(OtaError::InvalidSize);
    }

    let tmp = format!("{path}.tmp");
    fs.remove(&tmp)?;

    let copied = copy_to_file(&mut *stream, fs, &tmp);
    let written = match copied {
        Ok(w) => w,
        Err(e) => {
            discard_temp(fs, &tmp);
            return Err(e);
        }
    };
    if let Some(expected) = declared {
        if written != expected {
            log::warn!("UI download {path} incomplete: {written}/{expected}");
            discard_temp(fs, &tmp);
            return Err(OtaError::Incomplete { written, expected });
        }
    }
    if written == 0 {
        discard_temp(fs, &tmp);
        return Err(OtaError::InvalidSize);
    }

    fs.remove(path)?;
    fs.rename(&tmp, path)?;
    log::debug!("Downloaded {path} ({written} bytes)");
    Ok(written)
}

/// A leftover temp file is replaced on the next attempt
fn discard_temp(fs: &mut dyn UiFileStore, tmp: &str) {
    if let Err(e) = fs.remove(tmp) {
        log::debug!("Could not remove {tmp}: {e}");
    }
}

fn copy_to_file(
    stream: &mut dyn ResponseStream,
    fs: &mut dyn UiFileStore,
    tmp: &str,
) -> Result<u64, OtaError> {
    let write_error = |e: std::io::Error| StorageError::Write {
        key: tmp.to_string(),
        reason: e.to_string(),
    };
    let mut file = fs.create(tmp)?;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_error)?;
        written += n as u64;
    }
    file.flush().map_err(write_error)?;
    Ok(written)
}

/// Cheap sanity check that a page is a whole HTML document
pub fn is_html_file_healthy(fs: &dyn UiFileStore, path: &str) -> bool {
    let Some(size) = fs.size(path) else {
        return false;
    };
    if size < MIN_HTML_SIZE {
        return false;
    }
    let probe = PROBE_LEN.min(size as usize);
    let head = match fs.read_range(path, 0, probe) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if !contains(&head, b"<!DOCTYPE html") {
        return false;
    }
    let tail = match fs.read_range(path, size - probe as u64, probe) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    contains(&tail, b"</html>")
}

pub fn ui_files_healthy(fs: &dyn UiFileStore) -> bool {
    UI_FILES
        .iter()
        .all(|name| is_html_file_healthy(fs, &format!("/{name}")))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// True when `version` is already installed and intact
fn already_current(fs: &dyn UiFileStore, markers: &dyn MarkerStore, version: &str) -> bool {
    if markers.read(MarkerKind::UiFiles).as_deref() != Some(version) {
        return false;
    }
    if ui_files_healthy(fs) {
        return true;
    }
    log::warn!("UI version matches but files look invalid; re-syncing");
    false
}

fn download_all<'f>(
    http: &mut dyn HttpClient,
    fs: &mut dyn UiFileStore,
    files: impl Iterator<Item = (String, &'f str)>,
) -> bool {
    let mut ok = true;
    for (url, path) in files {
        if let Err(e) = download_to_fs(http, fs, &url, path) {
            log::warn!("UI file {path} failed: {e}");
            ok = false;
        }
    }
    ok
}

/// Syncs the file list of a legacy manifest
pub fn sync_from_manifest(
    http: &mut dyn HttpClient,
    fs: &mut dyn UiFileStore,
    markers: &mut dyn MarkerStore,
    version: Option<&str>,
    files: &[FileEntry],
) -> Result<UiSyncOutcome, OtaError> {
    log::info!("Checking UI files");
    fs.mount()?;

    if let Some(v) = version {
        if already_current(fs, markers, v) {
            log::info!("UI up-to-date ({v})");
            return Ok(UiSyncOutcome::UpToDate);
        }
    }

    let files: Vec<&FileEntry> = files.iter().filter(|f| f.is_complete()).collect();
    if files.is_empty() {
        log::info!("No file list in manifest; skipping UI sync");
        return Ok(UiSyncOutcome::Skipped);
    }

    let ok = download_all(http, fs, files.iter().map(|f| (f.url.clone(), f.path.as_str())));
    finish(markers, version, ok)
}

/// Syncs the fixed page set of the bundled UI release
pub fn sync_from_configured_version(
    http: &mut dyn HttpClient,
    fs: &mut dyn UiFileStore,
    markers: &mut dyn MarkerStore,
    release_base: &str,
    version: &str,
) -> Result<UiSyncOutcome, OtaError> {
    log::info!("Checking UI files (configured version)");
    fs.mount()?;

    if version.is_empty() {
        log::error!("Bundled UI version is empty; skipping UI sync");
        return Ok(UiSyncOutcome::Skipped);
    }
    if already_current(fs, markers, version) {
        log::info!("UI up-to-date (configured version match)");
        return Ok(UiSyncOutcome::UpToDate);
    }

    let base = release_base.trim_end_matches('/');
    let paths: Vec<String> = UI_FILES.iter().map(|name| format!("/{name}")).collect();
    let ok = download_all(
        http,
        fs,
        UI_FILES
            .iter()
            .zip(paths.iter())
            .map(|(name, path)| (format!("{base}/v{version}/data/{name}"), path.as_str())),
    );
    finish(markers, Some(version), ok)
}

fn finish(markers: &mut dyn MarkerStore, version: Option<&str>, ok: bool) -> Result<UiSyncOutcome, OtaError> {
    if !ok {
        log::error!("Some UI files failed");
        return Ok(UiSyncOutcome::Partial);
    }
    if let Some(v) = version {
        markers.write(MarkerKind::UiFiles, v)?;
    }
    log::info!("UI files synced");
    Ok(UiSyncOutcome::Synced)
}
