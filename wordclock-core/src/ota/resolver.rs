//! Turns a product id and channel into an update target.

use serde::de::DeserializeOwned;

use super::manifest::{non_empty, ChannelDocument, FileEntry, FirmwareRef, LegacyManifest};
use super::OtaError;
use crate::config::UpdateChannel;
use crate::http::{HttpClient, Request};

const PREVIEW_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource {
    /// URL of a [`FirmwareArtifact`](super::manifest::FirmwareArtifact) document
    Manifest(String),
    /// Direct binary URL (legacy manifests)
    Direct(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTarget {
    pub version: String,
    pub firmware: FirmwareSource,
    pub filesystem_manifest_url: Option<String>,
    pub ui_version: Option<String>,
    pub ui_files: Vec<FileEntry>,
    /// Channel whose block was used; differs from the request after a fallback
    pub selected_channel: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub product_id: &'a str,
    pub channel: UpdateChannel,
}

pub trait UpdateResolver {
    /// `Ok(None)` when the server publishes no target for this channel
    fn resolve(&self, http: &mut dyn HttpClient, request: &ResolveRequest<'_>) -> Result<Option<UpdateTarget>, OtaError>;
}

/// GETs `url` and decodes a JSON body, requiring HTTP 200 and a non-empty body
pub fn fetch_json<T: DeserializeOwned>(http: &mut dyn HttpClient, url: &str, no_cache: bool) -> Result<T, OtaError> {
    let mut request = Request::get(url);
    if no_cache {
        request = request.no_cache();
    }
    let response = http.send(&request)?;
    if response.status != 200 {
        log::error!("Fetch {url} failed: HTTP {}", response.status);
        return Err(OtaError::HttpStatus(response.status));
    }
    if response.body.iter().all(u8::is_ascii_whitespace) {
        log::error!("Empty response from {url}");
        return Err(OtaError::EmptyBody(url.to_string()));
    }
    serde_json::from_slice(&response.body).map_err(|e| {
        let text = response.text();
        let preview: String = text.chars().take(PREVIEW_LEN).collect();
        log::error!("JSON parse error for {url}: {e} (size {}, preview: {preview})", response.body.len());
        OtaError::Parse(e.to_string())
    })
}

/// Channel documents published per product under the OTA base URL
pub struct ChannelManifestResolver {
    base: String,
    no_cache: bool,
}

impl ChannelManifestResolver {
    pub fn new(base: &str, no_cache: bool) -> Self {
        Self {
            base: base.to_string(),
            no_cache,
        }
    }

    pub fn channel_url(&self, product_id: &str, channel: UpdateChannel) -> String {
        let mut url = self.base.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        format!("{url}{product_id}/channels/{channel}.json")
    }
}

impl UpdateResolver for ChannelManifestResolver {
    fn resolve(&self, http: &mut dyn HttpClient, request: &ResolveRequest<'_>) -> Result<Option<UpdateTarget>, OtaError> {
        let url = self.channel_url(request.product_id, request.channel);
        log::debug!("OTA product: {}", request.product_id);
        log::debug!("OTA channel URL: {url}");

        let doc: ChannelDocument = fetch_json(http, &url, self.no_cache)?;
        let Some(target) = doc.target else {
            return Ok(None);
        };
        if target.manifest_url.is_empty() {
            log::error!("OTA manifest_url missing");
            return Err(OtaError::MissingField("manifest_url"));
        }

        Ok(Some(UpdateTarget {
            version: target.version,
            firmware: FirmwareSource::Manifest(target.manifest_url),
            filesystem_manifest_url: non_empty(&target.fs_manifest_url).map(str::to_string),
            ui_version: None,
            ui_files: Vec::new(),
            selected_channel: request.channel.to_string(),
        }))
    }
}

/// Single manifest with optional per-channel blocks
pub struct LegacyManifestResolver {
    manifest_url: String,
}

impl LegacyManifestResolver {
    pub fn new(manifest_url: &str) -> Self {
        Self {
            manifest_url: manifest_url.to_string(),
        }
    }

    pub fn channel_url(&self, channel: UpdateChannel) -> String {
        let sep = if self.manifest_url.contains('?') { '&' } else { '?' };
        format!("{}{}channel={}", self.manifest_url, sep, channel)
    }
}

impl UpdateResolver for LegacyManifestResolver {
    fn resolve(&self, http: &mut dyn HttpClient, request: &ResolveRequest<'_>) -> Result<Option<UpdateTarget>, OtaError> {
        let requested = request.channel.as_str();
        let doc: LegacyManifest = fetch_json(http, &self.channel_url(request.channel), false)?;

        let (block, selected) = doc.select_channel(requested);
        if selected != requested {
            log::debug!("Manifest channel fallback: requested {requested} -> using {selected}");
        } else {
            log::debug!("Manifest channel: {selected}");
        }
        if let Some(notes) = block.and_then(|b| non_empty(&b.release_notes)) {
            log::debug!("Release notes ({selected}): {notes}");
        }

        let block_firmware = block.and_then(|b| b.firmware.as_ref());
        let top_firmware = doc.top.firmware.as_ref();

        let version = block_firmware
            .and_then(FirmwareRef::version)
            .or_else(|| block.and_then(|b| b.version()))
            .or_else(|| top_firmware.and_then(FirmwareRef::version))
            .or_else(|| doc.top.version())
            .unwrap_or_default()
            .to_string();

        let Some(firmware_url) = block_firmware
            .and_then(FirmwareRef::url)
            .or_else(|| top_firmware.and_then(FirmwareRef::url))
        else {
            log::error!("Firmware URL missing");
            return Err(OtaError::MissingField("firmware url"));
        };

        let ui_version = block
            .and_then(|b| b.ui_version().or_else(|| b.version()))
            .or_else(|| doc.top.ui_version().or_else(|| doc.top.version()))
            .map(str::to_string);

        let ui_files = block
            .and_then(|b| b.files.clone())
            .or_else(|| doc.top.files.clone())
            .unwrap_or_default();

        Ok(Some(UpdateTarget {
            version,
            firmware: FirmwareSource::Direct(firmware_url.to_string()),
            filesystem_manifest_url: None,
            ui_version,
            ui_files,
            selected_channel: selected.to_string(),
        }))
    }
}
