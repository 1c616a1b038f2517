//! Wire formats of the update server.
//!
//! Fields are optional or defaulted throughout: servers in the field omit keys
//! freely and an empty string means the same as a missing key.

use std::collections::BTreeMap;

use serde::Deserialize;

/// `{ota_base}/{product}/channels/{channel}.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelDocument {
    #[serde(default)]
    pub target: Option<ChannelTarget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelTarget {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub manifest_url: String,
    #[serde(default)]
    pub fs_manifest_url: Option<String>,
}

/// Firmware binary descriptor referenced by `manifest_url`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirmwareArtifact {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Filesystem image descriptor referenced by `fs_manifest_url`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesystemArtifact {
    #[serde(default)]
    pub fs: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

impl FileEntry {
    pub fn is_complete(&self) -> bool {
        !self.path.is_empty() && !self.url.is_empty()
    }
}

/// Legacy manifests give the firmware either as a bare URL or as an object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FirmwareRef {
    Url(String),
    Detailed {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
}

impl FirmwareRef {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url.as_str()),
            Self::Detailed { url, .. } => url.as_deref(),
        }
        .filter(|s| !s.is_empty())
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::Detailed { version, .. } => version.as_deref().filter(|s| !s.is_empty()),
        }
    }
}

/// Fields shared by the top level of a legacy manifest and its channel blocks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyBlock {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub ui_version: Option<String>,
    #[serde(default)]
    pub firmware: Option<FirmwareRef>,
    #[serde(default)]
    pub files: Option<Vec<FileEntry>>,
    #[serde(default)]
    pub release_notes: Option<String>,
}

impl LegacyBlock {
    pub fn version(&self) -> Option<&str> {
        non_empty(&self.version)
    }

    pub fn ui_version(&self) -> Option<&str> {
        non_empty(&self.ui_version)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyManifest {
    #[serde(flatten)]
    pub top: LegacyBlock,
    #[serde(default)]
    pub channels: BTreeMap<String, LegacyBlock>,
}

impl LegacyManifest {
    /// Requested channel block, else `stable`, else none (top level applies).
    /// Returns the block and the channel name actually used.
    pub fn select_channel<'m>(&'m self, requested: &'m str) -> (Option<&'m LegacyBlock>, &'m str) {
        if let Some(block) = self.channels.get(requested) {
            return (Some(block), requested);
        }
        match self.channels.get_key_value("stable") {
            Some((name, block)) => (Some(block), name.as_str()),
            None => (None, requested),
        }
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
