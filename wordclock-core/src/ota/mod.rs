//! Over-the-air updates: manifest resolution, staged flash writes and the
//! legacy per-file UI sync.

pub mod download;
pub mod flash;
pub mod manifest;
pub mod pipeline;
pub mod resolver;
pub mod ui_sync;
pub mod version;

use thiserror::Error;

use crate::http::HttpError;
use crate::persistence::StorageError;

pub use flash::{FlashError, FlashTarget, FlashWriter, Partition};
pub use pipeline::{OtaContext, OtaPipeline, RestartReason, UpdateOutcome};
pub use resolver::{
    ChannelManifestResolver, FirmwareSource, LegacyManifestResolver, ResolveRequest, UpdateResolver, UpdateTarget,
};
pub use ui_sync::{UiFileStore, UiSyncOutcome};
pub use version::is_version_newer;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    #[error("an update check is already in progress")]
    Busy,

    #[error("OTA is disabled for this product")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("empty response from {0}")]
    EmptyBody(String),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("manifest is missing {0}")]
    MissingField(&'static str),

    #[error("unsupported filesystem type: {0:?}")]
    UnsupportedFilesystem(String),

    #[error("invalid content length")]
    InvalidSize,

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("incomplete write: {written}/{expected}")]
    Incomplete { written: u64, expected: u64 },

    #[error("SHA-256 mismatch")]
    ChecksumMismatch,

    #[error("flash error: {0}")]
    Flash(#[from] FlashError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
