use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("failed to write {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("failed to read {key}: {reason}")]
    Read { key: String, reason: String },
}

/// Which applied bundle a version marker describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Atomic filesystem image written by the v2 pipeline
    FilesystemImage,
    /// Individually synced UI files (legacy protocol)
    UiFiles,
}

impl MarkerKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::FilesystemImage => "fs_image_ver",
            Self::UiFiles => "ui_ver",
        }
    }
}

/// Persisted version markers; written only after a verified commit
pub trait MarkerStore {
    fn read(&self, kind: MarkerKind) -> Option<String>;
    fn write(&mut self, kind: MarkerKind, version: &str) -> Result<(), StorageError>;
}
