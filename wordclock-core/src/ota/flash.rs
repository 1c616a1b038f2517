//! Staged writes to the inactive app slot or the filesystem partition.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Next OTA app slot; becomes the boot partition on `finish`
    App,
    /// Data partition holding the LittleFS image
    Filesystem,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::Filesystem => write!(f, "filesystem"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("no {0} partition available")]
    NoPartition(Partition),

    #[error("image of {size} bytes does not fit the {partition} partition")]
    TooLarge { partition: Partition, size: u64 },

    #[error("flash begin failed: {0}")]
    Begin(String),

    #[error("flash write failed: {0}")]
    Write(String),

    #[error("flash finalize failed: {0}")]
    Finish(String),
}

pub trait FlashTarget {
    /// Erases enough of `partition` for `size` bytes and returns a writer
    fn begin(&mut self, partition: Partition, size: u64) -> Result<Box<dyn FlashWriter + '_>, FlashError>;
}

pub trait FlashWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), FlashError>;

    /// Commits the image. Nothing changes at boot until this succeeds.
    fn finish(self: Box<Self>) -> Result<(), FlashError>;

    /// Discards the partial image
    fn abort(self: Box<Self>);
}
