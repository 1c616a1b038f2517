pub mod info;
pub mod reset;
pub mod storage;

pub use info::EspSystem;
pub use storage::{NvsIdentity, NvsMarkers, NvsSettings};
