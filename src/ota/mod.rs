// Device side of the update pipeline. Resolution, download and verification
// live in wordclock-core; these types only touch flash.

pub mod manager;
pub mod ui_files;

pub use manager::EspFlashTarget;
pub use ui_files::{mount_ui, LittleFsUiStore, UI_MOUNT_POINT};
