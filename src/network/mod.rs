pub mod http_client;
pub mod portal;
pub mod services;
pub mod wifi;

pub use http_client::EspHttpClient;
pub use portal::SetupPortal;
pub use services::EspOnlineServices;
pub use wifi::EspWifiDriver;
