use std::cell::Cell;
use std::net::Ipv4Addr;

use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi},
};
use wordclock_core::network::{WifiDriver, WifiError, WifiStatus};

const WIFI_NAMESPACE: &str = "wc_wifi";
const KEY_WIFI_SSID: &str = "wifi_ssid";
const KEY_WIFI_PASS: &str = "wifi_pass";

fn driver_err(e: impl std::fmt::Debug) -> WifiError {
    WifiError::Driver(format!("{:?}", e))
}

/// Station plus optional soft AP over `EspWifi`, with credentials kept in NVS
pub struct EspWifiDriver {
    wifi: EspWifi<'static>,
    nvs: EspNvs<NvsDefault>,
    client: ClientConfiguration,
    access_point: Option<AccessPointConfiguration>,
    attempted: Cell<bool>,
    was_connected: Cell<bool>,
}

impl EspWifiDriver {
    pub fn new(modem: Modem, sys_loop: EspSystemEventLoop, partition: EspDefaultNvsPartition) -> Result<Self> {
        log::info!("Initializing WiFi driver");
        let mut wifi = EspWifi::new(modem, sys_loop, Some(partition.clone()))?;
        let nvs = EspNvs::new(partition, WIFI_NAMESPACE, true)?;

        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        wifi.start()?;

        // Power save drops the link under web server load
        unsafe {
            use esp_idf_svc::sys::*;
            let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
            if result != ESP_OK as i32 {
                log::warn!("Failed to set WiFi power save mode: {:?}", result);
            }
        }

        Ok(Self {
            wifi,
            nvs,
            client: ClientConfiguration::default(),
            access_point: None,
            attempted: Cell::new(false),
            was_connected: Cell::new(false),
        })
    }

    fn load_credentials(&self) -> Option<(String, String)> {
        let mut ssid_buf = [0u8; 64];
        let mut pass_buf = [0u8; 128];

        let ssid = self.nvs.get_str(KEY_WIFI_SSID, &mut ssid_buf).ok()??;
        let pass = self.nvs.get_str(KEY_WIFI_PASS, &mut pass_buf).ok()??;

        if ssid.is_empty() {
            return None;
        }
        Some((ssid.to_string(), pass.to_string()))
    }

    fn client_config(ssid: &str, password: &str) -> Result<ClientConfiguration, WifiError> {
        Ok(ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| WifiError::Driver(format!("invalid SSID '{}'", ssid)))?,
            password: password
                .try_into()
                .map_err(|_| WifiError::Driver("invalid password".to_string()))?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        })
    }

    fn apply(&mut self) -> Result<(), WifiError> {
        let config = match &self.access_point {
            Some(ap) => Configuration::Mixed(self.client.clone(), ap.clone()),
            None => Configuration::Client(self.client.clone()),
        };
        self.wifi.set_configuration(&config).map_err(driver_err)
    }

    fn connect(&mut self) -> Result<(), WifiError> {
        self.attempted.set(true);
        self.wifi.connect().map_err(driver_err)
    }

    fn is_up(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }
}

impl WifiDriver for EspWifiDriver {
    fn has_stored_credentials(&self) -> bool {
        self.load_credentials().is_some()
    }

    fn begin_stored(&mut self) -> Result<(), WifiError> {
        let (ssid, password) = self
            .load_credentials()
            .ok_or_else(|| WifiError::Driver("no stored credentials".to_string()))?;
        log::info!("Connecting to stored network '{}'", ssid);
        self.client = Self::client_config(&ssid, &password)?;
        self.apply()?;
        self.connect()
    }

    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), WifiError> {
        self.client = Self::client_config(ssid, password)?;
        if let Err(e) = self.nvs.set_str(KEY_WIFI_SSID, ssid) {
            log::error!("Failed to save SSID: {:?}", e);
        }
        if let Err(e) = self.nvs.set_str(KEY_WIFI_PASS, password) {
            log::error!("Failed to save password: {:?}", e);
        }
        log::info!("Connecting to '{}'", ssid);
        self.apply()?;
        self.connect()
    }

    fn status(&self) -> WifiStatus {
        if self.is_up() {
            self.was_connected.set(true);
            WifiStatus::Connected
        } else if self.was_connected.get() {
            WifiStatus::ConnectionLost
        } else if self.attempted.get() {
            WifiStatus::Disconnected
        } else {
            WifiStatus::Idle
        }
    }

    fn reconnect(&mut self) -> Result<(), WifiError> {
        if self.client.ssid.is_empty() {
            return self.begin_stored();
        }
        if let Err(e) = self.wifi.disconnect() {
            log::debug!("Disconnect before reconnect failed: {:?}", e);
        }
        self.connect()
    }

    fn disconnect(&mut self) -> Result<(), WifiError> {
        self.was_connected.set(false);
        self.wifi.disconnect().map_err(driver_err)
    }

    fn erase_credentials(&mut self) -> Result<(), WifiError> {
        self.nvs.remove(KEY_WIFI_SSID).map_err(driver_err)?;
        self.nvs.remove(KEY_WIFI_PASS).map_err(driver_err)?;
        self.client = ClientConfiguration::default();
        log::info!("WiFi credentials erased");
        self.apply()
    }

    fn rssi(&self) -> Option<i32> {
        if !self.is_up() {
            return None;
        }
        let mut ap_info: esp_idf_svc::sys::wifi_ap_record_t = unsafe { core::mem::zeroed() };
        let result = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        (result == esp_idf_svc::sys::ESP_OK as i32).then_some(i32::from(ap_info.rssi))
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }

    fn ssid(&self) -> Option<String> {
        Some(self.client.ssid.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn start_access_point(&mut self, name: &str, password: &str) -> Result<(), WifiError> {
        self.access_point = Some(AccessPointConfiguration {
            ssid: name
                .try_into()
                .map_err(|_| WifiError::Driver(format!("invalid AP name '{}'", name)))?,
            password: password
                .try_into()
                .map_err(|_| WifiError::Driver("invalid AP password".to_string()))?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            channel: 1,
            ..Default::default()
        });
        log::info!("Starting access point '{}'", name);
        self.apply()
    }

    fn stop_access_point(&mut self) -> Result<(), WifiError> {
        if self.access_point.take().is_some() {
            log::info!("Stopping access point");
            self.apply()?;
        }
        Ok(())
    }
}
