//! Station connectivity: stored-credential connect at boot, edge detection,
//! periodic reconnects and the captive-portal fallback.

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::{ProductConfig, Timings};
use crate::led_events::{LedEvent, LedEvents};
use crate::provisioning::ProvisioningReason;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WifiError {
    #[error("wifi driver error: {0}")]
    Driver(String),

    #[error("captive portal error: {0}")]
    Portal(String),
}

/// Station status as reported by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    Idle,
    NoSsidAvailable,
    Connected,
    ConnectFailed,
    ConnectionLost,
    Disconnected,
    WrongPassword,
}

impl WifiStatus {
    /// Numeric code carried in provisioning status payloads
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::NoSsidAvailable => 1,
            Self::Connected => 3,
            Self::ConnectFailed => 4,
            Self::ConnectionLost => 5,
            Self::Disconnected => 6,
            Self::WrongPassword => 7,
        }
    }

    /// Reason reported to a provisioning client after a failed attempt
    pub fn failure_reason(self) -> &'static str {
        match self {
            Self::NoSsidAvailable => "no_ssid",
            Self::ConnectFailed => "connect_failed",
            Self::ConnectionLost => "connection_lost",
            Self::WrongPassword => "wrong_password",
            Self::Disconnected => "disconnected",
            Self::Idle | Self::Connected => "timeout",
        }
    }
}

pub trait WifiDriver {
    fn has_stored_credentials(&self) -> bool;

    /// Starts connecting with persisted credentials; does not wait
    fn begin_stored(&mut self) -> Result<(), WifiError>;

    /// Starts connecting with new credentials and persists them
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), WifiError>;

    fn status(&self) -> WifiStatus;
    fn reconnect(&mut self) -> Result<(), WifiError>;
    fn disconnect(&mut self) -> Result<(), WifiError>;
    fn erase_credentials(&mut self) -> Result<(), WifiError>;

    fn rssi(&self) -> Option<i32>;
    fn local_ip(&self) -> Option<Ipv4Addr>;
    fn ssid(&self) -> Option<String>;

    /// Soft AP alongside the station interface
    fn start_access_point(&mut self, name: &str, password: &str) -> Result<(), WifiError>;
    fn stop_access_point(&mut self) -> Result<(), WifiError>;
}

/// Local configuration page served from the soft AP
pub trait CaptivePortal {
    fn start(&mut self) -> Result<(), WifiError>;
    fn stop(&mut self);
    fn is_active(&self) -> bool;

    /// Services the portal; submitted credentials are handed to `wifi`
    fn process(&mut self, wifi: &mut dyn WifiDriver);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkState {
    pub connected: bool,
    pub had_stored_credentials_at_boot: bool,
    pub last_transition_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    Connected,
    Disconnected,
}

/// Result of the boot-time connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootConnect {
    Connected,
    /// Caller should start BLE provisioning for this reason
    NeedsProvisioning(ProvisioningReason),
    PortalStarted,
    Offline,
}

pub struct NetworkManager<W: WifiDriver> {
    wifi: W,
    portal: Option<Box<dyn CaptivePortal>>,
    state: NetworkState,
    portal_started: bool,
    last_reconnect_attempt_ms: Option<u64>,
    ble_provisioning: bool,
    ap_name: String,
    ap_password: String,
    timings: Timings,
}

impl<W: WifiDriver> NetworkManager<W> {
    pub fn new(wifi: W, portal: Option<Box<dyn CaptivePortal>>, config: &ProductConfig) -> Self {
        Self {
            wifi,
            portal: if config.captive_portal { portal } else { None },
            state: NetworkState::default(),
            portal_started: false,
            last_reconnect_attempt_ms: None,
            ble_provisioning: config.ble_provisioning,
            ap_name: config.access_point_name.clone(),
            ap_password: config.access_point_password.clone(),
            timings: config.timings,
        }
    }

    /// Runs once at boot. Blocks for at most the retry window.
    pub fn init(&mut self, clock: &dyn Clock, events: &mut LedEvents) -> BootConnect {
        let had_creds = self.wifi.has_stored_credentials();
        self.state.had_stored_credentials_at_boot = had_creds;
        log::info!(
            "WiFi starting (credentials present: {})",
            if had_creds { "yes" } else { "no" }
        );

        if had_creds && self.connect_with_stored(clock) {
            self.state.connected = true;
            self.state.last_transition_ms = Some(clock.now_ms());
            log::info!(
                "WiFi connected to stored network: {}",
                self.wifi.ssid().unwrap_or_default()
            );
            if let Some(ip) = self.wifi.local_ip() {
                log::info!("IP address: {ip}");
            }
            return BootConnect::Connected;
        }

        if self.ble_provisioning {
            let reason = if had_creds {
                ProvisioningReason::WiFiUnavailableAtBoot
            } else {
                ProvisioningReason::FirstBootNoCreds
            };
            return BootConnect::NeedsProvisioning(reason);
        }

        if self.start_portal(events) {
            BootConnect::PortalStarted
        } else {
            log::warn!("WiFi not connected and no configuration portal available");
            BootConnect::Offline
        }
    }

    fn connect_with_stored(&mut self, clock: &dyn Clock) -> bool {
        if let Err(e) = self.wifi.begin_stored() {
            log::warn!("WiFi begin failed: {e}");
            return false;
        }
        for _ in 0..self.timings.wifi_connect_max_retries {
            if self.wifi.status() == WifiStatus::Connected {
                return true;
            }
            clock.delay_ms(self.timings.wifi_connect_retry_delay_ms);
        }
        self.wifi.status() == WifiStatus::Connected
    }

    /// Starts the soft AP and portal once; false when the product has none
    pub fn start_portal(&mut self, events: &mut LedEvents) -> bool {
        let Some(portal) = self.portal.as_mut() else {
            return false;
        };
        if self.portal_started {
            return true;
        }
        if let Err(e) = self.wifi.start_access_point(&self.ap_name, &self.ap_password) {
            log::error!("Failed to start access point: {e}");
            return false;
        }
        if let Err(e) = portal.start() {
            log::error!("Failed to start configuration portal: {e}");
            return false;
        }
        events.start(LedEvent::WifiManagerPortal);
        self.portal_started = true;
        log::warn!(
            "WiFi config portal active. Connect to '{}' to configure WiFi.",
            self.ap_name
        );
        true
    }

    fn stop_portal(&mut self, events: &mut LedEvents) {
        if let Some(portal) = self.portal.as_mut() {
            if portal.is_active() {
                portal.stop();
                if let Err(e) = self.wifi.stop_access_point() {
                    log::warn!("Failed to stop access point: {e}");
                }
                log::info!("Config portal stopped after station connect");
            }
        }
        events.stop(LedEvent::WifiManagerPortal);
        self.portal_started = false;
    }

    /// Per-tick servicing. `ble_timed_out` hands control to the portal.
    pub fn process(
        &mut self,
        now: u64,
        events: &mut LedEvents,
        ble_timed_out: bool,
    ) -> Option<LinkTransition> {
        if let Some(portal) = self.portal.as_mut() {
            if portal.is_active() {
                for _ in 0..self.timings.portal_process_passes {
                    portal.process(&mut self.wifi);
                }
            }
        }

        let connected = self.wifi.status() == WifiStatus::Connected;
        let mut transition = None;

        if connected && !self.state.connected {
            log::info!(
                "WiFi connection established: {}",
                self.wifi.ssid().unwrap_or_default()
            );
            if let Some(ip) = self.wifi.local_ip() {
                log::info!("IP address: {ip}");
            }
            self.last_reconnect_attempt_ms = Some(now);
            self.stop_portal(events);
            self.state.last_transition_ms = Some(now);
            transition = Some(LinkTransition::Connected);
        } else if !connected && self.state.connected {
            log::warn!("WiFi connection lost");
            self.last_reconnect_attempt_ms = None;
            self.state.last_transition_ms = Some(now);
            transition = Some(LinkTransition::Disconnected);
        }

        if !connected {
            let due = match self.last_reconnect_attempt_ms {
                None => true,
                Some(last) => now.saturating_sub(last) >= self.timings.wifi_reconnect_interval_ms,
            };
            if due {
                log::info!("Attempting WiFi reconnect");
                if let Err(e) = self.wifi.reconnect() {
                    log::warn!("WiFi reconnect failed: {e}");
                }
                self.last_reconnect_attempt_ms = Some(now);
            }
        }
        self.state.connected = connected;

        if ble_timed_out && self.portal.is_some() {
            self.start_portal(events);
        }

        transition
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    pub fn portal_active(&self) -> bool {
        self.portal.as_ref().is_some_and(|p| p.is_active())
    }

    pub fn wifi(&self) -> &W {
        &self.wifi
    }

    pub fn wifi_mut(&mut self) -> &mut W {
        &mut self.wifi
    }

    /// Forgets stored credentials; the caller restarts afterwards
    pub fn clear_credentials(&mut self) {
        log::info!("WiFi settings are being cleared");
        if let Err(e) = self.wifi.erase_credentials() {
            log::error!("Failed to erase WiFi credentials: {e}");
        }
    }
}
