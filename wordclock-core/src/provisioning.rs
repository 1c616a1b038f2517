//! BLE WiFi provisioning session.
//!
//! A phone writes SSID and password to GATT characteristics; the session tries
//! the credentials and reports progress as JSON on a notify characteristic.
//! Transport callbacks only enqueue [`BleEvent`]s; all state changes happen in
//! [`BleProvisioning::process`] on the main loop.

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::{PasskeyTiming, ProductConfig};
use crate::led_events::{LedEvent, LedEvents};
use crate::network::{WifiDriver, WifiStatus};

pub const SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";
pub const SSID_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";
pub const PASSWORD_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a9";
pub const STATUS_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26aa";
pub const COMMAND_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26ab";

const PASSKEY_ATTEMPTS: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("BLE stack error: {0}")]
    Stack(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningReason {
    FirstBootNoCreds,
    WiFiUnavailableAtBoot,
    ManualTrigger,
}

impl ProvisioningReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstBootNoCreds => "first_boot_no_creds",
            Self::WiFiUnavailableAtBoot => "wifi_unavailable_at_boot",
            Self::ManualTrigger => "manual_trigger",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    WifiConnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    Ssid,
    Password,
    Command,
}

impl Characteristic {
    fn label(&self) -> &'static str {
        match self {
            Self::Ssid => "ssid",
            Self::Password => "pass",
            Self::Command => "cmd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    ClientConnected,
    ClientDisconnected,
    Write {
        characteristic: Characteristic,
        value: Vec<u8>,
    },
}

/// GATT server hosting the provisioning service
pub trait BleTransport {
    /// Brings up the stack and service; repeated calls reuse the server
    fn start(&mut self, device_name: &str) -> Result<(), BleError>;
    fn start_advertising(&mut self) -> Result<(), BleError>;
    fn stop_advertising(&mut self) -> Result<(), BleError>;

    /// Updates the readable status value
    fn set_status(&mut self, value: &str);
    /// Pushes the current status value to subscribed clients
    fn notify_status(&mut self);

    fn poll_event(&mut self) -> Option<BleEvent>;
}

/// Shows passkey digits as words on the letter grid
pub trait PasskeyDisplay {
    /// `first` marks the first digit (corner LEDs lit)
    fn show_digit(&mut self, digit: u8, first: bool);
    fn clear(&mut self);
}

/// Six distinct digits from 1..=9
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Passkey([u8; 6]);

impl Passkey {
    pub fn generate(rng: &mut dyn RngCore) -> Self {
        Self::generate_with_attempts(rng, PASSKEY_ATTEMPTS)
    }

    /// Draws random six-digit candidates; falls back to a shuffled digit pool
    /// when none of `attempts` draws is usable
    pub fn generate_with_attempts(rng: &mut dyn RngCore, attempts: usize) -> Self {
        for _ in 0..attempts {
            if let Some(digits) = Self::usable_digits(rng.next_u32() % 1_000_000) {
                return Self(digits);
            }
        }

        let mut pool = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        pool.shuffle(rng);
        let mut digits = [0u8; 6];
        digits.copy_from_slice(&pool[..6]);
        Self(digits)
    }

    fn usable_digits(mut candidate: u32) -> Option<[u8; 6]> {
        let mut digits = [0u8; 6];
        let mut seen = 0u16;
        for slot in digits.iter_mut().rev() {
            let d = (candidate % 10) as u8;
            candidate /= 10;
            let bit = 1u16 << d;
            if d == 0 || seen & bit != 0 {
                return None;
            }
            seen |= bit;
            *slot = d;
        }
        Some(digits)
    }

    pub fn digits(&self) -> [u8; 6] {
        self.0
    }

    pub fn value(&self) -> u32 {
        self.0.iter().fold(0, |acc, d| acc * 10 + u32::from(*d))
    }
}

#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    pub state: SessionState,
    pub reason: ProvisioningReason,
    pub ssid: String,
    password: String,
    pub attempt: u32,
    pub started_ms: u64,
    pub connect_requested: bool,
    pub passkey: Option<Passkey>,
    wifi_connect_started_ms: u64,
    last_status_notify_ms: u64,
    passkey_index: usize,
    passkey_showing: bool,
    passkey_last_toggle_ms: u64,
}

impl ProvisioningSession {
    fn new(reason: ProvisioningReason, now: u64, passkey: Option<Passkey>) -> Self {
        Self {
            state: SessionState::Active,
            reason,
            ssid: String::new(),
            password: String::new(),
            attempt: 0,
            started_ms: now,
            connect_requested: false,
            passkey,
            wifi_connect_started_ms: 0,
            last_status_notify_ms: 0,
            passkey_index: 0,
            passkey_showing: true,
            passkey_last_toggle_ms: now,
        }
    }

    fn has_credentials(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }

    fn show_passkey_frame(&self, display: &mut dyn PasskeyDisplay) {
        let Some(passkey) = self.passkey else { return };
        if self.passkey_showing {
            let index = self.passkey_index % 6;
            display.show_digit(passkey.digits()[index], index == 0);
        } else {
            display.clear();
        }
    }

    fn update_passkey(&mut self, now: u64, timing: &PasskeyTiming, display: &mut dyn PasskeyDisplay) {
        if self.passkey.is_none() {
            return;
        }
        let interval = if self.passkey_showing { timing.on_ms } else { timing.off_ms };
        if now.saturating_sub(self.passkey_last_toggle_ms) < interval {
            return;
        }
        self.passkey_last_toggle_ms = now;
        self.passkey_showing = !self.passkey_showing;
        if self.passkey_showing {
            self.show_passkey_frame(display);
        } else {
            display.clear();
            self.passkey_index = (self.passkey_index + 1) % 6;
        }
    }
}

#[derive(Serialize)]
struct StatusPayload<'a> {
    state: &'a str,
    hardware_id: &'a str,
    uptime_ms: String,
    wifi_status: String,
    rssi: String,
    attempt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ble_reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssid: Option<&'a str>,
    #[serde(flatten)]
    detail: BTreeMap<&'a str, &'a str>,
}

/// Collaborators borrowed for one call into the session
pub struct ProvisioningIo<'a> {
    pub now_ms: u64,
    pub wifi: &'a mut dyn WifiDriver,
    pub display: &'a mut dyn PasskeyDisplay,
    pub events: &'a mut LedEvents,
}

#[derive(Debug, Clone)]
struct ProvisioningConfig {
    name_prefix: String,
    timeout_ms: Option<u64>,
    connect_window_ms: u64,
    renotify_ms: u64,
    passkey_display: bool,
    passkey_timing: PasskeyTiming,
}

pub struct BleProvisioning<B: BleTransport> {
    transport: B,
    config: ProvisioningConfig,
    hardware_id: String,
    session: Option<ProvisioningSession>,
    has_client: bool,
    timed_out: bool,
}

impl<B: BleTransport> BleProvisioning<B> {
    pub fn new(transport: B, product: &ProductConfig, hardware_id: impl Into<String>) -> Self {
        log::info!("BLE provisioning init (enabled)");
        Self {
            transport,
            config: ProvisioningConfig {
                name_prefix: product.ble_name_prefix.clone(),
                timeout_ms: product.ble_timeout_ms,
                connect_window_ms: product.timings.wifi_connect_window_ms(),
                renotify_ms: product.timings.ble_status_renotify_ms,
                passkey_display: product.passkey_display,
                passkey_timing: product.passkey_timing,
            },
            hardware_id: hardware_id.into(),
            session: None,
            has_client: false,
            timed_out: false,
        }
    }

    /// Advertised name: prefix plus the last five hardware-id characters
    pub fn device_name(&self) -> String {
        let hw = &self.hardware_id;
        let tail = hw.char_indices().rev().nth(4).map_or(hw.as_str(), |(i, _)| &hw[i..]);
        format!("{}{}", self.config.name_prefix, tail)
    }

    pub fn start(&mut self, reason: ProvisioningReason, rng: &mut dyn RngCore, io: &mut ProvisioningIo<'_>) {
        if self.session.is_some() {
            return;
        }
        self.timed_out = false;

        let passkey = self.config.passkey_display.then(|| Passkey::generate(rng));
        let session = ProvisioningSession::new(reason, io.now_ms, passkey);

        log::info!("BLE provisioning start, reason={}", reason.as_str());
        match self.config.timeout_ms {
            Some(ms) => log::info!("BLE timeout: {} s", ms / 1000),
            None => log::info!("BLE timeout disabled"),
        }
        if let Some(pk) = passkey {
            log::info!("BLE passkey: {}", pk.value());
        }
        session.show_passkey_frame(io.display);

        let name = self.device_name();
        if let Err(e) = self.transport.start(&name) {
            log::error!("BLE provisioning could not start: {e}");
            io.display.clear();
            return;
        }

        self.session = Some(session);
        io.events.start(LedEvent::BleProvisioning);
        self.notify_json("ble_ready", None, io);
        if let Err(e) = self.transport.start_advertising() {
            log::warn!("BLE advertising failed: {e}");
        }
    }

    pub fn stop(&mut self, io: &mut ProvisioningIo<'_>) {
        if self.session.is_none() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Idle;
            session.ssid.clear();
            session.password.clear();
            session.connect_requested = false;
        }
        if let Err(e) = self.transport.stop_advertising() {
            log::warn!("BLE stop advertising failed: {e}");
        }
        self.notify_json("ble_stopped", None, io);
        self.session = None;
        io.display.clear();
        io.events.stop(LedEvent::BleProvisioning);
        log::info!("BLE provisioning stop");
    }

    pub fn process(&mut self, io: &mut ProvisioningIo<'_>) {
        while let Some(event) = self.transport.poll_event() {
            self.handle_event(event, io);
        }

        let now = io.now_ms;
        let timing = self.config.passkey_timing;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.update_passkey(now, &timing, io.display);

        if session.state == SessionState::WifiConnecting {
            if io.wifi.status() == WifiStatus::Connected {
                let ip = io.wifi.local_ip().map(|ip| ip.to_string()).unwrap_or_default();
                session.state = SessionState::Active;
                log::info!("BLE WiFi connect succeeded, IP {ip}");
                self.notify_json("wifi_ok", Some(("ip", &ip)), io);
                return;
            }
            if now.saturating_sub(session.last_status_notify_ms) >= self.config.renotify_ms {
                session.last_status_notify_ms = now;
                self.notify_json("wifi_connecting", None, io);
            }
            self.check_connect_timeout(io);
        }

        let connect_pending = self
            .session
            .as_ref()
            .is_some_and(|s| s.connect_requested && s.state != SessionState::WifiConnecting);
        if connect_pending {
            self.start_wifi_connect(io);
        }

        if let (Some(limit), Some(session)) = (self.config.timeout_ms, self.session.as_ref()) {
            if now.saturating_sub(session.started_ms) > limit {
                log::warn!("BLE provisioning timeout reached");
                self.timed_out = true;
                self.stop(io);
            }
        }
    }

    fn check_connect_timeout(&mut self, io: &mut ProvisioningIo<'_>) {
        let Some(session) = self.session.as_mut() else { return };
        if io.now_ms.saturating_sub(session.wifi_connect_started_ms) <= self.config.connect_window_ms {
            return;
        }
        let status = io.wifi.status();
        let state = if status == WifiStatus::WrongPassword {
            "wifi_auth_fail"
        } else {
            "wifi_fail"
        };
        session.state = SessionState::Active;
        log::warn!("BLE WiFi connect failed: {}", status.failure_reason());
        self.notify_json(state, Some(("reason", status.failure_reason())), io);
        if let Err(e) = io.wifi.disconnect() {
            log::warn!("WiFi disconnect failed: {e}");
        }
    }

    fn start_wifi_connect(&mut self, io: &mut ProvisioningIo<'_>) {
        let Some(session) = self.session.as_mut() else { return };
        if !session.has_credentials() {
            return;
        }
        session.state = SessionState::WifiConnecting;
        session.wifi_connect_started_ms = io.now_ms;
        session.last_status_notify_ms = io.now_ms;
        session.attempt += 1;
        session.connect_requested = false;
        log::info!("BLE WiFi connect starting (SSID={})", session.ssid);
        if let Err(e) = io.wifi.begin(&session.ssid, &session.password) {
            log::warn!("WiFi begin failed: {e}");
        }
        self.notify_json("wifi_connecting", None, io);
    }

    fn handle_event(&mut self, event: BleEvent, io: &mut ProvisioningIo<'_>) {
        match event {
            BleEvent::ClientConnected => {
                self.has_client = true;
                self.publish("ble_connected");
            }
            BleEvent::ClientDisconnected => {
                self.has_client = false;
                self.publish("ble_disconnected");
                if self.session.is_some() {
                    if let Err(e) = self.transport.start_advertising() {
                        log::warn!("BLE advertising restart failed: {e}");
                    }
                }
            }
            BleEvent::Write { characteristic, value } => self.handle_write(characteristic, &value, io),
        }
    }

    fn handle_write(&mut self, characteristic: Characteristic, raw: &[u8], io: &mut ProvisioningIo<'_>) {
        let Some(session) = self.session.as_mut() else {
            log::debug!("BLE write ignored, provisioning inactive");
            return;
        };
        let value = String::from_utf8_lossy(raw).trim().to_string();
        log::info!("BLE write: {}", characteristic.label());

        match characteristic {
            Characteristic::Ssid => session.ssid = value,
            Characteristic::Password => session.password = value,
            Characteristic::Command => match value.as_str() {
                "apply" | "APPLY" => {
                    session.connect_requested = true;
                    return;
                }
                "stop" | "STOP" => {
                    self.notify_json("ble_stop_ack", None, io);
                    self.stop(io);
                    return;
                }
                other => log::debug!("Unknown BLE command: {other}"),
            },
        }

        let partial = !session.ssid.is_empty() || !session.password.is_empty();
        let complete = session.has_credentials();
        if complete {
            session.connect_requested = true;
        }
        if partial {
            self.notify_json("creds_partial", None, io);
        }
        if complete {
            self.notify_json("creds_received", None, io);
        }
    }

    fn publish(&mut self, value: &str) {
        self.transport.set_status(value);
        if self.has_client {
            self.transport.notify_status();
        }
    }

    fn notify_json(&mut self, state: &str, detail: Option<(&str, &str)>, io: &ProvisioningIo<'_>) {
        let Some(session) = self.session.as_ref() else { return };
        let payload = StatusPayload {
            state,
            hardware_id: &self.hardware_id,
            uptime_ms: io.now_ms.to_string(),
            wifi_status: io.wifi.status().code().to_string(),
            rssi: io.wifi.rssi().unwrap_or(0).to_string(),
            attempt: session.attempt.to_string(),
            ble_reason: Some(session.reason.as_str()),
            ssid: Some(session.ssid.as_str()).filter(|s| !s.is_empty()),
            detail: detail.into_iter().collect(),
        };
        let json = serde_json::to_string(&payload).unwrap_or_else(|e| {
            log::error!("Status payload encoding failed: {e}");
            format!("{{\"state\":\"{state}\"}}")
        });
        self.publish(&json);
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// One-shot: true once after the session timed out
    pub fn take_timeout(&mut self) -> bool {
        std::mem::take(&mut self.timed_out)
    }

    pub fn state_name(&self) -> &'static str {
        match self.session.as_ref().map(|s| s.state) {
            None | Some(SessionState::Idle) => "idle",
            Some(SessionState::Active) => "active",
            Some(SessionState::WifiConnecting) => "wifi_connecting",
        }
    }

    pub fn session(&self) -> Option<&ProvisioningSession> {
        self.session.as_ref()
    }

    pub fn transport(&self) -> &B {
        &self.transport
    }
}
