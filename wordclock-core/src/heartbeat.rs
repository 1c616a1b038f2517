//! Authenticated liveness beacon doubling as fleet telemetry.
//!
//! Scheduling: nothing is sent until the startup delay has elapsed after
//! [`HeartbeatEngine::init`]; the first send is then armed as a trigger, later
//! ones follow the hourly interval. Sends only happen inside the half-minute
//! window of the wall clock. A failure starts a cooldown; a 401 forces one
//! re-registration and, if that fails, stops the engine for good.

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use thiserror::Error;

use crate::config::{HeartbeatPolicy, ProductConfig};
use crate::http::{HttpError, Request};
use crate::identity::DeviceIdentity;
use crate::registration::{register_device, Fleet};
use crate::system::SystemStats;

pub const HEARTBEAT_INTERVAL_MS: u64 = 60 * 60 * 1000;
pub const HEARTBEAT_STARTUP_DELAY_MS: u64 = 30 * 1000;
pub const HEARTBEAT_RETRY_INTERVAL_MS: u64 = 5 * 60 * 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatError {
    #[error("device not registered")]
    NotRegistered,

    #[error("WiFi not connected")]
    NotConnected,

    #[error("HTTP error: {0}")]
    Transport(#[from] HttpError),

    #[error("heartbeat rejected: HTTP {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("payload encoding failed: {0}")]
    Encode(String),
}

/// Device state reported alongside the chip diagnostics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Telemetry {
    pub stats: SystemStats,
    pub rssi: i32,
    pub grid_variant: Option<String>,
    pub brightness: u8,
    pub night_mode_active: bool,
    pub setup_complete: bool,
}

pub trait TelemetrySource {
    fn telemetry(&self) -> Telemetry;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatPayload<'a> {
    device_id: &'a str,
    firmware: &'a str,
    ui: &'a str,
    channel: &'a str,
    uptime: u64,
    free_heap: u32,
    min_free_heap: u32,
    heap_size: u32,
    cpu_freq_mhz: u32,
    rssi: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    grid_variant: Option<&'a str>,
    brightness: u8,
    night_mode_active: bool,
    setup_complete: bool,
    reset_reason: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    chip_temp: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatSchedule {
    pub initialized: bool,
    pub startup_ms: u64,
    pub startup_delay_complete: bool,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub trigger_pending: bool,
    pub stopped: bool,
    pub last_http_status: Option<u16>,
}

/// What one scheduler pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Not eligible this tick
    Idle,
    Sent,
    Failed,
    /// 401 recovered by re-registering; `resent` tells whether the retry landed
    Reregistered { resent: bool },
    /// Re-registration failed; terminal
    Stopped,
}

pub struct HeartbeatEngine {
    schedule: HeartbeatSchedule,
    interval_ms: u64,
    startup_delay_ms: u64,
    retry_interval_ms: u64,
    policy: HeartbeatPolicy,
}

impl HeartbeatEngine {
    pub fn new(config: &ProductConfig) -> Self {
        Self {
            schedule: HeartbeatSchedule::default(),
            interval_ms: config.timings.heartbeat_interval_ms,
            startup_delay_ms: config.timings.heartbeat_startup_delay_ms,
            retry_interval_ms: config.timings.heartbeat_retry_interval_ms,
            policy: config.heartbeat_policy,
        }
    }

    /// Resets all schedule state, including a previous stop
    pub fn init(&mut self, now: u64) {
        self.schedule = HeartbeatSchedule {
            initialized: true,
            startup_ms: now,
            ..HeartbeatSchedule::default()
        };
        log::info!("Heartbeat module initialized");
    }

    /// Send as soon as the next window opens
    pub fn trigger(&mut self) {
        self.schedule.trigger_pending = true;
        log::debug!("Heartbeat triggered");
    }

    pub fn is_initialized(&self) -> bool {
        self.schedule.initialized
    }

    pub fn is_stopped(&self) -> bool {
        self.schedule.stopped
    }

    pub fn last_http_status(&self) -> Option<u16> {
        self.schedule.last_http_status
    }

    pub fn schedule(&self) -> &HeartbeatSchedule {
        &self.schedule
    }

    /// Wall-clock gate; unknown time counts as inside when the policy says so
    pub fn in_send_window(&self, wall: Option<NaiveDateTime>) -> bool {
        match wall {
            Some(t) => (self.policy.window_start_sec..=self.policy.window_end_sec).contains(&t.second()),
            None => self.policy.bypass_window_when_unsynced,
        }
    }

    fn should_send(&self, now: u64, wall: Option<NaiveDateTime>) -> bool {
        let in_window = self.in_send_window(wall);
        if self.schedule.trigger_pending && in_window {
            return true;
        }
        match self.schedule.last_success_ms {
            None => false,
            Some(last) => now.saturating_sub(last) >= self.interval_ms && in_window,
        }
    }

    /// Scheduler pass; call every tick
    pub fn process(
        &mut self,
        now: u64,
        wall: Option<NaiveDateTime>,
        fleet: &mut Fleet<'_>,
        telemetry: &dyn TelemetrySource,
    ) -> HeartbeatOutcome {
        if !self.schedule.initialized || self.schedule.stopped || !fleet.link_up {
            return HeartbeatOutcome::Idle;
        }
        if !DeviceIdentity::load(&*fleet.identity).is_registered() {
            return HeartbeatOutcome::Idle;
        }

        if !self.schedule.startup_delay_complete {
            if now.saturating_sub(self.schedule.startup_ms) < self.startup_delay_ms {
                return HeartbeatOutcome::Idle;
            }
            self.schedule.startup_delay_complete = true;
            self.schedule.trigger_pending = true;
            log::debug!("Startup delay complete, will send first heartbeat");
        }

        if let Some(failed) = self.schedule.last_failure_ms {
            if now.saturating_sub(failed) < self.retry_interval_ms {
                return HeartbeatOutcome::Idle;
            }
        }

        if !self.should_send(now, wall) {
            return HeartbeatOutcome::Idle;
        }

        match self.send(fleet, telemetry) {
            Ok(()) => {
                self.record_success(now);
                HeartbeatOutcome::Sent
            }
            Err(_) if self.schedule.last_http_status == Some(401) => self.recover_unauthorized(now, fleet, telemetry),
            Err(_) => {
                self.schedule.last_failure_ms = Some(now);
                HeartbeatOutcome::Failed
            }
        }
    }

    fn record_success(&mut self, now: u64) {
        self.schedule.last_success_ms = Some(now);
        self.schedule.last_failure_ms = None;
        self.schedule.trigger_pending = false;
    }

    fn recover_unauthorized(
        &mut self,
        now: u64,
        fleet: &mut Fleet<'_>,
        telemetry: &dyn TelemetrySource,
    ) -> HeartbeatOutcome {
        log::warn!("Heartbeat 401: re-registering to refresh credentials");
        match register_device(fleet) {
            Ok(_) => {
                log::info!("Re-registered successfully, sending first heartbeat");
                self.schedule.last_failure_ms = None;
                self.schedule.trigger_pending = true;
                let resent = self.send(fleet, telemetry).is_ok();
                if resent {
                    self.record_success(now);
                } else {
                    self.schedule.last_failure_ms = Some(now);
                }
                HeartbeatOutcome::Reregistered { resent }
            }
            Err(e) => {
                log::error!("Re-register failed: {e} - stopping heartbeat");
                self.schedule.stopped = true;
                HeartbeatOutcome::Stopped
            }
        }
    }

    /// Immediate send, independent of the schedule
    pub fn send(&mut self, fleet: &mut Fleet<'_>, telemetry: &dyn TelemetrySource) -> Result<(), HeartbeatError> {
        self.schedule.last_http_status = None;

        let identity = DeviceIdentity::load(&*fleet.identity);
        let Some((device_id, token)) = identity.credentials() else {
            log::warn!("Cannot send heartbeat: device not registered");
            return Err(HeartbeatError::NotRegistered);
        };
        if !fleet.link_up {
            log::warn!("Cannot send heartbeat: WiFi not connected");
            return Err(HeartbeatError::NotConnected);
        }

        let t = telemetry.telemetry();
        let body = serde_json::to_vec(&HeartbeatPayload {
            device_id,
            firmware: &fleet.config.firmware_version,
            ui: fleet.ui_version,
            channel: fleet.channel.as_str(),
            uptime: t.stats.uptime_secs,
            free_heap: t.stats.free_heap,
            min_free_heap: t.stats.min_free_heap,
            heap_size: t.stats.heap_size,
            cpu_freq_mhz: t.stats.cpu_freq_mhz,
            rssi: t.rssi,
            grid_variant: t.grid_variant.as_deref(),
            brightness: t.brightness,
            night_mode_active: t.night_mode_active,
            setup_complete: t.setup_complete,
            reset_reason: t.stats.reset_reason,
            chip_temp: t.stats.chip_temp_c,
        })
        .map_err(|e| HeartbeatError::Encode(e.to_string()))?;

        let url = fleet.url("/api/v1/devices/heartbeat");
        let request = Request::post_json(&url, &body).header(&fleet.config.endpoints.device_header, token);
        log::debug!("Sending heartbeat to {url}");

        let response = fleet.http.send(&request).map_err(|e| {
            log::warn!("Heartbeat HTTP error: {e}");
            HeartbeatError::Transport(e)
        })?;
        self.schedule.last_http_status = Some(response.status);

        if !response.is_success() {
            let body = response.text();
            log::warn!("Heartbeat failed: HTTP {} - {}", response.status, body);
            return Err(HeartbeatError::Rejected {
                status: response.status,
                body,
            });
        }

        log::info!("Heartbeat sent successfully");
        Ok(())
    }
}
