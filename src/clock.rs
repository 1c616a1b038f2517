use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::sntp::{EspSntp, SyncStatus};
use esp_idf_svc::sys;
use std::cell::Cell;
use wordclock_core::clock::Clock;

pub const TZ_INFO: &str = "CET-1CEST,M3.5.0/2,M10.5.0/3";

/// Uptime from the ESP timer, wall time from SNTP
pub struct EspClock {
    sntp: EspSntp<'static>,
    synced: Cell<bool>,
}

impl EspClock {
    pub fn new(tz: &str) -> Result<Self> {
        std::env::set_var("TZ", tz);
        unsafe { sys::tzset() };
        let sntp = EspSntp::new_default()?;
        log::info!("SNTP started, TZ={}", tz);
        Ok(Self {
            sntp,
            synced: Cell::new(false),
        })
    }

    fn is_synced(&self) -> bool {
        if !self.synced.get() && self.sntp.get_sync_status() == SyncStatus::Completed {
            log::info!("Time synchronised");
            self.synced.set(true);
        }
        self.synced.get()
    }
}

impl Clock for EspClock {
    fn now_ms(&self) -> u64 {
        (unsafe { sys::esp_timer_get_time() } / 1000) as u64
    }

    fn local_time(&self) -> Option<NaiveDateTime> {
        if !self.is_synced() {
            return None;
        }

        let mut tm: sys::tm = unsafe { std::mem::zeroed() };
        unsafe {
            let now = sys::time(std::ptr::null_mut());
            if sys::localtime_r(&now, &mut tm).is_null() {
                return None;
            }
        }

        NaiveDate::from_ymd_opt(tm.tm_year + 1900, (tm.tm_mon + 1) as u32, tm.tm_mday as u32)?.and_hms_opt(
            tm.tm_hour as u32,
            tm.tm_min as u32,
            tm.tm_sec.min(59) as u32,
        )
    }

    fn delay_ms(&self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}
