use crate::clock::Clock;
use crate::settings::SettingsStore;

/// Chip diagnostics reported with every heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SystemStats {
    pub uptime_secs: u64,
    pub free_heap: u32,
    pub min_free_heap: u32,
    pub heap_size: u32,
    pub cpu_freq_mhz: u32,
    pub chip_temp_c: Option<f32>,
    pub reset_reason: i32,
}

pub trait SystemControl {
    fn stats(&self) -> SystemStats;

    /// Reboots the chip. Never returns on hardware.
    fn restart(&mut self);
}

/// Flush pending settings, let the flash write settle, then reboot
pub fn safe_restart(
    system: &mut dyn SystemControl,
    settings: &mut SettingsStore,
    clock: &dyn Clock,
    settle_ms: u32,
) {
    if let Err(e) = settings.flush() {
        log::error!("Settings flush before restart failed: {e}");
    }
    clock.delay_ms(settle_ms);
    log::info!("Restarting");
    system.restart();
}
