use esp_idf_svc::sys;
use wordclock_core::system::{SystemControl, SystemStats};

/// Heap, clock and reset information plus the reboot hook
pub struct EspSystem;

impl EspSystem {
    pub fn new() -> Self {
        Self
    }
}

impl SystemControl for EspSystem {
    fn stats(&self) -> SystemStats {
        unsafe {
            SystemStats {
                uptime_secs: (sys::esp_timer_get_time() / 1_000_000) as u64,
                free_heap: sys::esp_get_free_heap_size(),
                min_free_heap: sys::esp_get_minimum_free_heap_size(),
                heap_size: sys::heap_caps_get_total_size(sys::MALLOC_CAP_DEFAULT) as u32,
                cpu_freq_mhz: sys::ets_get_cpu_frequency(),
                chip_temp_c: None,
                reset_reason: sys::esp_reset_reason() as i32,
            }
        }
    }

    fn restart(&mut self) {
        log::logger().flush();
        unsafe { sys::esp_restart() }
    }
}
