//! Word grid strip and the three views the runtime draws through it.
//!
//! The strip is an 11 x 10 letter grid in reading order, followed by the four
//! corner minute LEDs and, on logo products, the logo pixels. Word tables per
//! grid variant are not carried here; the face uses a linear layout.

mod strip;

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{NaiveDateTime, Timelike};
use smart_leds::RGB8;
use wordclock_core::led_events::{Rgb, StatusLeds};
use wordclock_core::provisioning::PasskeyDisplay;
use wordclock_core::runtime::ClockFace;
use wordclock_core::settings::DeviceSettings;

pub use strip::LedStrip;

pub type SharedStrip = Rc<RefCell<LedStrip>>;

const GRID_COLUMNS: usize = 11;
const GRID_ROWS: usize = 10;
const GRID_LEDS: usize = GRID_COLUMNS * GRID_ROWS;
const CORNER_LEDS: std::ops::Range<usize> = GRID_LEDS..GRID_LEDS + 4;

const STARTUP_STEP_MS: u64 = 80;
const WARM_WHITE: RGB8 = RGB8 { r: 255, g: 170, b: 90 };
const PASSKEY_COLOR: RGB8 = RGB8 { r: 0, g: 60, b: 255 };

fn row(index: usize) -> std::ops::Range<usize> {
    let start = index * GRID_COLUMNS;
    start..start + GRID_COLUMNS
}

/// Time on the grid: hour cells from the top left, five-minute blocks on the
/// bottom row, remaining minutes on the corner LEDs
pub fn time_pixels(hour: u32, minute: u32) -> Vec<usize> {
    let hour12 = match hour % 12 {
        0 => 12,
        h => h as usize,
    };
    let blocks = (minute / 5) as usize;
    let extra = (minute % 5) as usize;

    let mut pixels: Vec<usize> = (0..hour12).collect();
    pixels.extend(row(GRID_ROWS - 1).take(blocks));
    pixels.extend(CORNER_LEDS.take(extra));
    pixels
}

/// Passkey digit `d` lights grid row `d`
pub fn digit_pixels(digit: u8, first: bool) -> Vec<usize> {
    let mut pixels: Vec<usize> = match digit as usize {
        d @ 1..=9 => row(d).collect(),
        _ => Vec::new(),
    };
    if first {
        pixels.extend(CORNER_LEDS);
    }
    pixels
}

fn effective_brightness(settings: &DeviceSettings) -> u8 {
    if settings.night_mode_active {
        settings.brightness / 4
    } else {
        settings.brightness
    }
}

pub struct GridFace {
    strip: SharedStrip,
    startup_began_ms: Option<u64>,
    last_frame: Option<(Vec<usize>, u8)>,
}

impl GridFace {
    pub fn new(strip: SharedStrip) -> Self {
        Self {
            strip,
            startup_began_ms: None,
            last_frame: None,
        }
    }
}

impl ClockFace for GridFace {
    fn startup_running(&mut self, now_ms: u64) -> bool {
        let began = *self.startup_began_ms.get_or_insert(now_ms);
        let step = (now_ms.saturating_sub(began) / STARTUP_STEP_MS) as usize;
        if step >= GRID_ROWS {
            return false;
        }

        let mut strip = self.strip.borrow_mut();
        strip.set_brightness(u8::MAX / 4);
        strip.clear();
        for i in row(step) {
            strip.set(i, WARM_WHITE);
        }
        strip.flush();
        true
    }

    fn render(&mut self, time: Option<NaiveDateTime>, settings: &DeviceSettings) {
        let pixels = match time {
            Some(t) => time_pixels(t.hour(), t.minute()),
            None => Vec::new(),
        };
        let level = effective_brightness(settings);
        let frame = (pixels, level);
        if self.last_frame.as_ref() == Some(&frame) {
            return;
        }

        let mut strip = self.strip.borrow_mut();
        strip.set_brightness(level);
        strip.clear();
        for &i in &frame.0 {
            strip.set(i, WARM_WHITE);
        }
        strip.flush();
        self.last_frame = Some(frame);
    }
}

/// Status blinks on the corner LEDs; colors arrive pre-dimmed
pub struct CornerStatusLeds {
    strip: SharedStrip,
}

impl CornerStatusLeds {
    pub fn new(strip: SharedStrip) -> Self {
        Self { strip }
    }
}

impl StatusLeds for CornerStatusLeds {
    fn show(&mut self, color: Rgb) {
        let mut strip = self.strip.borrow_mut();
        strip.set_brightness(u8::MAX);
        strip.clear();
        for i in CORNER_LEDS {
            strip.set(i, RGB8::new(color.r, color.g, color.b));
        }
        strip.flush();
    }

    fn clear(&mut self) {
        let mut strip = self.strip.borrow_mut();
        strip.clear();
        strip.flush();
    }
}

pub struct GridPasskeyDisplay {
    strip: SharedStrip,
}

impl GridPasskeyDisplay {
    pub fn new(strip: SharedStrip) -> Self {
        Self { strip }
    }
}

impl PasskeyDisplay for GridPasskeyDisplay {
    fn show_digit(&mut self, digit: u8, first: bool) {
        let mut strip = self.strip.borrow_mut();
        strip.set_brightness(u8::MAX / 4);
        strip.clear();
        for i in digit_pixels(digit, first) {
            strip.set(i, PASSKEY_COLOR);
        }
        strip.flush();
    }

    fn clear(&mut self) {
        let mut strip = self.strip.borrow_mut();
        strip.clear();
        strip.flush();
    }
}
