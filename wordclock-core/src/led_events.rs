//! Status animations that temporarily take over the clock face.
//!
//! Any number of events can be active at once; only the highest-priority one
//! renders. `FirmwareCheck` is a one-shot pulse that clears itself once its
//! pattern has played.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedEvent {
    FirmwareCheck,
    FirmwareAvailable,
    FirmwareDownloading,
    FirmwareApplying,
    NtpFailed,
    MqttDisconnected,
    BleProvisioning,
    WifiManagerPortal,
}

/// Highest priority first
pub const PRIORITY: [LedEvent; 8] = [
    LedEvent::BleProvisioning,
    LedEvent::WifiManagerPortal,
    LedEvent::FirmwareApplying,
    LedEvent::FirmwareDownloading,
    LedEvent::FirmwareAvailable,
    LedEvent::NtpFailed,
    LedEvent::MqttDisconnected,
    LedEvent::FirmwareCheck,
];

/// Blink intensity, ~5% of full scale
const BLINK_SCALE: u16 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn scaled(self, scale: u16) -> Self {
        let s = |v: u8| ((u16::from(v) * scale) / 255) as u8;
        Self::new(s(self.r), s(self.g), s(self.b))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub color: Rgb,
    pub on_ms: u64,
    pub off_ms: u64,
    pub flashes: u8,
    pub pause_ms: u64,
    pub repeat: bool,
}

impl LedEvent {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn pattern(self) -> BlinkPattern {
        let p = |color, on_ms, off_ms, flashes, pause_ms, repeat| BlinkPattern {
            color,
            on_ms,
            off_ms,
            flashes,
            pause_ms,
            repeat,
        };
        match self {
            Self::BleProvisioning => p(Rgb::new(0, 120, 255), 120, 880, 2, 5_000, true),
            Self::WifiManagerPortal => p(Rgb::new(160, 0, 200), 150, 150, 2, 2_000, true),
            Self::FirmwareApplying => p(Rgb::new(255, 255, 255), 100, 100, 2, 1_000, true),
            Self::FirmwareDownloading => p(Rgb::new(0, 120, 255), 100, 100, 2, 1_000, true),
            Self::FirmwareAvailable => p(Rgb::new(140, 0, 255), 1_000, 1_000, 1, 0, true),
            Self::NtpFailed => p(Rgb::new(255, 140, 0), 150, 150, 3, 10_000, true),
            Self::MqttDisconnected => p(Rgb::new(0, 80, 255), 150, 150, 1, 30_000, true),
            Self::FirmwareCheck => p(Rgb::new(0, 200, 200), 150, 150, 2, 0, false),
        }
    }
}

/// Set of active events packed into a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveEvents(u8);

impl ActiveEvents {
    pub fn insert(&mut self, event: LedEvent) {
        self.0 |= event.bit();
    }

    pub fn remove(&mut self, event: LedEvent) {
        self.0 &= !event.bit();
    }

    pub fn contains(&self, event: LedEvent) -> bool {
        self.0 & event.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

pub fn highest_priority(active: &ActiveEvents) -> Option<LedEvent> {
    PRIORITY.iter().copied().find(|e| active.contains(*e))
}

/// Pixels reserved for status blinking
pub trait StatusLeds {
    fn show(&mut self, color: Rgb);
    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
struct BlinkState {
    on: bool,
    last_toggle_ms: Option<u64>,
    count: u8,
    pause_until_ms: Option<u64>,
}

impl BlinkState {
    /// Advances one step; false once a non-repeating pattern has finished
    fn run(&mut self, now: u64, pattern: &BlinkPattern, leds: &mut dyn StatusLeds) -> bool {
        if let Some(until) = self.pause_until_ms {
            if now >= until {
                self.pause_until_ms = None;
                self.last_toggle_ms = None;
            } else {
                leds.clear();
                return true;
            }
        }

        let phase_ms = if self.on { pattern.on_ms } else { pattern.off_ms };
        let due = match self.last_toggle_ms {
            None => true,
            Some(last) => now.saturating_sub(last) >= phase_ms,
        };
        if !due {
            return true;
        }

        self.on = !self.on;
        self.last_toggle_ms = Some(now);
        if self.on {
            leds.show(pattern.color.scaled(BLINK_SCALE));
            return true;
        }

        leds.clear();
        self.count += 1;
        if self.count >= pattern.flashes {
            self.count = 0;
            if !pattern.repeat {
                return false;
            }
            if pattern.pause_ms > 0 {
                self.pause_until_ms = Some(now + pattern.pause_ms);
            }
        }
        true
    }
}

pub struct LedEvents {
    enabled: bool,
    active: ActiveEvents,
    current: Option<LedEvent>,
    blink: BlinkState,
}

impl LedEvents {
    /// A disabled engine still tracks state but never claims the display
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            active: ActiveEvents::default(),
            current: None,
            blink: BlinkState::default(),
        }
    }

    pub fn start(&mut self, event: LedEvent) {
        if event == LedEvent::FirmwareCheck {
            return self.pulse(event);
        }
        self.active.insert(event);
    }

    pub fn stop(&mut self, event: LedEvent) {
        self.active.remove(event);
    }

    /// Only `FirmwareCheck` pulses; other events must be started
    pub fn pulse(&mut self, event: LedEvent) {
        if event == LedEvent::FirmwareCheck {
            self.active.insert(event);
        }
    }

    pub fn is_active(&self, event: LedEvent) -> bool {
        self.active.contains(event)
    }

    pub fn current(&self) -> Option<LedEvent> {
        highest_priority(&self.active)
    }

    /// Renders the top event. Returns true while an event owns the display.
    pub fn tick(&mut self, now: u64, leds: &mut dyn StatusLeds) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(next) = highest_priority(&self.active) else {
            return false;
        };

        if self.current != Some(next) {
            self.current = Some(next);
            self.blink = BlinkState::default();
        }

        let still_running = self.blink.run(now, &next.pattern(), leds);
        if !still_running && next == LedEvent::FirmwareCheck {
            self.active.remove(LedEvent::FirmwareCheck);
        }
        true
    }
}
