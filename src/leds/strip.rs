use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::rmt::config::TransmitConfig;
use esp_idf_hal::rmt::{PinState, Pulse, RmtChannel, TxRmtDriver, VariableLengthSignal};
use smart_leds::{brightness, RGB8};

/// WS2812 bit timings
struct BitPulses {
    zero: [Pulse; 2],
    one: [Pulse; 2],
}

impl BitPulses {
    fn new(ticks_hz: esp_idf_hal::units::Hertz) -> Result<Self> {
        let pulse = |state: PinState, ns: u64| Pulse::new_with_duration(ticks_hz, state, &Duration::from_nanos(ns));
        Ok(Self {
            zero: [pulse(PinState::High, 350)?, pulse(PinState::Low, 800)?],
            one: [pulse(PinState::High, 700)?, pulse(PinState::Low, 600)?],
        })
    }
}

/// Pixel buffer plus the RMT channel that clocks it out
pub struct LedStrip {
    tx: TxRmtDriver<'static>,
    bits: BitPulses,
    pixels: Vec<RGB8>,
    brightness: u8,
}

impl LedStrip {
    pub fn new<C: RmtChannel>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = impl OutputPin> + 'static,
        len: usize,
    ) -> Result<Self> {
        let config = TransmitConfig::new().clock_divider(1);
        let tx = TxRmtDriver::new(channel, pin, &config)?;
        let bits = BitPulses::new(tx.counter_clock()?)?;
        Ok(Self {
            tx,
            bits,
            pixels: vec![RGB8::default(); len],
            brightness: u8::MAX,
        })
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn set_brightness(&mut self, value: u8) {
        self.brightness = value;
    }

    pub fn clear(&mut self) {
        self.pixels.fill(RGB8::default());
    }

    /// Out-of-range indices are ignored
    pub fn set(&mut self, index: usize, color: RGB8) {
        if let Some(pixel) = self.pixels.get_mut(index) {
            *pixel = color;
        }
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.write() {
            log::warn!("LED strip write failed: {:?}", e);
        }
    }

    fn write(&mut self) -> Result<()> {
        let mut signal = VariableLengthSignal::with_capacity(self.pixels.len() * 24);
        for pixel in brightness(self.pixels.iter().copied(), self.brightness) {
            // WS2812 expects GRB order, MSB first
            let grb = (u32::from(pixel.g) << 16) | (u32::from(pixel.r) << 8) | u32::from(pixel.b);
            for bit in (0..24).rev() {
                let pulses = if grb & (1 << bit) != 0 { &self.bits.one } else { &self.bits.zero };
                signal.push(pulses)?;
            }
        }
        self.tx.start_blocking(&signal)?;
        Ok(())
    }
}
