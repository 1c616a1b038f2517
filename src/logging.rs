use log::{Level, LevelFilter, Metadata, Record};
use std::sync::OnceLock;
use std::time::Instant;

static BOOT_TIME: OnceLock<Instant> = OnceLock::new();

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Serial logger printing colored lines stamped with the time since boot
struct ClockLogger;

/// `  1.234s`, ` 2m05s` or ` 1h02m` depending on how long we have been up
fn compact_stamp(elapsed_ms: u64) -> String {
    let seconds = elapsed_ms / 1000;
    let millis = elapsed_ms % 1000;
    if seconds < 60 {
        format!("{:>3}.{:03}s", seconds, millis)
    } else if seconds < 3600 {
        format!("{:>2}m{:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

fn short_module(path: Option<&str>) -> &str {
    let module = path.and_then(|p| p.rsplit("::").next()).unwrap_or("unknown");
    match module.char_indices().nth(12) {
        Some((idx, _)) => &module[..idx],
        None => module,
    }
}

impl log::Log for ClockLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let boot_time = BOOT_TIME.get_or_init(Instant::now);
        let elapsed = boot_time.elapsed().as_millis() as u64;

        let (color, level_char) = match record.level() {
            Level::Error => (colors::BRIGHT_RED, 'E'),
            Level::Warn => (colors::BRIGHT_YELLOW, 'W'),
            Level::Info => (colors::BRIGHT_GREEN, 'I'),
            Level::Debug => (colors::BRIGHT_BLUE, 'D'),
            Level::Trace => (colors::GRAY, 'T'),
        };

        println!(
            "{}{} [{}] {:>12} | {}{}",
            color,
            compact_stamp(elapsed),
            level_char,
            short_module(record.module_path()),
            record.args(),
            colors::RESET
        );
    }

    fn flush(&self) {}
}

static LOGGER: ClockLogger = ClockLogger;

/// Install the serial logger at `level`
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(Instant::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);

    println!("{}┌─────────────────────────────────────────┐{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}│            Wordclock firmware           │{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}└─────────────────────────────────────────┘{}", colors::BRIGHT_GREEN, colors::RESET);
    Ok(())
}

/// Parse and set log level from a string; returns true if applied
pub fn set_max_level_from_str(level: &str) -> bool {
    let lf = match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => return false,
    };
    log::set_max_level(lf);
    true
}
