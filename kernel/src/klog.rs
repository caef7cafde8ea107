//! Structured kernel log buffer
//!
//! A fixed-size, heap-free circular buffer of structured log entries. Each
//! entry carries the uptime tick at which it was recorded, a severity level,
//! and a fixed-length message. The buffer is global state behind a
//! [`spin::Mutex`] and is fed through the standard [`log`] facade: kernel
//! subsystems use `log::info!` and friends, and the installed [`KernelLogger`]
//! formats the record into the ring while mirroring it to the UART console.
//!
//! Once full the ring wraps and overwrites the oldest entries.

use core::fmt::Write;

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

/// Maximum number of entries the ring can hold.
const LOG_CAPACITY: usize = 128;

/// Maximum length (in bytes) of a formatted message.
const LOG_MESSAGE_MAX_LEN: usize = 96;

/// A single structured log entry, stored inline with fixed-size arrays.
#[derive(Clone, Copy)]
pub struct LogEntry {
    /// Uptime tick at which the entry was recorded.
    pub tick: u64,
    /// Severity of the record.
    pub level: log::Level,
    /// Message bytes; only the first `len` are valid.
    pub message: [u8; LOG_MESSAGE_MAX_LEN],
    /// Valid length of `message`.
    pub len: usize,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            tick: 0,
            level: log::Level::Info,
            message: [0; LOG_MESSAGE_MAX_LEN],
            len: 0,
        }
    }

    /// The message as a string slice.
    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.message[..self.len]).unwrap_or("<non-utf8>")
    }
}

struct LogRing {
    entries: [LogEntry; LOG_CAPACITY],
    /// Index of the next slot to write.
    head: usize,
    /// Total number of records ever pushed.
    total: u64,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            entries: [LogEntry::empty(); LOG_CAPACITY],
            head: 0,
            total: 0,
        }
    }

    fn push(&mut self, tick: u64, level: log::Level, args: core::fmt::Arguments) {
        let entry = &mut self.entries[self.head];
        entry.tick = tick;
        entry.level = level;
        entry.len = 0;

        let mut sink = EntrySink { entry };
        // Truncation on overflow is fine; the sink just stops accepting bytes.
        let _ = write!(sink, "{}", args);

        self.head = (self.head + 1) % LOG_CAPACITY;
        self.total += 1;
    }
}

struct EntrySink<'a> {
    entry: &'a mut LogEntry,
}

impl Write for EntrySink<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = LOG_MESSAGE_MAX_LEN - self.entry.len;
        let take = s.len().min(room);
        self.entry.message[self.entry.len..self.entry.len + take]
            .copy_from_slice(&s.as_bytes()[..take]);
        self.entry.len += take;
        Ok(())
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());

/// `log::Log` implementation feeding the kernel log ring.
pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tick = crate::timer_ticks();
        LOG_RING.lock().push(tick, record.level(), *record.args());
        crate::println!("[{:>5}] {}: {}", tick, record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Called once during boot.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

/// Number of records pushed since boot (including overwritten ones).
pub fn record_count() -> u64 {
    LOG_RING.lock().total
}

/// Copy out the most recent entry, if any. Diagnostic use only.
pub fn last_entry() -> Option<LogEntry> {
    let ring = LOG_RING.lock();
    if ring.total == 0 {
        return None;
    }
    let idx = (ring.head + LOG_CAPACITY - 1) % LOG_CAPACITY;
    Some(ring.entries[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_records_and_wraps() {
        let mut ring = LogRing::new();
        for i in 0..LOG_CAPACITY + 3 {
            ring.push(i as u64, log::Level::Info, format_args!("entry {}", i));
        }
        assert_eq!(ring.total, (LOG_CAPACITY + 3) as u64);
        // Head wrapped past the start; oldest entries were overwritten.
        assert_eq!(ring.head, 3);
        assert_eq!(ring.entries[0].text(), "entry 128");
    }

    #[test]
    fn long_messages_truncate() {
        let mut ring = LogRing::new();
        let long = "x".repeat(2 * LOG_MESSAGE_MAX_LEN);
        ring.push(0, log::Level::Warn, format_args!("{}", long));
        assert_eq!(ring.entries[0].len, LOG_MESSAGE_MAX_LEN);
    }
}
