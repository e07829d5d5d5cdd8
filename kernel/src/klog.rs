//! Structured kernel log service
//!
//! A fixed-size, heap-free circular buffer of structured log entries behind a
//! [`spin::Mutex`], fed by an implementation of the [`log`] facade. Each entry
//! carries a timestamp, severity, target tag, and a fixed-length message; once
//! the buffer is full the oldest entries are overwritten. The logger also
//! writes through to the serial console.

use core::fmt::{self, Write as _};

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

/// Maximum number of entries the circular buffer holds.
pub const LOG_BUFFER_CAPACITY: usize = 256;

/// Maximum stored length of a log message, in bytes.
pub const LOG_MESSAGE_MAX_LEN: usize = 128;

/// Maximum stored length of a target tag, in bytes.
pub const LOG_TARGET_MAX_LEN: usize = 16;

/// A single structured log entry. All fields are inline fixed-size arrays so
/// the ring never allocates.
#[derive(Clone, Copy)]
pub struct LogEntry {
    /// Monotonic timestamp in microseconds.
    pub timestamp_us: u64,
    /// Severity of the message.
    pub level: log::Level,
    /// Subsystem tag, truncated to [`LOG_TARGET_MAX_LEN`].
    target: [u8; LOG_TARGET_MAX_LEN],
    target_len: u8,
    /// Message text, truncated to [`LOG_MESSAGE_MAX_LEN`].
    message: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            timestamp_us: 0,
            level: log::Level::Info,
            target: [0; LOG_TARGET_MAX_LEN],
            target_len: 0,
            message: [0; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    /// The subsystem tag as a string slice.
    pub fn target(&self) -> &str {
        core::str::from_utf8(&self.target[..self.target_len as usize]).unwrap_or("")
    }

    /// The message text as a string slice.
    pub fn message(&self) -> &str {
        core::str::from_utf8(&self.message[..self.message_len as usize]).unwrap_or("")
    }
}

struct LogRing {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    head: usize,
    len: usize,
    dropped: u64,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            entries: [LogEntry::empty(); LOG_BUFFER_CAPACITY],
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        if self.len == LOG_BUFFER_CAPACITY {
            self.dropped += 1;
        } else {
            self.len += 1;
        }
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());

/// Fixed-capacity `fmt::Write` sink used to format messages without a heap.
struct FixedWriter<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedWriter<N> {
    const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }
}

impl<const N: usize> fmt::Write for FixedWriter<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = N - self.len;
        let take = s.len().min(remaining);
        // Truncate on a char boundary so the stored bytes stay valid UTF-8.
        let take = if take < s.len() {
            let mut t = take;
            while t > 0 && !s.is_char_boundary(t) {
                t -= 1;
            }
            t
        } else {
            take
        };
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut msg = FixedWriter::<LOG_MESSAGE_MAX_LEN>::new();
        write!(msg, "{}", record.args()).ok();

        let mut entry = LogEntry::empty();
        entry.timestamp_us = crate::time::monotonic_us();
        entry.level = record.level();
        let tlen = record.target().len().min(LOG_TARGET_MAX_LEN);
        entry.target[..tlen].copy_from_slice(&record.target().as_bytes()[..tlen]);
        entry.target_len = tlen as u8;
        entry.message[..msg.len].copy_from_slice(&msg.buf[..msg.len]);
        entry.message_len = msg.len as u8;

        LOG_RING.lock().push(entry);

        crate::println!(
            "[{:>5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Idempotent; a second call is a no-op.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Change the maximum level recorded by the logger.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Number of entries currently held in the ring.
pub fn count() -> usize {
    LOG_RING.lock().len
}

/// Number of entries overwritten since boot.
pub fn dropped() -> u64 {
    LOG_RING.lock().dropped
}

/// Copy out the current ring contents, oldest first.
pub fn snapshot() -> alloc::vec::Vec<LogEntry> {
    let ring = LOG_RING.lock();
    let mut out = alloc::vec::Vec::with_capacity(ring.len);
    let start = (ring.head + LOG_BUFFER_CAPACITY - ring.len) % LOG_BUFFER_CAPACITY;
    for i in 0..ring.len {
        out.push(ring.entries[(start + i) % LOG_BUFFER_CAPACITY]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_writer_truncates() {
        let mut w = FixedWriter::<8>::new();
        write!(w, "0123456789").ok();
        assert_eq!(&w.buf[..w.len], b"01234567");
    }

    #[test]
    fn ring_wraps_and_counts_drops() {
        let mut ring = LogRing::new();
        for _ in 0..LOG_BUFFER_CAPACITY + 3 {
            ring.push(LogEntry::empty());
        }
        assert_eq!(ring.len, LOG_BUFFER_CAPACITY);
        assert_eq!(ring.dropped, 3);
    }

    #[test]
    fn entry_strings_round_trip() {
        let mut entry = LogEntry::empty();
        entry.target[..2].copy_from_slice(b"mm");
        entry.target_len = 2;
        entry.message[..5].copy_from_slice(b"hello");
        entry.message_len = 5;
        assert_eq!(entry.target(), "mm");
        assert_eq!(entry.message(), "hello");
    }
}
