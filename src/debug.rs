//! Audio-thread logging and numeric checks.
//!
//! `sw_log!` formats into a fixed-size entry and pushes it onto a lock-free
//! single-producer ring, so it can be used from `process()`. Entries are
//! forwarded to the `log` facade by [`logger::drain_to_log`] from a
//! non-real-time thread. Without the `debug` feature the macro does nothing.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    /// `log` target of everything queued from the audio thread, so hosts can
    /// filter or route it apart from control-thread messages.
    pub const AUDIO_TARGET: &str = "spectral_wola::audio";

    // Ring capacity in entries. One slot always stays empty.
    const RING_CAPACITY: usize = 256;
    // Longer messages are truncated.
    const MESSAGE_CAPACITY: usize = 256;

    #[derive(Clone, Copy)]
    struct Entry {
        len: usize,
        bytes: [u8; MESSAGE_CAPACITY],
    }

    impl Entry {
        const EMPTY: Entry = Entry {
            len: 0,
            bytes: [0; MESSAGE_CAPACITY],
        };

        /// `write_str` only ever cuts on a char boundary, so the bytes are
        /// valid UTF-8; a corrupted slot reads as empty.
        fn text(&self) -> &str {
            std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
        }
    }

    impl fmt::Write for Entry {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let mut n = s.len().min(MESSAGE_CAPACITY - self.len);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n;
            Ok(())
        }
    }

    struct Ring {
        write: AtomicUsize,
        read: AtomicUsize,
        slots: Box<[UnsafeCell<Entry>]>,
    }

    // One writer (the audio thread) and one reader (the drain). Each slot is
    // only touched by the side that currently owns it.
    unsafe impl Sync for Ring {}

    impl Ring {
        fn new() -> Self {
            Self {
                write: AtomicUsize::new(0),
                read: AtomicUsize::new(0),
                slots: (0..RING_CAPACITY)
                    .map(|_| UnsafeCell::new(Entry::EMPTY))
                    .collect(),
            }
        }

        /// Drops the entry when the ring is full.
        fn push(&self, entry: &Entry) {
            let write = self.write.load(Ordering::Relaxed);
            let next = (write + 1) % self.slots.len();
            if next == self.read.load(Ordering::Acquire) {
                return;
            }
            unsafe { *self.slots[write].get() = *entry };
            self.write.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<Entry> {
            let read = self.read.load(Ordering::Relaxed);
            if read == self.write.load(Ordering::Acquire) {
                return None;
            }
            let entry = unsafe { *self.slots[read].get() };
            self.read
                .store((read + 1) % self.slots.len(), Ordering::Release);
            Some(entry)
        }
    }

    static RING: OnceLock<Ring> = OnceLock::new();
    static ENABLED: AtomicBool = AtomicBool::new(false);

    /// Allocates the ring. Call once from a non-real-time thread.
    pub fn init_logger() {
        RING.get_or_init(Ring::new);
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn log_args(args: fmt::Arguments) {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Some(ring) = RING.get() else {
            return;
        };
        let mut entry = Entry::EMPTY;
        let _ = fmt::write(&mut entry, args);
        ring.push(&entry);
    }

    /// Forwards queued entries to the `log` facade. Returns how many.
    pub fn drain_to_log() -> usize {
        let Some(ring) = RING.get() else {
            return 0;
        };
        let mut count = 0;
        while let Some(entry) = ring.pop() {
            if entry.len > 0 {
                log::warn!(target: AUDIO_TARGET, "{}", entry.text());
                count += 1;
            }
        }
        count
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_ring_round_trip() {
            init_logger();
            drain_to_log();
            log_args(format_args!("hop {} of {}", 3, 4));
            assert!(drain_to_log() >= 1);
        }

        #[test]
        fn test_long_messages_truncate() {
            let mut entry = Entry::EMPTY;
            let long = "x".repeat(MESSAGE_CAPACITY * 2);
            let _ = fmt::write(&mut entry, format_args!("{}", long));
            assert_eq!(entry.text().len(), MESSAGE_CAPACITY);
        }

        #[test]
        fn test_truncation_keeps_whole_characters() {
            let mut entry = Entry::EMPTY;
            let padding = "x".repeat(MESSAGE_CAPACITY - 1);
            let _ = fmt::write(&mut entry, format_args!("{}é", padding));
            assert_eq!(entry.len, MESSAGE_CAPACITY - 1);
            assert_eq!(entry.text(), padding);
        }
    }
}

#[cfg(feature = "debug")]
pub(crate) fn sw_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn sw_log_inner(_args: fmt::Arguments) {}

#[macro_export]
macro_rules! sw_log {
    ($($arg:tt)*) => {
        $crate::debug::sw_log_inner(format_args!($($arg)*))
    };
}

/// First sample that is NaN, infinite or subnormal, with its index.
pub fn find_invalid_sample(samples: &[f32]) -> Option<(usize, f32)> {
    samples
        .iter()
        .position(|s| !s.is_finite() || s.is_subnormal())
        .map(|i| (i, samples[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_invalid_sample() {
        assert_eq!(find_invalid_sample(&[0.0, 1.0, -2.5]), None);
        assert_eq!(find_invalid_sample(&[0.0, f32::INFINITY]), Some((1, f32::INFINITY)));
        let (index, _) = find_invalid_sample(&[1.0, 1.0, f32::NAN]).unwrap();
        assert_eq!(index, 2);
        assert!(find_invalid_sample(&[f32::MIN_POSITIVE / 2.0]).is_some());
    }
}
