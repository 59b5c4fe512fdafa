use std::time::Duration;

use tracing::{info, warn};

/// Periodic bitrate accounting with edge logging.
///
/// Byte counts accumulate between ticks; each tick converts them to
/// kbit/s and logs the 0 → nonzero and nonzero → 0 transitions. A new
/// meter starts with a nonzero sentinel so a source that never
/// delivers a byte is reported as a loss on the first tick.
pub struct BitrateMeter {
    label: &'static str,
    bytes: u64,
    kbps: u32,
}

impl BitrateMeter {
    pub fn new(label: &'static str) -> Self {
        BitrateMeter {
            label,
            bytes: 0,
            kbps: 1,
        }
    }

    /// Current rate from the last tick, kbit/s.
    pub fn kbps(&self) -> u32 {
        self.kbps
    }

    pub fn account(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
    }

    /// Fold the accumulated bytes over `elapsed` into a rate.
    pub fn tick(&mut self, elapsed: Duration) {
        if self.bytes == 0 {
            if self.kbps != 0 {
                self.kbps = 0;
                warn!(input = self.label, "bitrate: 0Kbit/s");
            }
            return;
        }

        let had_rate = self.kbps > 1;
        let secs = elapsed.as_secs().max(1);
        self.kbps = (self.bytes * 8 / 1024 / secs) as u32;
        self.bytes = 0;
        if self.kbps != 0 && !had_rate {
            info!(input = self.label, kbps = self.kbps, "bitrate up");
        }
    }

    /// Reset to the startup state (used when the source is reopened).
    pub fn reset(&mut self) {
        self.bytes = 0;
        self.kbps = 0;
    }
}
