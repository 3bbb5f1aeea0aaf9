// src/watchdog.rs

pub const DEFAULT_THRESHOLD: u32 = 5;

/// Counts back-to-back acquisition faults; when enabled, asks for a device
/// reopen once the count reaches the threshold.
#[derive(Clone, Debug)]
pub struct Watchdog {
    enabled: bool,
    threshold: u32,
    count: u32,
}

impl Watchdog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            threshold: DEFAULT_THRESHOLD,
            count: 0,
        }
    }

    /// Returns `true` exactly when this fault trips the watchdog.
    pub fn fault(&mut self) -> bool {
        self.count += 1;
        if self.enabled && self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    pub fn success(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
