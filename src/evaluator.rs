// src/evaluator.rs
//! Pass/fail checks and the failure tally kept across a run.

/// Symmetric band around zero; the limit itself still passes.
pub fn outside_band(value: f64, limit: f64) -> bool {
    value > limit || value < -limit
}

/// Drift from a captured baseline.
pub fn drifted(value: f64, baseline: f64, limit: f64) -> bool {
    outside_band(value - baseline, limit)
}

pub fn loopback_mismatch(commanded: u8, observed: u8) -> bool {
    commanded != observed
}

/// Analog output error in mV.
pub fn ao_error_mv(measured_v: f64, setpoint_v: f64) -> f64 {
    (measured_v - setpoint_v) * 1000.0
}

/// Counters for one run. Only `reset` brings them back down.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tally {
    pub failures: Vec<u64>,
    pub software_errors: u64,
    pub trigger_errors: u64,
    pub test_count: u64,
    pending: u32,
    latched: bool,
}

impl Tally {
    pub fn new(columns: usize) -> Self {
        Self {
            failures: vec![0; columns],
            ..Default::default()
        }
    }

    pub fn record_columns(&mut self, failed: &[bool]) {
        for (count, hit) in self.failures.iter_mut().zip(failed) {
            if *hit {
                *count += 1;
                self.pending += 1;
            }
        }
    }

    pub fn software_error(&mut self) {
        self.software_errors += 1;
        self.pending += 1;
    }

    pub fn trigger_error(&mut self) {
        self.trigger_errors += 1;
        self.pending += 1;
    }

    pub fn test_done(&mut self) {
        self.test_count += 1;
    }

    /// Closes the current display cycle; returns whether it failed.
    pub fn settle(&mut self) -> bool {
        let failed = self.pending > 0;
        self.latched |= failed;
        self.pending = 0;
        failed
    }

    /// Drops failures not yet settled into a display cycle.
    pub fn discard_pending(&mut self) {
        self.pending = 0;
    }

    pub fn latched(&self) -> bool {
        self.latched
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.failures.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_sequence_counts_and_flags() {
        let mut tally = Tally::new(1);
        let mut flags = Vec::new();
        let mut counts = Vec::new();
        for reading in [10.0, 26.0, -30.0] {
            tally.record_columns(&[outside_band(reading, 25.0)]);
            flags.push(tally.settle());
            counts.push(tally.failures[0]);
        }
        assert_eq!(counts, vec![0, 1, 2]);
        assert_eq!(flags, vec![false, true, true]);
        assert!(tally.latched());
    }

    #[test]
    fn band_edges_pass() {
        assert!(!outside_band(25.0, 25.0));
        assert!(!outside_band(-25.0, 25.0));
        assert!(outside_band(25.01, 25.0));
    }

    #[test]
    fn drift_and_loopback() {
        assert!(!drifted(26.9, 25.0, 2.0));
        assert!(drifted(22.5, 25.0, 2.0));
        assert!(loopback_mismatch(1, 0));
        assert!(!loopback_mismatch(0, 0));
        assert!(ao_error_mv(4.94, 5.0).abs() > 50.0);
        assert!(ao_error_mv(4.96, 5.0).abs() < 50.0);
    }

    #[test]
    fn software_errors_fail_cycle_and_latch() {
        let mut tally = Tally::new(2);
        assert!(!tally.settle());
        tally.software_error();
        assert!(tally.settle());
        assert!(!tally.settle());
        assert!(tally.latched());
    }

    #[test]
    fn discarded_failures_never_latch() {
        let mut tally = Tally::new(1);
        tally.software_error();
        tally.software_error();
        tally.discard_pending();
        assert!(!tally.settle());
        assert!(!tally.latched());
        assert_eq!(tally.software_errors, 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut tally = Tally::new(2);
        tally.record_columns(&[true, true]);
        tally.trigger_error();
        tally.test_done();
        tally.settle();
        tally.reset();
        assert_eq!(tally, Tally::new(2));
        assert!(!tally.latched());
    }
}
