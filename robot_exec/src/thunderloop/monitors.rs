//! Timers tracked across cycles

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use comms_if::eqpt::power::PowerControl;
use util::time::duration_to_ms;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Tracks how long it has been since a newer primitive set was accepted.
#[derive(Debug)]
pub struct StalenessMonitor {
    timeout: Duration,
    last_accepted: Instant,
    ever_accepted: bool,
}

/// Tracks when the kicker and chipper were last commanded.
#[derive(Debug, Default)]
pub struct ChickerTimers {
    kicker: Option<Instant>,
    chipper: Option<Instant>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StalenessMonitor {
    /// Create a monitor whose age is counted from `start` until the first set is accepted.
    pub fn new(timeout: Duration, start: Instant) -> Self {
        Self {
            timeout,
            last_accepted: start,
            ever_accepted: false,
        }
    }

    /// A set with a newer send time than any before it was received at `received_at`.
    pub fn accept(&mut self, received_at: Instant) {
        self.last_accepted = received_at;
        self.ever_accepted = true;
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accepted)
    }

    /// True if no set has been accepted yet or the last one is older than the timeout.
    pub fn is_stale(&self, now: Instant) -> bool {
        !self.ever_accepted || self.age(now) > self.timeout
    }

    pub fn ms_since_last_accepted(&self, now: Instant) -> f64 {
        duration_to_ms(self.age(now))
    }
}

impl ChickerTimers {
    /// Note the power control sent this cycle.
    pub fn update(&mut self, control: &PowerControl, now: Instant) {
        if control.chicker.is_kick() {
            self.kicker = Some(now);
        }
        if control.chicker.is_chip() {
            self.chipper = Some(now);
        }
    }

    /// Milliseconds since the kicker was commanded, 0 if it never has been.
    pub fn ms_since_kicker_fired(&self, now: Instant) -> f64 {
        ms_since(self.kicker, now)
    }

    /// Milliseconds since the chipper was commanded, 0 if it never has been.
    pub fn ms_since_chipper_fired(&self, now: Instant) -> f64 {
        ms_since(self.chipper, now)
    }
}

fn ms_since(at: Option<Instant>, now: Instant) -> f64 {
    at.map(|t| duration_to_ms(now.saturating_duration_since(t))).unwrap_or(0.0)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::power::ChickerCommand;

    #[test]
    fn test_staleness() {
        let t0 = Instant::now();
        let timeout = Duration::from_millis(500);
        let mut monitor = StalenessMonitor::new(timeout, t0);

        // Nothing accepted yet
        assert!(monitor.is_stale(t0));

        monitor.accept(t0);
        assert!(!monitor.is_stale(t0 + Duration::from_millis(500)));
        assert!(monitor.is_stale(t0 + Duration::from_millis(501)));
        assert!((monitor.ms_since_last_accepted(t0 + Duration::from_millis(250)) - 250.0).abs() < 1e-9);

        monitor.accept(t0 + Duration::from_millis(600));
        assert!(!monitor.is_stale(t0 + Duration::from_millis(700)));
    }

    #[test]
    fn test_chicker_timers() {
        let t0 = Instant::now();
        let mut timers = ChickerTimers::default();
        assert_eq!(timers.ms_since_kicker_fired(t0), 0.0);

        timers.update(
            &PowerControl { chicker: ChickerCommand::AutoKick { speed_m_per_s: 3.0 } },
            t0
        );
        timers.update(&PowerControl::default(), t0 + Duration::from_millis(10));

        assert!((timers.ms_since_kicker_fired(t0 + Duration::from_millis(40)) - 40.0).abs() < 1e-9);
        assert_eq!(timers.ms_since_chipper_fired(t0 + Duration::from_millis(40)), 0.0);
    }
}
