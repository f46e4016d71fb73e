//! Absolute deadline pacing
//!
//! The loop sleeps until an absolute deadline on the monotonic clock which advances by exactly
//! one interval every cycle. Time spent executing a cycle therefore doesn't push later cycles
//! back. A cycle that overruns its deadline is followed by an immediate wake, and if the loop has
//! fallen more than one interval behind the deadline is moved up to now so lag never compounds.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use util::time::NANOS_PER_SECOND;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A point on the monotonic clock. `nsec` is always within `0..NANOS_PER_SECOND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    pub sec: i64,
    pub nsec: i64,
}

/// Where the next wake is and whether the cycle that just finished overran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub next: Deadline,
    pub overrun: bool,
    pub resynced: bool,
}

/// Sleeps the calling thread to a fixed frequency.
pub struct Pacer {
    interval_ns: i64,
    deadline: Deadline,
    num_overruns: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Deadline {
    pub fn from_nanos(nanos: i64) -> Self {
        let ns_per_s = NANOS_PER_SECOND;
        Self {
            sec: nanos.div_euclid(ns_per_s),
            nsec: nanos.rem_euclid(ns_per_s),
        }
    }

    pub fn as_nanos(&self) -> i128 {
        self.sec as i128 * NANOS_PER_SECOND as i128 + self.nsec as i128
    }

    /// Current monotonic time.
    pub fn now() -> Self {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // Safety: ts is a valid timespec for the duration of the call
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        Self::from_timespec(&ts)
    }

    /// Move the deadline on by `interval_ns`, carrying whole seconds out of `nsec`.
    pub fn advance(&mut self, interval_ns: i64) {
        let ns_per_s = NANOS_PER_SECOND;
        self.nsec += interval_ns;
        self.sec += self.nsec.div_euclid(ns_per_s);
        self.nsec = self.nsec.rem_euclid(ns_per_s);
    }

    fn from_timespec(ts: &libc::timespec) -> Self {
        Self {
            sec: ts.tv_sec as i64,
            nsec: ts.tv_nsec as i64,
        }
    }

    fn to_timespec(&self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.sec as libc::time_t,
            tv_nsec: self.nsec as libc::c_long,
        }
    }
}

impl Pacer {
    /// Create a pacer for `frequency_hz`, with the first deadline one interval from now.
    pub fn new(frequency_hz: f64) -> Self {
        Self::starting_at(frequency_hz, Deadline::now())
    }

    pub fn starting_at(frequency_hz: f64, start: Deadline) -> Self {
        Self {
            interval_ns: interval_ns(frequency_hz),
            deadline: start,
            num_overruns: 0,
        }
    }

    pub fn interval_ns(&self) -> i64 {
        self.interval_ns
    }

    pub fn num_overruns(&self) -> u64 {
        self.num_overruns
    }

    /// Sleep until the next deadline. Returns true if the previous cycle overran.
    pub fn wait(&mut self) -> bool {
        let s = schedule(self.deadline, self.interval_ns, Deadline::now());
        self.deadline = s.next;

        if s.overrun {
            self.num_overruns += 1;
            if s.resynced {
                warn!(
                    "Cycle overran by more than one period ({} overruns so far), resyncing",
                    self.num_overruns
                );
            }
        }

        sleep_until(&self.deadline);

        s.overrun
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Period of `frequency_hz` in nanoseconds.
pub fn interval_ns(frequency_hz: f64) -> i64 {
    ((NANOS_PER_SECOND as f64 / frequency_hz).round() as i64).max(1)
}

/// Compute the deadline following `previous` given the current time.
pub fn schedule(previous: Deadline, interval_ns: i64, now: Deadline) -> Schedule {
    let mut next = previous;
    next.advance(interval_ns);

    let lag = now.as_nanos() - next.as_nanos();
    let overrun = lag > 0;
    let resynced = lag > interval_ns as i128;

    if resynced {
        next = now;
    }

    Schedule { next, overrun, resynced }
}

/// Sleep until `deadline` on the monotonic clock, returning immediately if it has passed.
fn sleep_until(deadline: &Deadline) {
    let ts = deadline.to_timespec();
    loop {
        // Safety: ts is valid for the call, remaining time isn't used with TIMER_ABSTIME
        let ret = unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &ts,
                std::ptr::null_mut()
            )
        };

        // Interrupted sleeps restart towards the same absolute deadline
        if ret != libc::EINTR {
            break
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const MS: i64 = 1_000_000;

    #[test]
    fn test_advance_normalises() {
        let mut d = Deadline { sec: 10, nsec: 999_000_000 };
        d.advance(5 * MS);
        assert_eq!(d, Deadline { sec: 11, nsec: 4_000_000 });

        d.advance(2_500 * MS);
        assert_eq!(d, Deadline { sec: 13, nsec: 504_000_000 });

        assert_eq!(Deadline::from_nanos(1_500 * MS), Deadline { sec: 1, nsec: 500_000_000 });
    }

    #[test]
    fn test_steady_state_is_exact() {
        let interval = interval_ns(200.0);
        assert_eq!(interval, 5 * MS);

        let mut deadline = Deadline::from_nanos(0);
        for i in 1..1000 {
            // Each cycle finishes well before its deadline
            let now = Deadline::from_nanos(deadline.as_nanos() as i64 + MS);
            let s = schedule(deadline, interval, now);
            assert!(!s.overrun);
            assert_eq!(s.next.as_nanos() - deadline.as_nanos(), interval as i128);
            assert_eq!(s.next.as_nanos(), i as i128 * interval as i128);
            deadline = s.next;
        }
    }

    #[test]
    fn test_small_overrun_keeps_phase() {
        let interval = 5 * MS;
        let start = Deadline::from_nanos(0);

        // Cycle ran until 7 ms, next deadline at 5 ms is already past so the wake is immediate
        let s = schedule(start, interval, Deadline::from_nanos(7 * MS));
        assert!(s.overrun);
        assert!(!s.resynced);
        assert_eq!(s.next, Deadline::from_nanos(5 * MS));

        // The one after is back on the original grid
        let s = schedule(s.next, interval, Deadline::from_nanos(8 * MS));
        assert!(!s.overrun);
        assert_eq!(s.next, Deadline::from_nanos(10 * MS));
    }

    #[test]
    fn test_large_overrun_resyncs() {
        let interval = 5 * MS;
        let s = schedule(Deadline::from_nanos(0), interval, Deadline::from_nanos(30 * MS));
        assert!(s.overrun);
        assert!(s.resynced);
        assert_eq!(s.next, Deadline::from_nanos(30 * MS));

        let s = schedule(s.next, interval, Deadline::from_nanos(31 * MS));
        assert!(!s.overrun);
        assert_eq!(s.next, Deadline::from_nanos(35 * MS));
    }

    #[test]
    fn test_pacer_sleeps() {
        let mut pacer = Pacer::new(1000.0);
        let start = Deadline::now();
        for _ in 0..10 {
            pacer.wait();
        }
        let elapsed = Deadline::now().as_nanos() - start.as_nanos();
        assert!(elapsed >= 9 * MS as i128, "only {} ns elapsed", elapsed);
    }
}
