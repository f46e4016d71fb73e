//! Primitive round trip time tracking

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

use comms_if::status::RoundTripTime;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of status periods worth of primitive sets that are retained.
pub const RTT_CAPACITY_FACTOR: usize = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A primitive set waiting to be echoed in a status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttRecord {
    pub sequence_number: u64,

    /// Epoch time the AI sent the set
    pub ai_sent_time_seconds: f64,

    /// Epoch time the robot received the set
    pub robot_received_time_seconds: f64,
}

/// Bounded, oldest first, buffer of [`RttRecord`]s.
#[derive(Debug)]
pub struct RttTracker {
    records: VecDeque<RttRecord>,
    capacity: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RttTracker {
    /// Size the buffer to cover `ceil(primitive_rate_hz / status_rate_hz)` sets per status,
    /// times [`RTT_CAPACITY_FACTOR`].
    pub fn new(primitive_rate_hz: f64, status_rate_hz: f64) -> Self {
        let per_status = match status_rate_hz > 0.0 && primitive_rate_hz > 0.0 {
            true => (primitive_rate_hz / status_rate_hz).ceil() as usize,
            false => 1,
        };

        Self::with_capacity(per_status.max(1) * RTT_CAPACITY_FACTOR)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retain a newly accepted primitive set, evicting the oldest record if full.
    pub fn record(&mut self, record: RttRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Match a status echoing `sequence_number` that is being sent at `status_sent_time_seconds`.
    ///
    /// On a match the record, and every record older than it, is evicted. Older sets were
    /// superseded before being echoed so they will never match.
    pub fn resolve(
        &mut self,
        sequence_number: u64,
        status_sent_time_seconds: f64
    ) -> Option<RoundTripTime> {
        let index = self.records.iter().position(|r| r.sequence_number == sequence_number)?;

        let record = self.records.drain(..=index).last()?;

        Some(RoundTripTime {
            primitive_sequence_num: record.sequence_number,
            ai_sent_time_seconds: record.ai_sent_time_seconds,
            robot_received_time_seconds: record.robot_received_time_seconds,
            status_sent_time_seconds,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn rec(seq: u64, t: f64) -> RttRecord {
        RttRecord {
            sequence_number: seq,
            ai_sent_time_seconds: t,
            robot_received_time_seconds: t + 0.001,
        }
    }

    #[test]
    fn test_capacity() {
        // 60 Hz primitives, 30 Hz statuses, 2 sets per status
        assert_eq!(RttTracker::new(60.0, 30.0).capacity(), 2 * RTT_CAPACITY_FACTOR);
        assert_eq!(RttTracker::new(100.0, 30.0).capacity(), 4 * RTT_CAPACITY_FACTOR);
        assert_eq!(RttTracker::new(0.0, 30.0).capacity(), RTT_CAPACITY_FACTOR);
    }

    #[test]
    fn test_round_trip_of_echoed_sequence() {
        let mut tracker = RttTracker::with_capacity(8);
        let t = 1_700_000_000.5;
        let delta = 0.0125;

        tracker.record(rec(41, t - 0.02));
        tracker.record(rec(42, t));
        tracker.record(rec(43, t + 0.02));

        let rtt = tracker.resolve(42, t + delta).unwrap();
        assert_eq!(rtt.primitive_sequence_num, 42);
        assert!((rtt.round_trip_seconds() - delta).abs() < 1e-6);

        // 42 and everything before it are gone, 43 remains
        assert!(tracker.resolve(42, t + 1.0).is_none());
        assert!(tracker.resolve(41, t + 1.0).is_none());
        assert_eq!(tracker.len(), 1);
        assert!(tracker.resolve(43, t + 1.0).is_some());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut tracker = RttTracker::with_capacity(3);
        for seq in 0..5 {
            tracker.record(rec(seq, seq as f64));
        }

        assert_eq!(tracker.len(), 3);
        assert!(tracker.resolve(0, 10.0).is_none());
        assert!(tracker.resolve(1, 10.0).is_none());
        assert_eq!(tracker.resolve(2, 10.0).unwrap().ai_sent_time_seconds, 2.0);
    }
}
