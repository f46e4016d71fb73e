//! Primitive packet loss tracking

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of sequence numbers the loss percentage is computed over.
pub const LOSS_WINDOW: usize = 100;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Estimates packet loss from the sequence numbers of the most recently received primitive sets.
#[derive(Debug)]
pub struct PrimitiveTracker {
    window: VecDeque<u64>,
    capacity: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PrimitiveTracker {
    fn default() -> Self {
        Self::new(LOSS_WINDOW)
    }
}

impl PrimitiveTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a received sequence number.
    ///
    /// Duplicates are ignored. A number far behind the window means the sender restarted, in
    /// which case the window starts over.
    pub fn record(&mut self, sequence_number: u64) {
        if self.window.contains(&sequence_number) {
            return
        }

        if let Some(max) = self.window.iter().max() {
            if sequence_number.saturating_add(self.capacity as u64) < *max {
                self.window.clear();
            }
        }

        self.window.push_back(sequence_number);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    /// Percentage of sequence numbers missing from the span the window covers.
    pub fn loss_percentage(&self) -> f64 {
        let (min, max) = match (self.window.iter().min(), self.window.iter().max()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => return 0.0,
        };

        let expected = (max - min + 1) as f64;
        let received = self.window.len() as f64;

        ((1.0 - received / expected) * 100.0).max(0.0).min(100.0)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
