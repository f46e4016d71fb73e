//! # Hand-off cell
//!
//! A [`Handoff`] holds exactly one value. Publishing replaces it, loading returns whichever value
//! was published most recently. Neither side ever blocks the other, which lets the control loop
//! exchange data with a peripheral's I/O thread without waiting on that thread's I/O.
//!
//! The cell is intended for one writer and one reader. Intermediate values the reader never sees
//! are simply dropped, it is not a queue.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use arc_swap::ArcSwap;
use std::{sync::Arc, time::{Duration, Instant}};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Single slot last-write-wins cell.
pub struct Handoff<T> {
    slot: ArcSwap<T>,
}

/// The pair of cells shared between the control thread and one peripheral thread.
///
/// The control thread publishes commands and loads statuses, the peripheral thread does the
/// opposite.
pub struct CommandChannel<C, S> {
    pub command: Handoff<C>,
    pub status: Handoff<Stamped<S>>,
}

/// A value along with the instant it was produced, `None` until something has been produced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stamped<T> {
    pub value: T,
    pub at: Option<Instant>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T> Handoff<T> {
    /// Create a new cell holding `initial`, which is what loads return until the first publish.
    pub fn new(initial: T) -> Self {
        Self {
            slot: ArcSwap::from_pointee(initial),
        }
    }

    /// Replace the held value. Never blocks.
    pub fn publish(&self, value: T) {
        self.slot.store(Arc::new(value));
    }

    /// Get the most recently published value. Never blocks and doesn't consume the value.
    pub fn load(&self) -> Arc<T> {
        self.slot.load_full()
    }
}

impl<T: Clone> Handoff<T> {
    /// Get a copy of the most recently published value.
    pub fn get(&self) -> T {
        T::clone(&self.slot.load())
    }
}

impl<T: Default> Default for Handoff<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<C: Default, S: Default> Default for CommandChannel<C, S> {
    fn default() -> Self {
        Self {
            command: Handoff::default(),
            status: Handoff::default(),
        }
    }
}

impl<C, S> CommandChannel<C, S> {
    /// Publish a status produced now.
    pub fn publish_status(&self, value: S) {
        self.status.publish(Stamped {
            value,
            at: Some(Instant::now())
        });
    }
}

impl<C, S: Clone> CommandChannel<C, S> {
    /// Latest status and how long ago it was produced.
    pub fn latest_status(&self) -> (S, Option<Duration>) {
        let stamped = self.status.load();
        (stamped.value.clone(), stamped.at.map(|a| a.elapsed()))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_default_before_publish() {
        let cell: Handoff<u32> = Handoff::default();
        assert_eq!(cell.get(), 0);

        let channel: CommandChannel<u8, u16> = CommandChannel::default();
        let (status, age) = channel.latest_status();
        assert_eq!(status, 0);
        assert!(age.is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cell = Handoff::new(String::from("initial"));
        cell.publish("cmd1".into());
        cell.publish("cmd2".into());

        // Loading any number of times has no effect on the held value
        assert_eq!(*cell.load(), "cmd2");
        assert_eq!(*cell.load(), "cmd2");
        assert_eq!(cell.get(), "cmd2");
    }

    #[test]
    fn test_reader_never_goes_backwards() {
        const N: u64 = 20_000;
        let cell = Arc::new(Handoff::new((0u64, 0u64)));

        let writer_cell = cell.clone();
        let writer = thread::spawn(move || {
            for i in 1..=N {
                // Both halves always match, a torn read would break that
                writer_cell.publish((i, i));
            }
        });

        let mut last = 0;
        loop {
            let (a, b) = *cell.load();
            assert_eq!(a, b);
            assert!(a >= last, "read {} after {}", a, last);
            last = a;
            if last == N {
                break
            }
        }

        writer.join().unwrap();
        assert_eq!(cell.get(), (N, N));
    }

    #[test]
    fn test_stamped_status() {
        let channel: CommandChannel<u8, u16> = CommandChannel::default();
        channel.publish_status(7);
        let (status, age) = channel.latest_status();
        assert_eq!(status, 7);
        assert!(age.unwrap() < Duration::from_secs(5));
    }
}
