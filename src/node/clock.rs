//! Lamport logical clock implementation.
//!
//! Producers, the aggregation node, and readers each own an independent
//! instance; every request and reply on the wire carries the sender's current
//! timestamp, giving the system a total causal order without synchronized
//! wall clocks.

use crate::utils::WeathersetError;

/// Lamport logical clock: a monotonically non-decreasing counter.
///
/// The struct itself is not synchronized; the aggregation node wraps its
/// instance in a `tokio::sync::Mutex` so that every sync-then-respond step
/// executes as one critical section across all connections.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct LamportClock {
    /// Current timestamp value.
    timestamp: i64,
}

impl LamportClock {
    /// Creates a new clock starting at zero.
    pub fn new() -> Self {
        LamportClock { timestamp: 0 }
    }

    /// Advances the clock by one step. Returns the new timestamp.
    pub fn increment(&mut self) -> i64 {
        self.timestamp += 1;
        self.timestamp
    }

    /// Merges a timestamp received from a remote component: the clock becomes
    /// `max(own, received) + 1`. Rejects negative received values, leaving
    /// the clock unchanged.
    pub fn sync(&mut self, received: i64) -> Result<i64, WeathersetError> {
        if received < 0 {
            return Err(WeathersetError::msg(format!(
                "received timestamp {} is negative",
                received
            )));
        }

        self.timestamp = self.timestamp.max(received) + 1;
        Ok(self.timestamp)
    }

    /// Read-only snapshot of the current timestamp.
    pub fn current(&self) -> i64 {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_from_zero() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.current(), 0);
        for expect in 1..=5 {
            assert_eq!(clock.increment(), expect);
        }
        assert_eq!(clock.current(), 5);
    }

    #[test]
    fn sync_takes_max_plus_one() -> Result<(), WeathersetError> {
        let mut clock = LamportClock::new();
        assert_eq!(clock.sync(7)?, 8);
        // own value now larger than received
        assert_eq!(clock.sync(3)?, 9);
        assert_eq!(clock.sync(9)?, 10);
        Ok(())
    }

    #[test]
    fn sync_rejects_negative() {
        let mut clock = LamportClock::new();
        clock.increment();
        assert!(clock.sync(-1).is_err());
        // failed sync leaves the timestamp unchanged
        assert_eq!(clock.current(), 1);
    }
}
