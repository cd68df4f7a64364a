use std::time::Duration;

use flume::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::config::{Backpressure, IntakeConfig};

/// Reason an item was not accepted by the intake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Rejection {
    /// The receiving component was stopped.
    Stopped,
    /// A bounded intake had no space.
    Full,
    /// The consuming side is gone.
    Disconnected,
    /// The release time of a delayed item is not representable.
    InvalidDelay,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Full => "full",
            Self::Disconnected => "disconnected",
            Self::InvalidDelay => "invalid_delay",
        }
    }
}

/// The producer side of an accumulator queue.
#[derive(Debug)]
pub(crate) struct Intake<T> {
    tx: Sender<T>,
    backpressure: Backpressure,
    block_timeout: Duration,
}

/// Creates the intake queue described by `config`.
pub(crate) fn channel<T>(config: &IntakeConfig) -> (Intake<T>, Receiver<T>) {
    let (tx, rx) = match config.capacity {
        Some(capacity) => flume::bounded(capacity),
        None => flume::unbounded(),
    };

    let intake = Intake {
        tx,
        backpressure: config.backpressure,
        block_timeout: config.block_timeout(),
    };

    (intake, rx)
}

impl<T> Intake<T> {
    /// Enqueues an item, blocking only on a full intake configured with [`Backpressure::Block`].
    pub fn push(&self, item: T) -> Result<(), Rejection> {
        match self.backpressure {
            Backpressure::Reject => self.tx.try_send(item).map_err(|error| match error {
                TrySendError::Full(_) => Rejection::Full,
                TrySendError::Disconnected(_) => Rejection::Disconnected,
            }),
            Backpressure::Block => self
                .tx
                .send_timeout(item, self.block_timeout)
                .map_err(|error| match error {
                    SendTimeoutError::Timeout(_) => Rejection::Full,
                    SendTimeoutError::Disconnected(_) => Rejection::Disconnected,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_unbounded_by_default() {
        let (intake, rx) = channel(&IntakeConfig::default());

        for i in 0..10_000 {
            intake.push(i).unwrap();
        }

        assert_eq!(rx.len(), 10_000);
        assert_eq!(rx.try_iter().take(3).collect::<Vec<_>>(), [0, 1, 2]);
    }

    #[test]
    fn test_bounded_reject() {
        let config = IntakeConfig {
            capacity: Some(2),
            ..Default::default()
        };
        let (intake, _rx) = channel(&config);

        intake.push(1).unwrap();
        intake.push(2).unwrap();
        assert_eq!(intake.push(3), Err(Rejection::Full));
    }

    #[test]
    fn test_bounded_block_times_out() {
        let config = IntakeConfig {
            capacity: Some(1),
            backpressure: Backpressure::Block,
            block_timeout_ms: 20,
        };
        let (intake, _rx) = channel(&config);

        intake.push(1).unwrap();
        let start = Instant::now();
        assert_eq!(intake.push(2), Err(Rejection::Full));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_bounded_block_waits_for_consumer() {
        let config = IntakeConfig {
            capacity: Some(1),
            backpressure: Backpressure::Block,
            block_timeout_ms: 5000,
        };
        let (intake, rx) = channel(&config);
        intake.push(1).unwrap();

        let consumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let first = rx.recv().unwrap();
            let second = rx.recv().unwrap();
            (first, second)
        });

        intake.push(2).unwrap();
        assert_eq!(consumer.join().unwrap(), (1, 2));
    }

    #[test]
    fn test_disconnected() {
        let (intake, rx) = channel(&IntakeConfig::default());
        drop(rx);
        assert_eq!(intake.push(1), Err(Rejection::Disconnected));
    }
}
