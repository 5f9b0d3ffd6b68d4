use std::time::Duration;

use tokio::sync::watch;

/// Outcome of checking or waiting on a [`ReadySignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Satisfied,
    TimedOut,
}

/// One-producer handshake flag between `options` and `start`.
///
/// `options` raises it; `start` waits for it with a bound and consumes it,
/// so a later reload waits for fresh options again.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub fn status(&self) -> Readiness {
        if *self.tx.borrow() {
            Readiness::Satisfied
        } else {
            Readiness::Pending
        }
    }

    /// Waits up to `timeout` for the signal. Returns `Satisfied` and re-arms
    /// the signal, or `TimedOut`.
    pub async fn wait(&self, timeout: Duration) -> Readiness {
        let mut rx = self.tx.subscribe();
        // the borrow guard must be released before re-arming
        let raised = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|seen| seen.is_ok())
            .unwrap_or(false);

        if raised {
            self.tx.send_replace(false);
            Readiness::Satisfied
        } else {
            Readiness::TimedOut
        }
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn already_satisfied_returns_immediately() {
        let signal = ReadySignal::new();
        signal.signal();
        assert_eq!(signal.status(), Readiness::Satisfied);

        let started = Instant::now();
        assert_eq!(signal.wait(Duration::from_secs(5)).await, Readiness::Satisfied);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(signal.status(), Readiness::Pending);
    }

    #[tokio::test]
    async fn times_out_when_never_signalled() {
        let signal = ReadySignal::new();
        assert_eq!(signal.wait(Duration::from_millis(50)).await, Readiness::TimedOut);
        assert_eq!(signal.status(), Readiness::Pending);
    }

    #[tokio::test]
    async fn wakes_a_pending_waiter() {
        let signal = Arc::new(ReadySignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.signal();
        assert_eq!(waiter.await.unwrap(), Readiness::Satisfied);
    }
}
