//! Cooperative cancellation shared by long-running device jobs.

use tokio::sync::watch;

/// Read side of a cancellation flag.
///
/// Jobs poll [`CancelSignal::is_cancelled`] at safe points (between batches,
/// queries and steps); nothing is interrupted mid-command.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A sender/signal pair. Send `true` to cancel.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that is never raised.
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_signal_is_seen_by_clones() {
        let (tx, signal) = CancelSignal::channel();
        let clone = signal.clone();
        assert!(!clone.is_cancelled());
        tx.send(true).unwrap();
        assert!(signal.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn never_stays_clear() {
        assert!(!CancelSignal::never().is_cancelled());
    }
}
