//! Coalescing of bursty UI events
//!
//! A `Debounce` collapses a burst of signals into at most one leading and
//! one trailing firing. The caller owns the clock: it reports signals with
//! `signal(now)` and drives trailing firings with `poll(now)`, typically once
//! per rendered frame.

use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct Debounce {
    wait: Duration,
    leading: bool,
    last_signal: Option<Instant>,
    pending: bool,
}

impl Debounce {
    /// Fire on the trailing edge only
    pub fn trailing(wait: Duration) -> Self {
        Self {
            wait,
            leading: false,
            last_signal: None,
            pending: false,
        }
    }

    /// Fire immediately for the first signal of a burst, then once more on
    /// the trailing edge if further signals arrived.
    pub fn leading(wait: Duration) -> Self {
        Self {
            leading: true,
            ..Self::trailing(wait)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Record a signal. Returns true when the caller should act right away.
    pub fn signal(&mut self, now: Instant) -> bool {
        let quiet = match self.last_signal {
            Some(at) => now.saturating_duration_since(at) >= self.wait,
            None => true,
        };
        self.last_signal = Some(now);

        if self.leading && quiet && !self.pending {
            return true;
        }
        self.pending = true;
        false
    }

    /// Returns true once the burst has been quiet for `wait` and a firing is
    /// still owed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.pending = false;
                true
            }
            _ => false,
        }
    }

    /// When the pending trailing firing becomes due
    pub fn deadline(&self) -> Option<Instant> {
        if !self.pending {
            return None;
        }
        self.last_signal.map(|at| at + self.wait)
    }

    /// Settle any owed firing now. Returns true if one was owed.
    pub fn flush(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(16);

    #[test]
    fn test_trailing_fires_once_after_burst() {
        let start = Instant::now();
        let mut debounce = Debounce::trailing(WAIT);

        for i in 0..10 {
            assert!(!debounce.signal(start + Duration::from_millis(i)));
        }
        assert!(!debounce.poll(start + Duration::from_millis(12)));
        assert!(debounce.poll(start + Duration::from_millis(9) + WAIT));
        assert!(!debounce.poll(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_leading_fires_first_and_last() {
        let start = Instant::now();
        let mut debounce = Debounce::leading(WAIT);

        assert!(debounce.signal(start));
        assert!(!debounce.is_pending());

        assert!(!debounce.signal(start + Duration::from_millis(2)));
        assert!(!debounce.signal(start + Duration::from_millis(4)));
        assert!(debounce.is_pending());

        assert!(debounce.poll(start + Duration::from_millis(4) + WAIT));

        // a lone signal after a quiet period fires on the leading edge again
        assert!(debounce.signal(start + Duration::from_millis(200)));
    }

    #[test]
    fn test_deadline_and_flush() {
        let start = Instant::now();
        let mut debounce = Debounce::trailing(WAIT);
        assert_eq!(debounce.deadline(), None);

        debounce.signal(start);
        assert_eq!(debounce.deadline(), Some(start + WAIT));

        assert!(debounce.flush());
        assert!(!debounce.flush());
        assert_eq!(debounce.deadline(), None);
    }
}
