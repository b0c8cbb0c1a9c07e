//! Single-slot one-shot timers.
//!
//! A [`Timer`] holds at most one pending deadline together with the action to
//! take when it passes. Arming a timer replaces whatever was pending, so there
//! is never more than one live deadline per slot. Timers do not run on their
//! own: the owner polls [`Timer::deadline`] to decide how long to sleep and
//! calls [`Timer::fire`] once it wakes up.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timer<T = ()> {
    slot: Option<(Instant, T)>,
}

impl<T> Default for Timer<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> Timer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to fire `after` from now, replacing any pending action.
    pub fn arm(&mut self, after: Duration, action: T) {
        self.slot = Some((Instant::now() + after, action));
    }

    /// Cancels the pending action, if any.
    pub fn cancel(&mut self) {
        self.slot = None;
    }

    /// Disarms the timer, returning the pending action regardless of its
    /// deadline.
    pub fn take(&mut self) -> Option<T> {
        self.slot.take().map(|(_, action)| action)
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.slot.as_ref().map(|(deadline, _)| *deadline)
    }

    /// Takes the pending action if its deadline has passed at `now`.
    ///
    /// The timer is disarmed when it fires.
    pub fn fire(&mut self, now: Instant) -> Option<T> {
        match self.slot {
            Some((deadline, _)) if deadline <= now => self.slot.take().map(|(_, action)| action),
            _ => None,
        }
    }
}

/// Returns the earliest of the given deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(5), "advance");

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(timer.fire(Instant::now()), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(timer.fire(Instant::now()), Some("advance"));
        assert_eq!(timer.fire(Instant::now()), None);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn arming_replaces_pending_action() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(1), 1);
        timer.arm(Duration::from_secs(3), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(timer.fire(Instant::now()), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(timer.fire(Instant::now()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let mut timer: Timer = Timer::new();
        timer.arm(Duration::from_millis(10), ());
        timer.cancel();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(timer.fire(Instant::now()), None);
        assert_eq!(timer.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn take_disarms_before_deadline() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(5), "skip");
        assert_eq!(timer.take(), Some("skip"));
        assert_eq!(timer.take(), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(timer.fire(Instant::now()), None);
    }

    #[test]
    fn earliest_skips_unarmed() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(earliest([None, Some(later), Some(now)]), Some(now));
        assert_eq!(earliest([None, None]), None);
    }
}
