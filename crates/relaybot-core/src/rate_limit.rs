use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use tokio::time::Instant;

use crate::domain::UserId;

/// Trailing window the per-user counter covers.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over the limit for the first time: message dropped, not counted.
    Warn,
    /// Over the limit again after a warning: caller blocks the user.
    Banned,
}

#[derive(Clone, Debug, Default)]
struct RateWindow {
    hits: VecDeque<Instant>,
    warned: bool,
}

/// Sliding-window counter with a warn-then-ban escalation.
///
/// Not internally synchronized; the pipeline keeps it behind one mutex.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    limit: usize,
    window: Duration,
    windows: HashMap<UserId, RateWindow>,
}

impl RateLimiter {
    pub fn new(enabled: bool, per_minute: u32) -> Self {
        Self {
            enabled,
            limit: per_minute.max(1) as usize,
            window: RATE_WINDOW,
            windows: HashMap::new(),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> RateDecision {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision::Allowed;
        }

        let window = self.window;
        let entry = self.windows.entry(user_id).or_default();
        while let Some(front) = entry.hits.front() {
            if now.saturating_duration_since(*front) >= window {
                entry.hits.pop_front();
            } else {
                break;
            }
        }

        if entry.hits.len() >= self.limit {
            if entry.warned {
                return RateDecision::Banned;
            }
            entry.warned = true;
            return RateDecision::Warn;
        }

        entry.hits.push_back(now);
        entry.warned = false;
        RateDecision::Allowed
    }

    /// Forget a user's window and warning.
    pub fn reset(&mut self, user_id: UserId) {
        self.windows.remove(&user_id);
    }

    #[cfg(test)]
    fn in_window(&self, user_id: UserId) -> usize {
        self.windows.get(&user_id).map(|w| w.hits.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const U: UserId = UserId(7);

    #[test]
    fn over_limit_warns_then_bans() {
        let mut rl = RateLimiter::new(true, 3);
        let t0 = Instant::now();

        for i in 0..3 {
            assert_eq!(
                rl.check_at(U, t0 + Duration::from_secs(i)),
                RateDecision::Allowed
            );
        }
        assert_eq!(rl.check_at(U, t0 + Duration::from_secs(4)), RateDecision::Warn);
        // The warned message is not counted.
        assert_eq!(rl.in_window(U), 3);
        assert_eq!(rl.check_at(U, t0 + Duration::from_secs(5)), RateDecision::Banned);
    }

    #[test]
    fn window_slides_and_clears_warning() {
        let mut rl = RateLimiter::new(true, 2);
        let t0 = Instant::now();

        assert_eq!(rl.check_at(U, t0), RateDecision::Allowed);
        assert_eq!(rl.check_at(U, t0 + Duration::from_secs(1)), RateDecision::Allowed);
        assert_eq!(rl.check_at(U, t0 + Duration::from_secs(2)), RateDecision::Warn);

        // First hit falls out of the window.
        assert_eq!(rl.check_at(U, t0 + Duration::from_secs(60)), RateDecision::Allowed);
        // Warning was cleared by the allowed message, so the next overflow warns again.
        assert_eq!(rl.check_at(U, t0 + Duration::from_secs(60)), RateDecision::Warn);
    }

    #[test]
    fn users_are_independent() {
        let mut rl = RateLimiter::new(true, 1);
        let t0 = Instant::now();
        assert_eq!(rl.check_at(UserId(1), t0), RateDecision::Allowed);
        assert_eq!(rl.check_at(UserId(2), t0), RateDecision::Allowed);
        assert_eq!(rl.check_at(UserId(1), t0), RateDecision::Warn);
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut rl = RateLimiter::new(false, 1);
        let t0 = Instant::now();
        for _ in 0..10 {
            assert_eq!(rl.check_at(U, t0), RateDecision::Allowed);
        }
    }

    #[test]
    fn reset_forgets_warning() {
        let mut rl = RateLimiter::new(true, 1);
        let t0 = Instant::now();
        rl.check_at(U, t0);
        assert_eq!(rl.check_at(U, t0), RateDecision::Warn);
        rl.reset(U);
        assert_eq!(rl.check_at(U, t0), RateDecision::Allowed);
    }
}
