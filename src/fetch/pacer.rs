// src/fetch/pacer.rs
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::MAX_WAIT;
use crate::supervisor::sleep_until_or_cancelled;

/// Minimum spacing between consecutive calls to one upstream, plus the
/// cooldown applied after a rate-limit signal.
///
/// The wait is paid by the loop before its next call, not inside a fetch.
#[derive(Debug, Clone)]
pub struct Pacer {
    min_spacing: Duration,
    cooldown: Duration,
    next_allowed: Option<Instant>,
}

impl Pacer {
    pub fn new(min_spacing: Duration, cooldown: Duration) -> Self {
        Self {
            min_spacing,
            cooldown,
            next_allowed: None,
        }
    }

    pub fn next_allowed(&self) -> Option<Instant> {
        self.next_allowed
    }

    /// Wait until a call is allowed. Returns `false` if cancelled first.
    pub async fn ready(&self, cancel: &CancellationToken) -> bool {
        match self.next_allowed {
            Some(at) if at > Instant::now() => sleep_until_or_cancelled(at, cancel).await,
            _ => !cancel.is_cancelled(),
        }
    }

    /// Record that a call just finished.
    pub fn record_call(&mut self) {
        self.push_back(self.min_spacing.min(MAX_WAIT));
    }

    /// Suspend calls for the cooldown window, stretched to `hint` if longer.
    /// The window never exceeds [`MAX_WAIT`]. Returns the applied window.
    pub fn cool_down(&mut self, hint: Option<Duration>) -> Duration {
        let window = hint
            .map_or(self.cooldown, |h| h.max(self.cooldown))
            .min(MAX_WAIT);
        self.push_back(window);
        window
    }

    fn push_back(&mut self, wait: Duration) {
        let now = Instant::now();
        let at = now
            .checked_add(wait)
            .or_else(|| now.checked_add(MAX_WAIT))
            .unwrap_or(now);
        self.next_allowed = Some(self.next_allowed.map_or(at, |cur| cur.max(at)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spacing_is_enforced_between_calls() {
        let token = CancellationToken::new();
        let mut p = Pacer::new(Duration::from_secs(13), Duration::from_secs(65));

        let t0 = Instant::now();
        assert!(p.ready(&token).await);
        assert_eq!(t0.elapsed(), Duration::ZERO);
        p.record_call();

        assert!(p.ready(&token).await);
        assert!(t0.elapsed() >= Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_uses_longer_hint() {
        let mut p = Pacer::new(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(p.cool_down(None), Duration::from_secs(60));
        assert_eq!(p.cool_down(Some(Duration::from_secs(5))), Duration::from_secs(60));
        assert_eq!(p.cool_down(Some(Duration::from_secs(120))), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn record_call_never_shortens_a_cooldown() {
        let mut p = Pacer::new(Duration::from_secs(13), Duration::from_secs(65));
        p.cool_down(None);
        let cooled = p.next_allowed().unwrap();
        p.record_call();
        assert_eq!(p.next_allowed().unwrap(), cooled);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_hint_is_capped() {
        let mut p = Pacer::new(Duration::from_secs(u64::MAX), Duration::from_secs(60));
        let t0 = Instant::now();
        assert_eq!(p.cool_down(Some(Duration::from_secs(u64::MAX))), MAX_WAIT);
        p.record_call();
        assert_eq!(p.next_allowed().unwrap(), t0 + MAX_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_returns_false() {
        let token = CancellationToken::new();
        let mut p = Pacer::new(Duration::from_secs(600), Duration::from_secs(60));
        p.record_call();
        token.cancel();
        assert!(!p.ready(&token).await);
    }
}
