//! Per-player capture cooldown

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::store::PlayerId;

/// Last successful gate pass per player.
///
/// Check and stamp happen under the map entry's lock, so two concurrent
/// requests from one player cannot both get through.
pub struct CooldownTracker {
    window: Duration,
    last_capture: DashMap<PlayerId, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_capture: DashMap::new(),
        }
    }

    /// Pass the gate and stamp `now`, or return the time left on the cooldown.
    /// A rejected attempt leaves the stamp as it was.
    pub fn try_stamp(&self, player_id: &str) -> Result<(), Duration> {
        let now = Instant::now();
        match self.last_capture.entry(player_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let elapsed = now.saturating_duration_since(*entry.get());
                if elapsed < self.window {
                    return Err(self.window - elapsed);
                }
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }
        Ok(())
    }

    /// Time until `player_id` may capture again (zero = ready)
    pub fn remaining(&self, player_id: &str) -> Duration {
        self.last_capture
            .get(player_id)
            .map(|last| self.window.saturating_sub(last.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Forget every player's cooldown
    pub fn clear(&self) {
        self.last_capture.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const WINDOW: Duration = Duration::from_secs(3);
    const EPSILON: Duration = Duration::from_millis(1);

    #[tokio::test(start_paused = true)]
    async fn second_stamp_inside_window_is_rejected() {
        let cooldowns = CooldownTracker::new(WINDOW);
        assert_ok!(cooldowns.try_stamp("a"));

        tokio::time::advance(WINDOW - EPSILON).await;
        let remaining = assert_err!(cooldowns.try_stamp("a"));
        assert_eq!(remaining, EPSILON);

        tokio::time::advance(EPSILON * 2).await;
        assert_ok!(cooldowns.try_stamp("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_attempt_does_not_extend_cooldown() {
        let cooldowns = CooldownTracker::new(WINDOW);
        assert_ok!(cooldowns.try_stamp("a"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_err!(cooldowns.try_stamp("a"));

        tokio::time::advance(Duration::from_secs(1) + EPSILON).await;
        assert_ok!(cooldowns.try_stamp("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn players_are_independent_and_clear_resets_all() {
        let cooldowns = CooldownTracker::new(WINDOW);
        assert_ok!(cooldowns.try_stamp("a"));
        assert_ok!(cooldowns.try_stamp("b"));
        assert_eq!(cooldowns.remaining("a"), WINDOW);
        assert_eq!(cooldowns.remaining("nobody"), Duration::ZERO);

        cooldowns.clear();
        assert_eq!(cooldowns.remaining("a"), Duration::ZERO);
        assert_ok!(cooldowns.try_stamp("a"));
    }
}
