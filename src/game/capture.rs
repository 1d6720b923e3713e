//! Tile capture protocol

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::store::{ClaimOutcome, StoreError, Tile, TileStore};

use super::cooldown::CooldownTracker;
use super::lifecycle::LifecycleHandle;

/// Validates and applies single tile claims
pub struct CaptureService {
    store: Arc<dyn TileStore>,
    cooldowns: Arc<CooldownTracker>,
    lifecycle: LifecycleHandle,
}

impl CaptureService {
    pub fn new(
        store: Arc<dyn TileStore>,
        cooldowns: Arc<CooldownTracker>,
        lifecycle: LifecycleHandle,
    ) -> Self {
        Self {
            store,
            cooldowns,
            lifecycle,
        }
    }

    /// Claim `tile_id` for `player_id`.
    ///
    /// The cooldown stamp is taken before the store is touched and is kept
    /// even if the claim then fails. A successful claim is reported to the
    /// lifecycle controller without waiting on it.
    pub async fn capture(&self, tile_id: i32, player_id: &str) -> Result<Tile, CaptureError> {
        self.cooldowns
            .try_stamp(player_id)
            .map_err(|remaining| CaptureError::CooldownActive { remaining })?;

        match self.store.claim_tile_exclusive(tile_id, player_id).await? {
            ClaimOutcome::Claimed(tile) => {
                debug!(tile_id, user_id = %player_id, "Tile captured");
                self.lifecycle.notify_captured(tile.id);
                Ok(tile)
            }
            ClaimOutcome::AlreadyClaimed => Err(CaptureError::AlreadyClaimed { tile_id }),
        }
    }

    /// Time until `player_id` may capture again
    pub fn remaining_cooldown(&self, player_id: &str) -> Duration {
        self.cooldowns.remaining(player_id)
    }
}

/// Reasons a capture is refused
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture cooldown active, {}ms remaining", remaining.as_millis())]
    CooldownActive { remaining: Duration },

    #[error("Tile {tile_id} is already claimed")]
    AlreadyClaimed { tile_id: i32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
