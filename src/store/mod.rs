//! Tile and player storage
//!
//! The store is the single source of truth for tile ownership. Everything the
//! game needs from it goes through [`TileStore`], so the in-memory board used
//! for local runs and tests and the Supabase-backed board are interchangeable.

pub mod memory;
pub mod supabase;

pub use memory::MemoryTileStore;
pub use supabase::{SupabaseClient, SupabaseTileStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use self::supabase::SupabaseError;

/// Stable identifier of a registered player
pub type PlayerId = String;

/// One board tile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub id: i32,
    pub owner_id: Option<PlayerId>,
    pub updated_at: DateTime<Utc>,
}

impl Tile {
    pub fn unclaimed(id: i32) -> Self {
        Self {
            id,
            owner_id: None,
            updated_at: Utc::now(),
        }
    }
}

/// Registered player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
}

/// Number of tiles one registered player currently owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipCount {
    pub player: Player,
    pub count: usize,
}

/// Result of an exclusive claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The tile was unowned and now belongs to the claimant
    Claimed(Tile),
    /// Someone already owns the tile; nothing was written
    AlreadyClaimed,
}

/// Storage backend for the board and its players
#[async_trait]
pub trait TileStore: Send + Sync {
    /// All tiles ordered by id
    async fn list_tiles(&self) -> Result<Vec<Tile>, StoreError>;

    /// Read the tile under exclusive access, and set its owner only if it has none.
    /// No other claim on the same tile can interleave between the read and the write.
    async fn claim_tile_exclusive(
        &self,
        tile_id: i32,
        player_id: &str,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Number of tiles with no owner
    async fn count_unclaimed(&self) -> Result<usize, StoreError>;

    /// Owned-tile counts for every registered player (zero-owners included),
    /// in the store's scan order
    async fn aggregate_ownership(&self) -> Result<Vec<OwnershipCount>, StoreError>;

    /// Clear the owner of every tile
    async fn clear_all_owners(&self) -> Result<(), StoreError>;

    /// Register a player; an already-registered id is left untouched
    async fn register_player(&self, player: Player) -> Result<(), StoreError>;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Tile {0} does not exist")]
    TileNotFound(i32),

    #[error("Supabase error: {0}")]
    Supabase(#[from] SupabaseError),
}
