//! In-memory board, used when no Supabase project is configured and in tests

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{ClaimOutcome, OwnershipCount, Player, StoreError, Tile, TileStore};

#[derive(Default)]
struct Board {
    tiles: BTreeMap<i32, Tile>,
    /// Registration order is the scan order for standings
    players: Vec<Player>,
}

/// Board held in process memory behind a single lock.
///
/// Holding the lock across read-check-write gives the same guarantee a row
/// lock gives the SQL store: concurrent claims on one tile serialize.
pub struct MemoryTileStore {
    board: Mutex<Board>,
}

impl MemoryTileStore {
    /// Create a board with tiles `1..=size`, all unowned
    pub fn seeded(size: i32) -> Self {
        let tiles = (1..=size).map(|id| (id, Tile::unclaimed(id))).collect();
        Self {
            board: Mutex::new(Board {
                tiles,
                players: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl TileStore for MemoryTileStore {
    async fn list_tiles(&self) -> Result<Vec<Tile>, StoreError> {
        Ok(self.board.lock().tiles.values().cloned().collect())
    }

    async fn claim_tile_exclusive(
        &self,
        tile_id: i32,
        player_id: &str,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut board = self.board.lock();
        let tile = board
            .tiles
            .get_mut(&tile_id)
            .ok_or(StoreError::TileNotFound(tile_id))?;

        if tile.owner_id.is_some() {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        tile.owner_id = Some(player_id.to_string());
        tile.updated_at = Utc::now();
        Ok(ClaimOutcome::Claimed(tile.clone()))
    }

    async fn count_unclaimed(&self) -> Result<usize, StoreError> {
        Ok(self
            .board
            .lock()
            .tiles
            .values()
            .filter(|t| t.owner_id.is_none())
            .count())
    }

    async fn aggregate_ownership(&self) -> Result<Vec<OwnershipCount>, StoreError> {
        let board = self.board.lock();

        let mut owned: HashMap<&str, usize> = HashMap::new();
        for owner in board.tiles.values().filter_map(|t| t.owner_id.as_deref()) {
            *owned.entry(owner).or_default() += 1;
        }

        Ok(board
            .players
            .iter()
            .map(|p| OwnershipCount {
                player: p.clone(),
                count: owned.get(p.id.as_str()).copied().unwrap_or(0),
            })
            .collect())
    }

    async fn clear_all_owners(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut board = self.board.lock();
        for tile in board.tiles.values_mut() {
            tile.owner_id = None;
            tile.updated_at = now;
        }
        Ok(())
    }

    async fn register_player(&self, player: Player) -> Result<(), StoreError> {
        let mut board = self.board.lock();
        if !board.players.iter().any(|p| p.id == player.id) {
            board.players.push(player);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn player(id: &str) -> Player {
        Player {
            id: id.to_string(),
            name: format!("name-{id}"),
            color: "#ff0000".to_string(),
        }
    }

    #[tokio::test]
    async fn second_claim_on_a_tile_is_rejected() {
        let store = MemoryTileStore::seeded(3);

        let first = assert_ok!(store.claim_tile_exclusive(2, "a").await);
        match first {
            ClaimOutcome::Claimed(tile) => assert_eq!(tile.owner_id.as_deref(), Some("a")),
            other => panic!("expected claim, got {other:?}"),
        }

        let second = assert_ok!(store.claim_tile_exclusive(2, "b").await);
        assert_eq!(second, ClaimOutcome::AlreadyClaimed);
        assert_eq!(assert_ok!(store.count_unclaimed().await), 2);
    }

    #[tokio::test]
    async fn unknown_tile_is_an_error() {
        let store = MemoryTileStore::seeded(1);
        let err = assert_err!(store.claim_tile_exclusive(7, "a").await);
        assert!(matches!(err, StoreError::TileNotFound(7)));
    }

    #[tokio::test]
    async fn aggregate_includes_zero_owners_in_registration_order() {
        let store = MemoryTileStore::seeded(4);
        assert_ok!(store.register_player(player("a")).await);
        assert_ok!(store.register_player(player("b")).await);
        assert_ok!(store.register_player(player("a")).await);

        assert_ok!(store.claim_tile_exclusive(1, "b").await);
        assert_ok!(store.claim_tile_exclusive(2, "b").await);
        // Owned by someone who never registered; not part of standings
        assert_ok!(store.claim_tile_exclusive(3, "ghost").await);

        let counts = assert_ok!(store.aggregate_ownership().await);
        let summary: Vec<(&str, usize)> = counts
            .iter()
            .map(|c| (c.player.id.as_str(), c.count))
            .collect();
        assert_eq!(summary, vec![("a", 0), ("b", 2)]);
    }

    #[tokio::test]
    async fn clear_all_owners_frees_every_tile() {
        let store = MemoryTileStore::seeded(2);
        assert_ok!(store.claim_tile_exclusive(1, "a").await);
        assert_ok!(store.claim_tile_exclusive(2, "b").await);

        assert_ok!(store.clear_all_owners().await);

        let tiles = assert_ok!(store.list_tiles().await);
        assert_eq!(tiles.len(), 2);
        assert!(tiles.iter().all(|t| t.owner_id.is_none()));
    }
}
