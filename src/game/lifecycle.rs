//! Game lifecycle controller
//!
//! Every successful capture sends a [`LifecycleEvent`] to the controller's
//! queue. The controller handles them one at a time: when the board has no
//! unclaimed tile left it takes the game-over latch, publishes the final
//! standings, and hands the board reset to a delayed job. The delay runs in
//! its own task and holds no lock, so captures and notifications keep
//! flowing while the reset is pending.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{self, EventBus};
use crate::store::TileStore;
use crate::ws::protocol::ServerMsg;

use super::cooldown::CooldownTracker;
use super::standings;

/// Wait before retrying a conclusion that failed on the store or the bus
const CONCLUDE_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Wait between attempts to clear the board
const RESET_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Input to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A capture committed
    TileCaptured { tile_id: i32 },
    /// Re-run an exhaustion check that failed part way
    RetryCheck,
}

/// Handle for reporting captures to the controller
#[derive(Clone)]
pub struct LifecycleHandle {
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl LifecycleHandle {
    /// Report a committed capture. Never blocks.
    pub fn notify_captured(&self, tile_id: i32) {
        if self
            .events
            .send(LifecycleEvent::TileCaptured { tile_id })
            .is_err()
        {
            warn!(tile_id, "Lifecycle controller stopped, capture not reported");
        }
    }
}

#[cfg(test)]
pub(crate) fn test_handle() -> (LifecycleHandle, mpsc::UnboundedReceiver<LifecycleEvent>) {
    let (events, rx) = mpsc::unbounded_channel();
    (LifecycleHandle { events }, rx)
}

/// Game phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Tiles are still up for grabs
    InProgress,
    /// Board exhausted, `game_over` not yet published
    Concluding,
    /// `game_over` published, waiting for the reset
    ResetPending,
}

/// Gate that lets `game_over` be published once per game.
///
/// The latch is set on leaving `InProgress` and cleared only by the reset.
pub struct GameOverLatch {
    phase: Mutex<GamePhase>,
}

impl GameOverLatch {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(GamePhase::InProgress),
        }
    }

    pub fn phase(&self) -> GamePhase {
        *self.phase.lock()
    }

    /// Take the latch. True means the caller must publish `game_over`:
    /// either the latch was free, or an earlier attempt stopped before
    /// publishing.
    fn try_conclude(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            GamePhase::InProgress => {
                *phase = GamePhase::Concluding;
                true
            }
            GamePhase::Concluding => true,
            GamePhase::ResetPending => false,
        }
    }

    fn mark_published(&self) {
        *self.phase.lock() = GamePhase::ResetPending;
    }

    fn rearm(&self) {
        *self.phase.lock() = GamePhase::InProgress;
    }
}

impl Default for GameOverLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// The controller task state
pub struct GameLifecycle {
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    /// Used to schedule retries without keeping the queue open
    retry: mpsc::WeakUnboundedSender<LifecycleEvent>,
    store: Arc<dyn TileStore>,
    bus: Arc<dyn EventBus>,
    cooldowns: Arc<CooldownTracker>,
    latch: Arc<GameOverLatch>,
    reset_delay: Duration,
}

impl GameLifecycle {
    pub fn new(
        store: Arc<dyn TileStore>,
        bus: Arc<dyn EventBus>,
        cooldowns: Arc<CooldownTracker>,
        reset_delay: Duration,
    ) -> (Self, LifecycleHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            events: rx,
            retry: tx.downgrade(),
            store,
            bus,
            cooldowns,
            latch: Arc::new(GameOverLatch::new()),
            reset_delay,
        };
        (controller, LifecycleHandle { events: tx })
    }

    pub fn latch(&self) -> Arc<GameOverLatch> {
        self.latch.clone()
    }

    /// Process events until every handle is dropped
    pub async fn run(mut self) {
        info!(reset_delay_secs = self.reset_delay.as_secs(), "Lifecycle controller started");

        while let Some(event) = self.events.recv().await {
            match event {
                LifecycleEvent::TileCaptured { tile_id } => {
                    debug!(tile_id, "Checking board exhaustion");
                    self.check_exhaustion().await;
                }
                LifecycleEvent::RetryCheck => {
                    if self.latch.phase() != GamePhase::ResetPending {
                        info!("Retrying exhaustion check");
                        self.check_exhaustion().await;
                    }
                }
            }
        }

        info!("Lifecycle controller stopped");
    }

    async fn check_exhaustion(&self) {
        let unclaimed = match self.store.count_unclaimed().await {
            Ok(n) => n,
            Err(e) => {
                // The capture that triggered this check may have been the last one
                warn!(error = %e, "Failed to count unclaimed tiles, will retry");
                self.schedule_retry();
                return;
            }
        };
        if unclaimed > 0 {
            return;
        }

        if !self.latch.try_conclude() {
            debug!("Game already concluded, waiting for reset");
            return;
        }

        if let Err(e) = self.conclude().await {
            // Latch stays in Concluding so the retry publishes exactly once
            error!(error = %e, "Failed to conclude game, will retry");
            self.schedule_retry();
            return;
        }

        self.latch.mark_published();

        let reset = ResetJob {
            store: self.store.clone(),
            bus: self.bus.clone(),
            cooldowns: self.cooldowns.clone(),
            latch: self.latch.clone(),
            delay: self.reset_delay,
        };
        tokio::spawn(reset.run());
    }

    /// Compute standings and publish `game_over`
    async fn conclude(&self) -> Result<(), ConcludeError> {
        let counts = self.store.aggregate_ownership().await?;
        let rankings = standings::rank(counts);
        let winner = rankings.first().cloned();

        info!(
            winner = winner.as_ref().map(|w| w.user_id.as_str()).unwrap_or("none"),
            players = rankings.len(),
            "Board exhausted, game over"
        );

        let msg = ServerMsg::GameOver {
            winner,
            rankings,
            reset_in: self.reset_delay.as_secs(),
        };
        bus::publish_msg(self.bus.as_ref(), &msg).await?;
        Ok(())
    }

    fn schedule_retry(&self) {
        if let Some(tx) = self.retry.upgrade() {
            tokio::spawn(async move {
                tokio::time::sleep(CONCLUDE_RETRY_DELAY).await;
                let _ = tx.send(LifecycleEvent::RetryCheck);
            });
        }
    }
}

/// Delayed board reset after `game_over`
struct ResetJob {
    store: Arc<dyn TileStore>,
    bus: Arc<dyn EventBus>,
    cooldowns: Arc<CooldownTracker>,
    latch: Arc<GameOverLatch>,
    delay: Duration,
}

impl ResetJob {
    async fn run(self) {
        tokio::time::sleep(self.delay).await;

        while let Err(e) = self.store.clear_all_owners().await {
            error!(error = %e, "Failed to clear board, retrying");
            tokio::time::sleep(RESET_RETRY_DELAY).await;
        }

        self.cooldowns.clear();
        self.latch.rearm();

        if let Err(e) = bus::publish_msg(self.bus.as_ref(), &ServerMsg::NewGame).await {
            error!(error = %e, "Failed to publish new game");
        }

        info!("Board reset, new game started");
    }
}

#[derive(Debug, thiserror::Error)]
enum ConcludeError {
    #[error("standings query failed: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("publish failed: {0}")]
    Bus(#[from] bus::BusError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use tokio_test::assert_ok;

    use crate::bus::{EnvelopeStream, LocalBus};
    use crate::game::capture::CaptureService;
    use crate::store::{
        ClaimOutcome, MemoryTileStore, OwnershipCount, Player, StoreError, Tile,
    };

    // Longer than the reset delay, so only the reset can clear it
    const COOLDOWN: Duration = Duration::from_secs(60);
    const RESET: Duration = Duration::from_secs(10);

    /// Memory store whose standings query can be made to fail
    struct FlakyStore {
        inner: MemoryTileStore,
        fail_standings: AtomicBool,
        fail_next_count: AtomicBool,
    }

    #[async_trait]
    impl TileStore for FlakyStore {
        async fn list_tiles(&self) -> Result<Vec<Tile>, StoreError> {
            self.inner.list_tiles().await
        }
        async fn claim_tile_exclusive(
            &self,
            tile_id: i32,
            player_id: &str,
        ) -> Result<ClaimOutcome, StoreError> {
            self.inner.claim_tile_exclusive(tile_id, player_id).await
        }
        async fn count_unclaimed(&self) -> Result<usize, StoreError> {
            if self.fail_next_count.swap(false, Ordering::SeqCst) {
                return Err(StoreError::TileNotFound(0));
            }
            self.inner.count_unclaimed().await
        }
        async fn aggregate_ownership(&self) -> Result<Vec<OwnershipCount>, StoreError> {
            if self.fail_standings.load(Ordering::SeqCst) {
                return Err(StoreError::TileNotFound(0));
            }
            self.inner.aggregate_ownership().await
        }
        async fn clear_all_owners(&self) -> Result<(), StoreError> {
            self.inner.clear_all_owners().await
        }
        async fn register_player(&self, player: Player) -> Result<(), StoreError> {
            self.inner.register_player(player).await
        }
    }

    struct Harness {
        store: Arc<FlakyStore>,
        cooldowns: Arc<CooldownTracker>,
        capture: Arc<CaptureService>,
        latch: Arc<GameOverLatch>,
        envelopes: EnvelopeStream,
    }

    async fn harness(tiles: i32, players: &[&str]) -> Harness {
        let store = Arc::new(FlakyStore {
            inner: MemoryTileStore::seeded(tiles),
            fail_standings: AtomicBool::new(false),
            fail_next_count: AtomicBool::new(false),
        });
        for id in players {
            assert_ok!(
                store
                    .register_player(Player {
                        id: id.to_string(),
                        name: id.to_uppercase(),
                        color: "#abcdef".to_string(),
                    })
                    .await
            );
        }

        let bus = Arc::new(LocalBus::new());
        let envelopes = assert_ok!(bus.subscribe().await);
        let cooldowns = Arc::new(CooldownTracker::new(COOLDOWN));
        let (lifecycle, handle) =
            GameLifecycle::new(store.clone(), bus, cooldowns.clone(), RESET);
        let latch = lifecycle.latch();
        tokio::spawn(lifecycle.run());

        let capture = Arc::new(CaptureService::new(store.clone(), cooldowns.clone(), handle));
        Harness {
            store,
            cooldowns,
            capture,
            latch,
            envelopes,
        }
    }

    async fn next_msg(envelopes: &mut EnvelopeStream) -> ServerMsg {
        let bytes: Bytes = envelopes.next().await.expect("bus closed");
        serde_json::from_slice(&bytes).expect("valid envelope")
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_the_board_publishes_game_over_then_resets() {
        let mut h = harness(2, &["a", "b"]).await;

        assert_ok!(h.capture.capture(1, "a").await);
        assert_ok!(h.capture.capture(2, "b").await);

        let rankings = match next_msg(&mut h.envelopes).await {
            ServerMsg::GameOver {
                winner,
                rankings,
                reset_in,
            } => {
                assert_eq!(reset_in, 10);
                assert_eq!(winner.as_ref(), rankings.first());
                rankings
            }
            other => panic!("expected game_over, got {other:?}"),
        };
        let summary: Vec<(&str, usize, u32)> = rankings
            .iter()
            .map(|e| (e.user_id.as_str(), e.count, e.rank))
            .collect();
        assert_eq!(summary, vec![("a", 1, 1), ("b", 1, 2)]);
        assert_eq!(h.latch.phase(), GamePhase::ResetPending);

        // Captures are not blocked while the reset is pending
        assert!(!matches!(
            h.capture.capture(1, "c").await,
            Err(crate::game::CaptureError::CooldownActive { .. })
        ));

        assert_eq!(next_msg(&mut h.envelopes).await, ServerMsg::NewGame);
        assert_eq!(h.latch.phase(), GamePhase::InProgress);

        let tiles = assert_ok!(h.store.list_tiles().await);
        assert!(tiles.iter().all(|t| t.owner_id.is_none()));
        assert_eq!(h.cooldowns.remaining("a"), Duration::ZERO);
        assert_ok!(h.capture.capture(1, "a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_finishers_publish_game_over_once() {
        let players: Vec<String> = (0..8).map(|n| format!("p{n}")).collect();
        let refs: Vec<&str> = players.iter().map(String::as_str).collect();
        let mut h = harness(8, &refs).await;

        let claims: Vec<_> = players
            .iter()
            .enumerate()
            .map(|(i, player)| {
                let capture = h.capture.clone();
                let player = player.clone();
                tokio::spawn(async move { capture.capture(i as i32 + 1, &player).await })
            })
            .collect();
        for claim in claims {
            assert_ok!(claim.await.unwrap());
        }

        let mut game_overs = 0;
        loop {
            match next_msg(&mut h.envelopes).await {
                ServerMsg::GameOver { rankings, .. } => {
                    assert_eq!(rankings.len(), 8);
                    game_overs += 1;
                }
                ServerMsg::NewGame => break,
                ServerMsg::TileUpdate { .. } => {}
            }
        }
        assert_eq!(game_overs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_standings_keep_the_latch_and_retry() {
        let mut h = harness(1, &["a"]).await;
        h.store.fail_standings.store(true, Ordering::SeqCst);

        assert_ok!(h.capture.capture(1, "a").await);

        // Let the controller run its first attempt
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.latch.phase(), GamePhase::Concluding);

        h.store.fail_standings.store(false, Ordering::SeqCst);
        match next_msg(&mut h.envelopes).await {
            ServerMsg::GameOver { winner, .. } => {
                assert_eq!(winner.map(|w| w.user_id), Some("a".to_string()));
            }
            other => panic!("expected game_over, got {other:?}"),
        }
        assert_eq!(next_msg(&mut h.envelopes).await, ServerMsg::NewGame);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_board_stays_in_progress() {
        let h = harness(3, &["a"]).await;
        assert_ok!(h.capture.capture(1, "a").await);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.latch.phase(), GamePhase::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_count_on_the_last_capture_is_retried() {
        let mut h = harness(1, &["a"]).await;
        h.store.fail_next_count.store(true, Ordering::SeqCst);

        assert_ok!(h.capture.capture(1, "a").await);

        match next_msg(&mut h.envelopes).await {
            ServerMsg::GameOver { winner, .. } => {
                assert_eq!(winner.map(|w| w.user_id), Some("a".to_string()));
            }
            other => panic!("expected game_over, got {other:?}"),
        }
        assert_eq!(next_msg(&mut h.envelopes).await, ServerMsg::NewGame);
    }
}
