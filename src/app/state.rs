//! Application state shared across routes

use std::sync::Arc;

use crate::bus::EventBus;
use crate::config::Config;
use crate::game::{CaptureService, CooldownTracker, GameLifecycle, GameOverLatch};
use crate::store::TileStore;
use crate::ws::{Hub, HubHandle, SessionContext};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TileStore>,
    pub bus: Arc<dyn EventBus>,
    pub hub: HubHandle,
    pub capture: Arc<CaptureService>,
    pub latch: Arc<GameOverLatch>,
}

impl AppState {
    /// Build the state plus the hub and lifecycle tasks the caller must spawn
    pub fn new(
        config: Config,
        store: Arc<dyn TileStore>,
        bus: Arc<dyn EventBus>,
    ) -> (Self, Hub, GameLifecycle) {
        let config = Arc::new(config);

        // Cooldowns are shared by the capture path and the reset
        let cooldowns = Arc::new(CooldownTracker::new(config.capture_cooldown));

        let (lifecycle, lifecycle_handle) = GameLifecycle::new(
            store.clone(),
            bus.clone(),
            cooldowns.clone(),
            config.reset_delay,
        );

        let capture = Arc::new(CaptureService::new(
            store.clone(),
            cooldowns,
            lifecycle_handle,
        ));

        let (hub, hub_handle) = Hub::new();

        let state = Self {
            config,
            store,
            bus,
            hub: hub_handle,
            capture,
            latch: lifecycle.latch(),
        };

        (state, hub, lifecycle)
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            hub: self.hub.clone(),
            capture: self.capture.clone(),
            bus: self.bus.clone(),
        }
    }
}
