//! Board rules: capture protocol, cooldowns, standings and the game lifecycle

pub mod capture;
pub mod cooldown;
pub mod lifecycle;
pub mod standings;

pub use capture::{CaptureError, CaptureService};
pub use cooldown::CooldownTracker;
pub use lifecycle::{GameLifecycle, GameOverLatch, GamePhase, LifecycleHandle};
