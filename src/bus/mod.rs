//! Cross-process event distribution
//!
//! Every state change is published to one topic, and every process (the
//! publisher included) feeds what it receives on that topic into its local
//! hub. Local clients are never written to directly, so all processes see
//! events in bus order through a single code path.

pub mod local;
pub mod redis;

pub use self::local::LocalBus;
pub use self::redis::RedisBus;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::ws::hub::HubHandle;
use crate::ws::protocol::ServerMsg;

/// The one channel all envelopes travel on
pub const TOPIC: &str = "tile_updates";

/// First wait before resubscribing after a subscription ends
const RESUBSCRIBE_BACKOFF_MIN: Duration = Duration::from_millis(500);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Stream of raw envelopes delivered by a subscription
pub type EnvelopeStream = BoxStream<'static, Bytes>;

/// Publish/subscribe channel shared by every server process
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one serialized envelope on [`TOPIC`]
    async fn publish(&self, envelope: Bytes) -> Result<(), BusError>;

    /// Open a standing subscription to [`TOPIC`]
    async fn subscribe(&self) -> Result<EnvelopeStream, BusError>;
}

/// Serialize `msg` and publish it
pub async fn publish_msg(bus: &dyn EventBus, msg: &ServerMsg) -> Result<(), BusError> {
    let envelope = msg.encode()?;
    bus.publish(envelope).await
}

/// Forward every envelope from the subscription into the local hub.
///
/// When the subscription ends (a dropped Redis connection, for one) a new one
/// is opened with exponential backoff. Envelopes published during the gap are
/// not replayed.
pub async fn forward_to_hub(bus: Arc<dyn EventBus>, mut envelopes: EnvelopeStream, hub: HubHandle) {
    info!(topic = TOPIC, "Bus subscription started");

    loop {
        while let Some(envelope) = envelopes.next().await {
            hub.broadcast(envelope);
        }

        warn!(topic = TOPIC, "Bus subscription ended, resubscribing");
        envelopes = resubscribe(bus.as_ref()).await;
        info!(topic = TOPIC, "Bus subscription restored");
    }
}

async fn resubscribe(bus: &dyn EventBus) -> EnvelopeStream {
    let mut backoff = RESUBSCRIBE_BACKOFF_MIN;
    loop {
        tokio::time::sleep(backoff).await;
        match bus.subscribe().await {
            Ok(envelopes) => return envelopes,
            Err(e) => {
                error!(topic = TOPIC, error = %e, "Resubscribe failed");
                backoff = (backoff * 2).min(RESUBSCRIBE_BACKOFF_MAX);
            }
        }
    }
}

/// Event bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}
