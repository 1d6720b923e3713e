//! Redis pub/sub bus shared by all server instances

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::info;

use super::{BusError, EnvelopeStream, EventBus, TOPIC};

/// Bus on a Redis channel. Redis delivers a channel's messages to each
/// subscriber in publish order, including back to the publishing instance.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Connect and verify the server is reachable
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url)?;
        let mut publisher = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut publisher)
            .await?;

        info!("Connected to Redis event bus");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, envelope: Bytes) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(TOPIC, envelope.as_ref()).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<EnvelopeStream, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(TOPIC).await?;

        let stream = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));
        Ok(stream.boxed())
    }
}
