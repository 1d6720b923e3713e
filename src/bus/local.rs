//! In-process bus for single-instance deployments and tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::warn;

use super::{BusError, EnvelopeStream, EventBus};

/// Capacity of the broadcast channel. Subscribers that fall this far behind
/// skip envelopes.
const LOCAL_BUS_CAPACITY: usize = 1024;

/// Bus backed by a `tokio::sync::broadcast` channel.
///
/// Clones share the channel, so handing clones to two hubs behaves like two
/// processes subscribed to the same topic.
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Bytes>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOCAL_BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, envelope: Bytes) -> Result<(), BusError> {
        // Err only means nobody is subscribed yet
        let _ = self.sender.send(envelope);
        Ok(())
    }

    async fn subscribe(&self) -> Result<EnvelopeStream, BusError> {
        let rx = self.sender.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => return Some((envelope, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Local bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn every_subscriber_sees_publish_order() {
        let bus = LocalBus::new();
        let mut first = assert_ok!(bus.subscribe().await);
        let mut second = assert_ok!(bus.clone().subscribe().await);

        for n in 0..3u8 {
            assert_ok!(bus.publish(Bytes::from(vec![n])).await);
        }

        for stream in [&mut first, &mut second] {
            for n in 0..3u8 {
                assert_eq!(stream.next().await, Some(Bytes::from(vec![n])));
            }
        }
    }
}
