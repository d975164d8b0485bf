use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// A single message observed on the bus link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Broadcast/subscribe surface shared by every gateway process.
///
/// `publish` is fire-and-forget: at-most-once, no retry, no acknowledgement.
/// A publish that fails at the transport layer reports the error to the
/// caller and the message is gone. `subscribe` yields every message the
/// process's bus link receives, in link receive order.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

/// In-memory loopback bus for tests and single-process deployments.
#[derive(Debug)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()> {
        // No subscribers is not a failure under at-most-once semantics.
        let _ = self.sender.send(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe();
        bus.publish("chatty:events", Bytes::from_static(b"ping"))
            .await
            .expect("publish ok");
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.channel, "chatty:events");
        assert_eq!(msg.payload, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = LocalBus::new();
        bus.publish("chatty:events", Bytes::from_static(b"dropped"))
            .await
            .expect("at-most-once publish never fails on zero receivers");
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_message() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish("chatty:events", Bytes::from_static(b"hi"))
            .await
            .expect("publish ok");
        assert_eq!(first.recv().await.unwrap().payload, Bytes::from_static(b"hi"));
        assert_eq!(second.recv().await.unwrap().payload, Bytes::from_static(b"hi"));
    }
}
