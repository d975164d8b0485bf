use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use event_bus::{Bus, BusError, BusMessage, BusResult};
use futures_util::StreamExt;
use metrics::counter;
use redis::aio::{ConnectionManager, PubSub};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

/// The channel every gateway process publishes and subscribes on.
pub const EVENT_CHANNEL: &str = "chatty:events";

/// Redis-backed bus bridging all gateway processes.
///
/// Two distinct broker sessions with fixed roles: the publish link is an
/// auto-reconnecting `ConnectionManager`, the subscribe link is a dedicated
/// client driven by the reader task. The subscribe link spends its life
/// blocked receiving, so it can never double as the publish link, and the
/// roles are never swapped after construction.
pub struct RedisBus {
    publisher: ConnectionManager,
    incoming: broadcast::Sender<BusMessage>,
    reader: JoinHandle<()>,
}

impl RedisBus {
    /// Open both broker sessions. Returns only once both links are
    /// established; either failure is an error the composition root treats
    /// as fatal.
    pub async fn open(redis_url: &str, policy: RetryPolicy) -> Result<Arc<Self>> {
        let publish_client =
            redis::Client::open(redis_url).context("invalid redis url for publish link")?;
        let publisher = ConnectionManager::new(publish_client)
            .await
            .context("failed to establish redis publish link")?;

        let subscribe_client =
            redis::Client::open(redis_url).context("invalid redis url for subscribe link")?;
        let mut pubsub = subscribe_client
            .get_async_pubsub()
            .await
            .context("failed to establish redis subscribe link")?;
        pubsub
            .subscribe(EVENT_CHANNEL)
            .await
            .context("failed to subscribe to event channel")?;
        info!(channel = EVENT_CHANNEL, "redis bus links established");

        let (incoming, _) = broadcast::channel(1024);
        let reader = tokio::spawn(read_loop(
            subscribe_client,
            pubsub,
            incoming.clone(),
            policy,
        ));

        Ok(Arc::new(Self {
            publisher,
            incoming,
            reader,
        }))
    }
}

/// Drive the subscribe link. On link loss, reconnect and resubscribe forever
/// with backoff; events broadcast while the link is down are dropped, never
/// queued.
async fn read_loop(
    client: redis::Client,
    mut pubsub: PubSub,
    incoming: broadcast::Sender<BusMessage>,
    policy: RetryPolicy,
) {
    loop {
        {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let message = BusMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
                };
                // Zero receivers only means no gateway is attached yet.
                let _ = incoming.send(message);
            }
        }

        warn!("redis subscribe link lost; events will be dropped until it is restored");
        let mut attempt = 0u32;
        pubsub = loop {
            counter!("chatty_bus_reconnect_attempts_total", 1);
            tokio::time::sleep(policy.delay(attempt)).await;
            match client.get_async_pubsub().await {
                Ok(mut restored) => match restored.subscribe(EVENT_CHANNEL).await {
                    Ok(()) => {
                        info!(attempt, "redis subscribe link restored");
                        break restored;
                    }
                    Err(err) => warn!(attempt, error = %err, "resubscribe failed"),
                },
                Err(err) => warn!(attempt, error = %err, "redis subscribe reconnect failed"),
            }
            attempt = attempt.saturating_add(1);
        };
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()> {
        let mut conn = self.publisher.clone();
        let _: () = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload.as_ref())
            .query_async(&mut conn)
            .await
            .map_err(|err| BusError::Transport(err.to_string()))?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.incoming.subscribe()
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
