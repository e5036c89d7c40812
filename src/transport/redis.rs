/// Redis pub/sub transport
///
/// Enables horizontal scaling by exchanging cluster envelopes over Redis:
/// - messages for every server: `{prefix}#{nsp}#`
/// - responses for one server: `{prefix}-response#{nsp}#{uid}#`
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use ::redis::aio::{ConnectionManager, PubSub};
use ::redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::{Inbound, Transport};
use crate::config::RedisConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::message::{ClusterMessage, ClusterResponse, Offset, ServerId};

pub fn message_channel(prefix: &str, nsp: &str) -> String {
    format!("{}#{}#", prefix, nsp)
}

pub fn response_channel(prefix: &str, nsp: &str, uid: &ServerId) -> String {
    format!("{}-response#{}#{}#", prefix, nsp, uid)
}

/// Decode a pub/sub payload according to the channel it arrived on
pub fn decode_inbound(channel: &str, response_channel: &str, payload: &str) -> AdapterResult<Inbound> {
    if channel == response_channel {
        let response: ClusterResponse = serde_json::from_str(payload)?;
        Ok(Inbound::Response(response))
    } else {
        let message: ClusterMessage = serde_json::from_str(payload)?;
        Ok(Inbound::Message {
            message,
            offset: None,
        })
    }
}

pub struct RedisTransport {
    client: ::redis::Client,
    connection: ConnectionManager,
    config: RedisConfig,
    nsp: String,
}

impl RedisTransport {
    pub async fn connect(config: &RedisConfig, nsp: &str) -> AdapterResult<Self> {
        let client = ::redis::Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client.clone()).await?;

        tracing::info!("Redis transport connected for namespace {}", nsp);

        Ok(Self {
            client,
            connection,
            config: config.clone(),
            nsp: nsp.to_string(),
        })
    }

    pub fn message_channel(&self) -> String {
        message_channel(&self.config.channel_prefix, &self.nsp)
    }

    pub fn response_channel(&self, uid: &ServerId) -> String {
        response_channel(&self.config.channel_prefix, &self.nsp, uid)
    }

    /// Publish with automatic retry on failure
    async fn publish(&self, channel: &str, payload: String) -> AdapterResult<()> {
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let mut conn = self.connection.clone();
            match conn.publish::<_, _, ()>(channel, &payload).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "Failed to publish to Redis (attempt {}/{}): {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);

                    if attempt < attempts - 1 {
                        sleep(self.config.reconnect_delay * (attempt as u32 + 1)).await;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => AdapterError::Redis(e),
            None => AdapterError::Transport("Failed to publish to Redis".to_string()),
        })
    }

    /// Subscribe to the namespace channels of server `uid`.
    ///
    /// Returns once both channels are subscribed, so replies to anything
    /// published afterwards are received. The subscription then reconnects
    /// until the returned receiver is dropped.
    pub async fn subscribe(&self, uid: &ServerId) -> AdapterResult<mpsc::UnboundedReceiver<Inbound>> {
        start_subscription(
            self.client.clone(),
            self.message_channel(),
            self.response_channel(uid),
            self.config.reconnect_delay,
        )
        .await
    }
}

async fn start_subscription(
    client: ::redis::Client,
    message_channel: String,
    response_channel: String,
    reconnect_delay: Duration,
) -> AdapterResult<mpsc::UnboundedReceiver<Inbound>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let first = open_pubsub(&client, &message_channel, &response_channel).await?;

    tokio::spawn(async move {
        let mut subscribed = Some(first);
        loop {
            let result = match subscribed.take() {
                Some(pubsub) => forward(pubsub, &response_channel, &tx).await,
                None => match open_pubsub(&client, &message_channel, &response_channel).await {
                    Ok(pubsub) => forward(pubsub, &response_channel, &tx).await,
                    Err(e) => Err(e),
                },
            };

            match result {
                Ok(_) if tx.is_closed() => {
                    tracing::info!("Redis subscription ended normally");
                    break;
                }
                Ok(_) => {
                    tracing::warn!("Redis subscription stream closed, reconnecting...");
                }
                Err(e) => {
                    tracing::error!("Redis subscription error: {}, reconnecting...", e);
                }
            }
            sleep(reconnect_delay).await;
        }
    });

    Ok(rx)
}

async fn open_pubsub(
    client: &::redis::Client,
    message_channel: &str,
    response_channel: &str,
) -> AdapterResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(message_channel).await?;
    pubsub.subscribe(response_channel).await?;

    tracing::info!(
        "Subscribed to Redis channels: {}, {}",
        message_channel,
        response_channel
    );

    Ok(pubsub)
}

async fn forward(
    mut pubsub: PubSub,
    response_channel: &str,
    tx: &mpsc::UnboundedSender<Inbound>,
) -> AdapterResult<()> {
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let payload: String = msg.get_payload()?;

        match decode_inbound(msg.get_channel_name(), response_channel, &payload) {
            Ok(inbound) => {
                if tx.send(inbound).is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::error!("Failed to parse cluster envelope: {}", e);
            }
        }
    }

    Ok(())
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish_message(&self, message: &ClusterMessage) -> AdapterResult<Option<Offset>> {
        let payload = serde_json::to_string(message)?;
        self.publish(&self.message_channel(), payload).await?;
        tracing::debug!("Published {:?} to Redis", message.message_type);
        Ok(None)
    }

    async fn publish_response(&self, target: &ServerId, response: &ClusterResponse) -> AdapterResult<()> {
        let payload = serde_json::to_string(response)?;
        self.publish(&self.response_channel(target), payload).await
    }
}
