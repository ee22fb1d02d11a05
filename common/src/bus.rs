// Message Bus Adapter
// Typed publish/subscribe keyed by message type over a byte-level transport
// trait. Two bindings: an in-process bus for tests and single-process runs,
// and a Kafka binding for multi-process deployments.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BusError;

/// The closed set of bus channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ObservationDelta,
    KnowledgeBaseDelta,
    DecisionDelta,
    ActionExecuted,
    BlobGossip,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::ObservationDelta,
        Channel::KnowledgeBaseDelta,
        Channel::DecisionDelta,
        Channel::ActionExecuted,
        Channel::BlobGossip,
    ];

    pub fn as_topic(&self) -> &'static str {
        match self {
            Channel::ObservationDelta => "observation-delta",
            Channel::KnowledgeBaseDelta => "knowledge-base-delta",
            Channel::DecisionDelta => "decision-delta",
            Channel::ActionExecuted => "action-executed",
            Channel::BlobGossip => "blob-gossip",
        }
    }

    /// Fails fast on out-of-set names.
    pub fn from_topic(topic: &str) -> Result<Self, BusError> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_topic() == topic)
            .ok_or_else(|| BusError::UnknownChannel(topic.to_string()))
    }
}

/// Binds a message type to its channel. Implemented exactly for the closed
/// message set in [`crate::messages`].
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    const CHANNEL: Channel;
}

/// Byte-level transport. Typed emit/subscribe layer on top via
/// [`emit`] and [`crate::io::StreamInput`].
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn emit_raw(&self, channel: Channel, payload: Vec<u8>) -> Result<(), BusError>;

    /// New subscription on `channel`; every message emitted after this call
    /// is delivered, in emit order, until the receiver is dropped.
    fn subscribe_raw(&self, channel: Channel) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, BusError>;
}

/// Typed emit.
pub async fn emit<M: BusMessage>(bus: &dyn MessageBus, message: &M) -> Result<(), BusError> {
    let payload = serde_json::to_vec(message).map_err(BusError::Encode)?;
    bus.emit_raw(M::CHANNEL, payload).await
}

/// In-process bus: per-channel subscriber lists over unbounded queues.
#[derive(Default)]
pub struct InProcessBus {
    subscribers: DashMap<Channel, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn emit_raw(&self, channel: Channel, payload: Vec<u8>) -> Result<(), BusError> {
        if let Some(mut subscribers) = self.subscribers.get_mut(&channel) {
            // Dropped receivers fall out of the list on the next emit.
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe_raw(&self, channel: Channel) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(channel).or_default().push(tx);
        Ok(rx)
    }
}

/// Kafka binding configuration.
#[derive(Debug, Clone)]
pub struct KafkaBusConfig {
    pub brokers: String,
    /// Prefix for per-subscription consumer group ids; each subscription
    /// gets a fresh group so every subscriber sees every message.
    pub group_prefix: String,
}

impl Default for KafkaBusConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_prefix: "agent-runtime".to_string(),
        }
    }
}

impl KafkaBusConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            brokers: std::env::var("KAFKA_BROKERS").unwrap_or(defaults.brokers),
            group_prefix: std::env::var("KAFKA_GROUP_PREFIX").unwrap_or(defaults.group_prefix),
        }
    }
}

/// Kafka-backed bus, one topic per channel.
pub struct KafkaBus {
    producer: FutureProducer,
    config: KafkaBusConfig,
}

impl KafkaBus {
    pub fn connect(config: KafkaBusConfig) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BusError::Transport(e.to_string()))?;

        Ok(Self { producer, config })
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn emit_raw(&self, channel: Channel, payload: Vec<u8>) -> Result<(), BusError> {
        self.producer
            .send(
                FutureRecord::<(), Vec<u8>>::to(channel.as_topic()).payload(&payload),
                Timeout::After(Duration::from_secs(5)),
            )
            .await
            .map_err(|(e, _)| BusError::Transport(e.to_string()))?;
        Ok(())
    }

    fn subscribe_raw(&self, channel: Channel) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, BusError> {
        let group_id = format!("{}-{}", self.config.group_prefix, Uuid::new_v4());
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &group_id)
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| BusError::Transport(e.to_string()))?;

        consumer
            .subscribe(&[channel.as_topic()])
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let Some(payload) = message.payload() else {
                            continue;
                        };
                        if tx.send(payload.to_vec()).is_err() {
                            debug!(topic = channel.as_topic(), "subscriber dropped; ending consumer");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(topic = channel.as_topic(), error = %e, "kafka receive failed");
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::KnowledgeBaseDelta;
    use crate::codec;

    #[test]
    fn test_topic_names_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_topic(channel.as_topic()).unwrap(), channel);
        }
    }

    #[test]
    fn test_unknown_topic_fails_fast() {
        let err = Channel::from_topic("portfolio-update").unwrap_err();
        assert!(matches!(err, BusError::UnknownChannel(_)));
    }

    #[tokio::test]
    async fn test_in_process_fan_out() {
        let bus = InProcessBus::new();
        let mut first = bus.subscribe_raw(Channel::KnowledgeBaseDelta).unwrap();
        let mut second = bus.subscribe_raw(Channel::KnowledgeBaseDelta).unwrap();

        let delta = KnowledgeBaseDelta {
            identity: codec::content_id(&"id").unwrap(),
            head: codec::content_id(&"head").unwrap(),
        };
        emit(&bus, &delta).await.unwrap();

        for rx in [&mut first, &mut second] {
            let payload = rx.recv().await.unwrap();
            let received: KnowledgeBaseDelta = serde_json::from_slice(&payload).unwrap();
            assert_eq!(received, delta);
        }
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = InProcessBus::new();
        let mut decisions = bus.subscribe_raw(Channel::DecisionDelta).unwrap();

        let delta = KnowledgeBaseDelta {
            identity: codec::content_id(&"id").unwrap(),
            head: codec::content_id(&"head").unwrap(),
        };
        emit(&bus, &delta).await.unwrap();

        assert!(decisions.try_recv().is_err());
    }
}
