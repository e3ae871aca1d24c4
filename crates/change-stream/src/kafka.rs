//! Kafka change stream.
//!
//! Subscribes to the connector's per-table topics with a consumer group and
//! commits offsets explicitly, one record at a time, after the record has
//! been handled.

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::{Result, StreamMessage, stream::ChangeStream};

/// Configuration for the Kafka connection.
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group ID.
    pub group_id: String,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Where a new consumer group starts reading (`earliest` or `latest`).
    pub auto_offset_reset: String,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl KafkaConfig {
    /// Creates a config for consuming `topics` as part of `group_id`.
    pub fn subscriber(
        bootstrap_servers: impl Into<String>,
        group_id: impl Into<String>,
        topics: Vec<String>,
    ) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
            topics,
            auto_offset_reset: "earliest".to_string(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    /// Set where a new consumer group starts reading.
    pub fn with_auto_offset_reset(mut self, reset: impl Into<String>) -> Self {
        self.auto_offset_reset = reset.into();
        self
    }

    /// Build a ClientConfig for the change consumer.
    pub fn build_consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", &self.group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", &self.auto_offset_reset);

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for producers (dead-letter publishing).
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");

        self.apply_security_config(&mut config);
        config
    }

    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

/// Change stream backed by a Kafka consumer group.
pub struct KafkaChangeStream {
    consumer: StreamConsumer,
}

impl KafkaChangeStream {
    /// Creates the consumer and subscribes to the configured topics.
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = config.build_consumer_config().create()?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics)?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group_id = %config.group_id,
            topics = ?config.topics,
            "Subscribed to Kafka topics"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl ChangeStream for KafkaChangeStream {
    async fn next_message(&mut self) -> Option<Result<StreamMessage>> {
        let result = self.consumer.recv().await.map(|message| StreamMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
        });

        if let Ok(ref message) = result {
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Received change record"
            );
        }

        Some(result.map_err(Into::into))
    }

    async fn commit(&mut self, message: &StreamMessage) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KafkaConfig {
        KafkaConfig::subscriber(
            "localhost:9092",
            "mongodb-sync-group",
            vec!["dbserver1.public.orders".to_string()],
        )
    }

    #[test]
    fn subscriber_defaults() {
        let config = config();
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.group_id, "mongodb-sync-group");
        assert_eq!(config.topics, vec!["dbserver1.public.orders".to_string()]);
        assert_eq!(config.auto_offset_reset, "earliest");
        assert!(config.security_protocol.is_none());
    }

    #[test]
    fn consumer_config_disables_auto_commit() {
        let client = config().with_auto_offset_reset("latest").build_consumer_config();
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("group.id"), Some("mongodb-sync-group"));
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
    }

    #[test]
    fn sasl_config_applies_to_both_clients() {
        let config = config().with_sasl("user", "pass", "SCRAM-SHA-256");
        assert_eq!(config.security_protocol, Some("SASL_SSL".to_string()));

        let consumer = config.build_consumer_config();
        assert_eq!(consumer.get("sasl.username"), Some("user"));
        assert_eq!(consumer.get("sasl.mechanism"), Some("SCRAM-SHA-256"));

        let producer = config.build_producer_config();
        assert_eq!(producer.get("sasl.password"), Some("pass"));
        assert_eq!(producer.get("security.protocol"), Some("SASL_SSL"));
    }

    #[tokio::test]
    async fn sasl_ssl_clients_can_be_created() {
        let config = config().with_sasl("user", "pass", "SCRAM-SHA-256");

        let consumer = config.build_consumer_config().create::<StreamConsumer>();
        assert!(consumer.is_ok(), "consumer rejected SASL_SSL: {:?}", consumer.err());

        let producer = config
            .build_producer_config()
            .create::<rdkafka::producer::FutureProducer>();
        assert!(producer.is_ok(), "producer rejected SASL_SSL: {:?}", producer.err());
    }

    #[test]
    fn ssl_config() {
        let config = config()
            .with_security_protocol("SSL")
            .with_ssl_ca("/path/to/ca.crt");
        let client = config.build_consumer_config();
        assert_eq!(client.get("security.protocol"), Some("SSL"));
        assert_eq!(client.get("ssl.ca.location"), Some("/path/to/ca.crt"));
    }
}
