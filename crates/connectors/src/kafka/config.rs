//! Kafka configuration types.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Connection settings shared by sources and sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,

    /// Consumer group id. Partitions are assigned explicitly, so the group
    /// only labels the client; offsets live in the progress marker.
    pub group_id: String,

    pub client_id: Option<String>,

    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,

    /// How long to wait for topic metadata and for produce acknowledgments.
    pub request_timeout: Duration,

    pub session_timeout_ms: Option<u64>,

    /// Additional librdkafka properties.
    pub properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "stedi-risk".to_string(),
            client_id: None,
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            request_timeout: Duration::from_secs(30),
            session_timeout_ms: Some(10000),
            properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_security(
        mut self,
        protocol: impl Into<String>,
        mechanism: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.security_protocol = Some(protocol.into());
        self.sasl_mechanism = mechanism;
        self.sasl_username = username;
        self.sasl_password = password;
        self
    }

    /// Client settings common to consumers and producers.
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &self.bootstrap_servers);

        if let Some(client_id) = &self.client_id {
            client_config.set("client.id", client_id);
        }
        if let Some(protocol) = &self.security_protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(mechanism) = &self.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = &self.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(password) = &self.sasl_password {
            client_config.set("sasl.password", password);
        }
        for (key, value) in &self.properties {
            client_config.set(key, value);
        }
        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_carries_overrides() {
        let config = KafkaConfig::new("broker:29092")
            .with_client_id("risk-1")
            .with_property("fetch.min.bytes", "1");
        let client = config.client_config();
        assert_eq!(client.get("bootstrap.servers"), Some("broker:29092"));
        assert_eq!(client.get("client.id"), Some("risk-1"));
        assert_eq!(client.get("fetch.min.bytes"), Some("1"));
        assert_eq!(client.get("security.protocol"), None);
    }
}
