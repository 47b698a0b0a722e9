//! Command-line and environment configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tandem_checkpoint::CheckpointConfig;
use tandem_connectors::kafka::KafkaConfig;
use tandem_operators::JoinConfig;

use crate::pipeline::{
    Mode, PipelineConfig, SinkKind, DEFAULT_OUTPUT_TOPIC, DEFAULT_PROFILE_TOPIC, DEFAULT_RISK_TOPIC,
};

/// Joins STEDI risk scores with customer birth years.
#[derive(Debug, Parser)]
#[command(name = "stedi-risk", version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Kafka bootstrap servers.
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092", global = true)]
    pub brokers: String,

    /// Consumer group id.
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "stedi-risk", global = true)]
    pub group_id: String,

    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    #[arg(long, env = "KAFKA_SECURITY_PROTOCOL", global = true)]
    pub security_protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    #[arg(long, env = "KAFKA_SASL_MECHANISM", global = true)]
    pub sasl_mechanism: Option<String>,

    #[arg(long, env = "KAFKA_SASL_USERNAME", global = true)]
    pub sasl_username: Option<String>,

    #[arg(long, env = "KAFKA_SASL_PASSWORD", hide_env_values = true, global = true)]
    pub sasl_password: Option<String>,

    /// Timeout for broker metadata and produce acknowledgments.
    #[arg(long, env = "KAFKA_REQUEST_TIMEOUT_MS", default_value_t = 30_000, global = true)]
    pub request_timeout_ms: u64,

    /// Topic carrying profile-change records.
    #[arg(long, env = "PROFILE_TOPIC", default_value = DEFAULT_PROFILE_TOPIC, global = true)]
    pub profile_topic: String,

    /// Topic carrying risk-score events.
    #[arg(long, env = "RISK_TOPIC", default_value = DEFAULT_RISK_TOPIC, global = true)]
    pub risk_topic: String,

    /// Topic the joined records are written to.
    #[arg(long, env = "OUTPUT_TOPIC", default_value = DEFAULT_OUTPUT_TOPIC, global = true)]
    pub output_topic: String,

    /// Where progress markers and join snapshots are kept.
    #[arg(long, env = "CHECKPOINT_DIR", default_value = "/tmp/stedi-risk-checkpoint", global = true)]
    pub checkpoint_dir: PathBuf,

    /// Time between checkpoints.
    #[arg(long, env = "CHECKPOINT_INTERVAL_MS", default_value_t = 10_000, global = true)]
    pub checkpoint_interval_ms: u64,

    /// Number of join tasks.
    #[arg(long, env = "JOIN_PARALLELISM", default_value_t = 1, global = true)]
    pub join_parallelism: usize,

    /// Drop join entries this long behind the watermark. Unset keeps
    /// them forever.
    #[arg(long, env = "JOIN_RETENTION_SECS", global = true)]
    pub join_retention_secs: Option<u64>,

    /// How far the watermark trails the oldest partition's ingestion time.
    #[arg(long, env = "ALLOWED_LATENESS_MS", default_value_t = 0, global = true)]
    pub allowed_lateness_ms: u64,

    /// Advance a quiet source's watermark after this long without records;
    /// 0 disables.
    #[arg(long, env = "SOURCE_IDLE_TIMEOUT_MS", default_value_t = 60_000, global = true)]
    pub source_idle_timeout_ms: u64,

    /// Where joined records go; repeat for several.
    #[arg(long = "sink", value_enum, default_values_t = [SinkKind::Kafka], global = true)]
    pub sinks: Vec<SinkKind>,

    /// Log as JSON lines instead of text.
    #[arg(long, env = "LOG_JSON", global = true)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Join risk scores with birth years (default).
    Join,
    /// Print decoded risk scores.
    Events,
    /// Print projected customer birth years.
    Customers,
}

impl Args {
    pub fn mode(&self) -> Mode {
        match self.command.unwrap_or(Command::Join) {
            Command::Join => Mode::Join,
            Command::Events => Mode::Events,
            Command::Customers => Mode::Customers,
        }
    }

    pub fn into_pipeline_config(self) -> PipelineConfig {
        let mode = self.mode();
        let mut kafka = KafkaConfig::new(self.brokers)
            .with_group_id(format!("{}-{}", self.group_id, mode.as_str()))
            .with_client_id(format!("stedi-risk-{}", mode.as_str()))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms));
        if let Some(protocol) = self.security_protocol {
            kafka = kafka.with_security(protocol, self.sasl_mechanism, self.sasl_username, self.sasl_password);
        }

        PipelineConfig {
            mode,
            kafka,
            profile_topic: self.profile_topic,
            risk_topic: self.risk_topic,
            output_topic: self.output_topic,
            sinks: self.sinks,
            checkpoint: CheckpointConfig::new(self.checkpoint_dir)
                .with_interval(Duration::from_millis(self.checkpoint_interval_ms)),
            join: JoinConfig {
                parallelism: self.join_parallelism,
                retention: self.join_retention_secs.map(Duration::from_secs),
                ..Default::default()
            },
            allowed_lateness: Duration::from_millis(self.allowed_lateness_ms),
            source_idle_timeout: (self.source_idle_timeout_ms > 0)
                .then(|| Duration::from_millis(self.source_idle_timeout_ms)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_run_the_join_into_kafka() {
        let args = Args::try_parse_from(["stedi-risk"]).unwrap();
        assert_eq!(args.mode(), Mode::Join);

        let config = args.into_pipeline_config();
        assert_eq!(config.profile_topic, "redis-server");
        assert_eq!(config.risk_topic, "stedi-events");
        assert_eq!(config.output_topic, "stedi-risk");
        assert_eq!(config.sinks, vec![SinkKind::Kafka]);
        assert_eq!(config.join.retention, None);
        assert_eq!(config.kafka.group_id, "stedi-risk-join");
        assert_eq!(config.kafka.security_protocol, None);
        assert_eq!(config.allowed_lateness, Duration::ZERO);
        assert_eq!(config.source_idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_sasl_settings_reach_the_kafka_config() {
        let args = Args::try_parse_from([
            "stedi-risk",
            "--security-protocol",
            "SASL_SSL",
            "--sasl-mechanism",
            "PLAIN",
            "--sasl-username",
            "risk",
            "--sasl-password",
            "secret",
            "--request-timeout-ms",
            "5000",
        ])
        .unwrap();
        let kafka = args.into_pipeline_config().kafka;
        assert_eq!(kafka.security_protocol.as_deref(), Some("SASL_SSL"));
        assert_eq!(kafka.sasl_mechanism.as_deref(), Some("PLAIN"));
        assert_eq!(kafka.sasl_password.as_deref(), Some("secret"));
        assert_eq!(kafka.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_subcommand_and_flags() {
        let args = Args::try_parse_from([
            "stedi-risk",
            "customers",
            "--brokers",
            "kafka:29092",
            "--join-parallelism",
            "4",
            "--join-retention-secs",
            "3600",
            "--sink",
            "kafka",
            "--sink",
            "console",
            "--source-idle-timeout-ms",
            "0",
        ])
        .unwrap();
        assert_eq!(args.mode(), Mode::Customers);

        let config = args.into_pipeline_config();
        assert_eq!(config.kafka.bootstrap_servers, "kafka:29092");
        assert_eq!(config.join.parallelism, 4);
        assert_eq!(config.join.retention, Some(Duration::from_secs(3600)));
        assert_eq!(config.sinks, vec![SinkKind::Kafka, SinkKind::Console]);
        assert_eq!(config.source_idle_timeout, None);
    }

    #[test]
    fn test_unknown_sink_is_rejected() {
        assert!(Args::try_parse_from(["stedi-risk", "--sink", "redis"]).is_err());
    }
}
