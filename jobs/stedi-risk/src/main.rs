//! STEDI risk enrichment job.
//!
//! ```bash
//! # Joined output to Kafka
//! stedi-risk --brokers localhost:9092
//!
//! # Joined output to Kafka and the terminal
//! stedi-risk --sink kafka --sink console
//!
//! # Diagnostic views of one input each
//! stedi-risk events
//! stedi-risk customers
//! ```
//!
//! Stop with Ctrl-C: the pipeline drains through a final checkpoint and the
//! next run resumes after it.

use anyhow::Result;
use clap::Parser;
use stedi_risk::{Args, PipelineContext};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = args.into_pipeline_config();
    info!(
        mode = config.mode.as_str(),
        brokers = %config.kafka.bootstrap_servers,
        checkpoint_dir = %config.checkpoint.dir.display(),
        "Starting stedi-risk"
    );

    let ctx = PipelineContext::new(config).await?;
    let handles = ctx.spawn()?;

    let cancel = ctx.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, draining"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, draining"),
        }
        cancel.cancel();
    });

    let result = ctx.run(handles).await;
    ctx.metrics().log("shutdown");
    let stats = ctx.coordinator().stats();
    info!(
        total = stats.total_checkpoints,
        completed = stats.completed_checkpoints,
        failed = stats.failed_checkpoints,
        "Checkpoint summary"
    );
    match result? {
        Some(marker) => info!(checkpoint_id = marker.checkpoint_id, "Stopped after checkpoint"),
        None => warn!("Stopped without completing a checkpoint"),
    }
    Ok(())
}
