//! Watchtower alert consumer.
//!
//! Reads alerts and detector error events from the alert stream and fans
//! them out to the configured sinks, firing a periodic timer so interval
//! based sinks can close their buckets even when the stream is quiet.
//!
//! # Architecture
//!
//! ```text
//! NATS (alerts) --> decode --> alert_sinks / error_sinks
//!        timer  ------------> timer_sinks
//! ```
//!
//! Startup failures (configuration, entity lookup, sink start, stream
//! connect) exit non-zero. Once running, only a stream failure or Ctrl-C
//! ends the process.

mod config;
mod dispatcher;
mod error;
mod stream;
mod timer;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watchtower_annotate::EntityLookup;
use watchtower_sinks::SinkSet;

use crate::config::{ConsumerConfig, LogFormat, config_path};
use crate::dispatcher::{Dispatcher, Routes};
use crate::error::ConsumerError;
use crate::stream::NatsSource;
use crate::timer::SystemClock;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if startup or the dispatch loop fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run().await?;
    Ok(())
}

async fn run() -> Result<(), ConsumerError> {
    let path = config_path(std::env::args().skip(1), |name| std::env::var(name).ok());
    let config = ConsumerConfig::load(&path)?;
    init_tracing(&config);

    info!(
        config = %path.display(),
        brokers = config.brokers,
        topic = config.topic,
        consumer_group = config.consumer_group,
        timer_interval = config.timer_interval,
        "watchtower-consumer starting"
    );

    let lookup = Arc::new(EntityLookup::from_config(&config.annotation)?);
    let mut sinks = SinkSet::build(config.enabled_sinks(), &config.sinks, &lookup)?;
    sinks.start_all().await?;
    info!(sinks = ?sinks.kinds(), "sinks started");

    let source = NatsSource::connect(&config.brokers, &config.topic, &config.consumer_group).await?;

    let mut dispatcher = Dispatcher::new(
        source,
        SystemClock,
        sinks,
        Routes::from_config(&config),
        config.timer_interval,
        config.poll_timeout(),
    );

    let outcome = tokio::select! {
        result = dispatcher.run() => result.map_err(ConsumerError::from),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
            Ok(())
        }
    };

    let stats = dispatcher.stats();
    info!(
        received = stats.received,
        alerts = stats.alerts,
        errors = stats.errors,
        dropped = stats.dropped,
        timers = stats.timers,
        sink_failures = stats.sink_failures,
        sinks = ?dispatcher.sinks().kinds(),
        "watchtower-consumer stopped"
    );
    outcome
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &ConsumerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.to_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
