//! The sink enum and the set of enabled sinks.
//!
//! Uses enum dispatch instead of trait objects because async methods are
//! not dyn-compatible. The variant set is closed and known at compile
//! time; configuration selects among it by [`SinkKind`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;
use watchtower_annotate::EntityLookup;
use watchtower_types::{Alert, ErrorEvent};

use crate::config::{SinkKind, SinksConfig};
use crate::database::DatabaseSink;
use crate::error::SinkError;
use crate::log::LogSink;
use crate::slack::SlackSink;
use crate::timeseries::TimeseriesSink;

/// A sink that receives alerts, error events and timer ticks.
#[derive(Debug)]
pub enum Sink {
    /// Structured log lines.
    Log(LogSink),
    /// `PostgreSQL` rows.
    Database(DatabaseSink),
    /// Slack messages.
    Slack(SlackSink),
    /// Level and delta metrics.
    Timeseries(TimeseriesSink),
}

impl Sink {
    /// Build the sink of the given kind from its configuration block.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Config`] if a required block is missing, or the
    /// sink's own construction error.
    pub fn build(
        kind: SinkKind,
        config: &SinksConfig,
        lookup: &Arc<EntityLookup>,
    ) -> Result<Self, SinkError> {
        let missing = || SinkError::Config(format!("sinks.{kind} is missing"));
        Ok(match kind {
            SinkKind::Log => Self::Log(LogSink::new()),
            SinkKind::Database => Self::Database(DatabaseSink::new(
                config.database.clone().ok_or_else(missing)?,
                Arc::clone(lookup),
            )),
            SinkKind::Slack => Self::Slack(SlackSink::new(
                config.slack.clone().ok_or_else(missing)?,
                Arc::clone(lookup),
            )?),
            SinkKind::Timeseries => Self::Timeseries(TimeseriesSink::new(
                config.timeseries.clone(),
                Arc::clone(lookup),
            )),
        })
    }

    /// Which variant this is.
    pub const fn kind(&self) -> SinkKind {
        match self {
            Self::Log(_) => SinkKind::Log,
            Self::Database(_) => SinkKind::Database,
            Self::Slack(_) => SinkKind::Slack,
            Self::Timeseries(_) => SinkKind::Timeseries,
        }
    }

    /// Name for logging.
    pub const fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Acquire the sink's resources. Called once, before any delivery.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the process.
    pub async fn start(&mut self) -> Result<(), SinkError> {
        match self {
            Self::Log(_) => Ok(()),
            Self::Database(sink) => sink.start().await,
            Self::Slack(sink) => {
                sink.start();
                Ok(())
            }
            Self::Timeseries(sink) => sink.start(),
        }
    }

    /// Deliver an alert. Sinks that need entity metadata annotate it in
    /// place; the first one to do so pays for the lookups.
    ///
    /// # Errors
    ///
    /// Returns the sink's failure for this alert.
    pub async fn handle_alert(&mut self, alert: &mut Alert) -> Result<(), SinkError> {
        match self {
            Self::Log(sink) => {
                sink.handle_alert(alert);
                Ok(())
            }
            Self::Database(sink) => sink.handle_alert(alert).await,
            Self::Slack(sink) => sink.handle_alert(alert).await,
            Self::Timeseries(sink) => sink.handle_alert(alert).await,
        }
    }

    /// Deliver a detector error event.
    ///
    /// # Errors
    ///
    /// Returns the sink's failure for this event.
    pub async fn handle_error(&mut self, event: &ErrorEvent) -> Result<(), SinkError> {
        match self {
            Self::Log(sink) => {
                sink.handle_error(event);
                Ok(())
            }
            Self::Database(sink) => sink.handle_error(event).await,
            Self::Slack(_) | Self::Timeseries(_) => Ok(()),
        }
    }

    /// Deliver a timer tick.
    ///
    /// # Errors
    ///
    /// Returns the sink's failure for this tick.
    pub fn handle_timer(&mut self, now: i64) -> Result<(), SinkError> {
        match self {
            Self::Log(sink) => {
                sink.handle_timer(now);
                Ok(())
            }
            Self::Timeseries(sink) => sink.handle_timer(now),
            Self::Database(_) | Self::Slack(_) => Ok(()),
        }
    }
}

/// Every enabled sink, at most one per kind.
#[derive(Debug, Default)]
pub struct SinkSet {
    sinks: BTreeMap<SinkKind, Sink>,
}

impl SinkSet {
    /// Build one sink per distinct kind.
    ///
    /// # Errors
    ///
    /// Returns the first construction failure.
    pub fn build(
        kinds: impl IntoIterator<Item = SinkKind>,
        config: &SinksConfig,
        lookup: &Arc<EntityLookup>,
    ) -> Result<Self, SinkError> {
        let mut set = Self::default();
        for kind in kinds {
            if !set.sinks.contains_key(&kind) {
                set.insert(Sink::build(kind, config, lookup)?);
            }
        }
        Ok(set)
    }

    /// Add or replace the sink of its kind.
    pub fn insert(&mut self, sink: Sink) {
        self.sinks.insert(sink.kind(), sink);
    }

    /// Start every sink exactly once, in kind order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure.
    pub async fn start_all(&mut self) -> Result<(), SinkError> {
        for sink in self.sinks.values_mut() {
            sink.start().await?;
            info!(sink = sink.name(), "sink started");
        }
        Ok(())
    }

    /// The sink of the given kind, if enabled.
    pub fn get(&self, kind: SinkKind) -> Option<&Sink> {
        self.sinks.get(&kind)
    }

    /// Mutable access to the sink of the given kind, if enabled.
    pub fn get_mut(&mut self, kind: SinkKind) -> Option<&mut Sink> {
        self.sinks.get_mut(&kind)
    }

    /// Enabled kinds, in kind order.
    pub fn kinds(&self) -> Vec<SinkKind> {
        self.sinks.keys().copied().collect()
    }

    /// Number of enabled sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sink is enabled.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
