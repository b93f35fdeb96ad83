//! Sinks for the Watchtower alert dispatcher.
//!
//! A sink receives decoded alerts, detector error events and periodic
//! timer ticks, and performs one external effect with them. The set of
//! sinks is closed: configuration picks from [`SinkKind`] and the
//! dispatcher drives each through [`Sink`].
//!
//! # Modules
//!
//! - [`config`] -- Sink names and per-sink configuration blocks
//! - [`sink`] -- The [`Sink`] enum and the [`SinkSet`] of enabled sinks
//! - [`log`] -- Structured log lines
//! - [`database`] -- `PostgreSQL` alert and error tables
//! - [`slack`] -- Slack channel notifications
//! - [`timeseries`] -- Interval-bucketed level and delta metrics
//! - [`error`] -- Sink errors

pub mod config;
pub mod database;
pub mod error;
pub mod log;
pub mod sink;
pub mod slack;
pub mod timeseries;

pub use config::{DatabaseConfig, SinkKind, SinksConfig, SlackConfig, TimeseriesSinkConfig};
pub use database::DatabaseSink;
pub use error::SinkError;
pub use log::LogSink;
pub use sink::{Sink, SinkSet};
pub use slack::SlackSink;
pub use timeseries::TimeseriesSink;
