//! Alert stream intake over NATS.
//!
//! All consumer instances join one queue group on the alert subject, so
//! each alert is delivered to exactly one of them. Core NATS has no
//! backlog: a consumer sees alerts published after it joins.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::StreamError;

/// Result of one bounded wait on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled {
    /// A raw payload.
    Message(Vec<u8>),
    /// Nothing arrived within the wait.
    Idle,
}

/// A stream of raw alert payloads.
pub trait AlertSource {
    /// Wait up to `wait` for the next payload.
    ///
    /// An elapsed wait is [`Polled::Idle`], not an error; any error is
    /// fatal to the dispatch loop.
    fn poll(&mut self, wait: Duration) -> impl Future<Output = Result<Polled, StreamError>>;
}

/// Queue-group subscription on a NATS subject.
pub struct NatsSource {
    subscriber: async_nats::Subscriber,
}

impl NatsSource {
    /// Connect and join `group` on `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Connect`] or [`StreamError::Subscribe`].
    pub async fn connect(url: &str, subject: &str, group: &str) -> Result<Self, StreamError> {
        info!(url, "connecting to NATS server");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| StreamError::Connect(format!("failed to connect to {url}: {e}")))?;
        let subscriber = client
            .queue_subscribe(subject.to_owned(), group.to_owned())
            .await
            .map_err(|e| StreamError::Subscribe(format!("failed to subscribe to {subject}: {e}")))?;
        info!(subject, group, "subscribed to alert stream");
        Ok(Self { subscriber })
    }
}

impl AlertSource for NatsSource {
    async fn poll(&mut self, wait: Duration) -> Result<Polled, StreamError> {
        match timeout(wait, self.subscriber.next()).await {
            Err(_elapsed) => {
                debug!("no alert within poll timeout");
                Ok(Polled::Idle)
            }
            Ok(None) => Err(StreamError::Closed),
            Ok(Some(message)) => Ok(Polled::Message(message.payload.to_vec())),
        }
    }
}
