//! Wiring of connection manager, publisher and tick runner.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PublisherConfig;
use crate::connection::{ConnectionManager, ConnectionStats};
use crate::detection::DetectionSource;
use crate::error::{FacecastError, Result};
use crate::publisher::Publisher;
use crate::runner::{RunSummary, TickRunner};

/// Statistics for a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub run: RunSummary,
    pub connection: ConnectionStats,
}

/// A publishing session for one detection source and one consumer.
pub struct Session {
    config: PublisherConfig,
    connection: Arc<ConnectionManager>,
    runner: TickRunner,
}

impl Session {
    /// Validate `config` and start connecting to the consumer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: PublisherConfig, source: Box<dyn DetectionSource>) -> Result<Self> {
        config.validate()?;

        let connection = Arc::new(ConnectionManager::new(config.connection_config()));
        connection.open(config.endpoint.clone());

        let publisher = Publisher::new(connection.clone()).with_policy(config.delivery);
        let runner =
            TickRunner::new(source, publisher, config.tick_period()).with_overlap(config.overlap);

        Ok(Self {
            config,
            connection,
            runner,
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// The connection manager, for observing state.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Wait until the consumer connection is open.
    pub async fn wait_until_open(&self) -> Result<()> {
        let mut states = self.connection.subscribe();
        states
            .wait_for(|state| state.can_send())
            .await
            .map(|_| ())
            .map_err(|_| FacecastError::connection("connection manager dropped"))
    }

    /// Run until cancelled or the source is exhausted, then close the connection.
    pub async fn run(self, cancel: CancellationToken) -> SessionSummary {
        let run = self.runner.run(cancel).await;
        self.connection.shutdown().await;

        let summary = SessionSummary {
            run,
            connection: self.connection.stats(),
        };
        info!(
            "Session finished: {} sent, {} suppressed, {} dropped, {} connection attempts",
            summary.run.publish.sent,
            summary.run.publish.suppressed,
            summary.run.publish.dropped,
            summary.connection.attempts
        );
        summary
    }
}
