use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::connection::{
    ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OUTBOUND_BUFFER, DEFAULT_RETRY_DELAY,
};
use crate::error::{FacecastError, Result};
use crate::publisher::DeliveryPolicy;
use crate::runner::OverlapPolicy;

/// Default consumer endpoint (loopback).
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080";

/// Default detection period, 10 ticks per second.
pub const DEFAULT_TICK_PERIOD_MS: u64 = 100;

/// Default minimum detector score.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Settings for a publishing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Consumer WebSocket URL (`ws://` only)
    pub endpoint: String,

    /// Detection/publish period in milliseconds
    pub tick_period_ms: u64,

    /// Fixed delay before reconnecting, in milliseconds
    pub retry_delay_ms: u64,

    /// WebSocket handshake timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Records scored below this by the detector are not published
    pub min_confidence: f64,

    /// What to do with ticks that fire while detection is still running
    pub overlap: OverlapPolicy,

    /// What to do with messages refused while disconnected
    pub delivery: DeliveryPolicy,

    /// Frames buffered towards the socket before new ones are dropped
    pub outbound_buffer: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            overlap: OverlapPolicy::default(),
            delivery: DeliveryPolicy::default(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl PublisherConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            retry_delay: self.retry_delay(),
            connect_timeout: self.connect_timeout(),
            outbound_buffer: self.outbound_buffer,
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with("ws://") {
            return Err(FacecastError::config(format!(
                "endpoint must be a ws:// URL, got {:?}",
                self.endpoint
            )));
        }
        if self.tick_period_ms == 0 {
            return Err(FacecastError::config("tick_period_ms must be positive"));
        }
        if self.retry_delay_ms == 0 {
            return Err(FacecastError::config("retry_delay_ms must be positive"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(FacecastError::config("connect_timeout_ms must be positive"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(FacecastError::config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.outbound_buffer == 0 {
            return Err(FacecastError::config("outbound_buffer must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = PublisherConfig::default();
        assert_eq!(config.endpoint, "ws://127.0.0.1:8080");
        assert_eq!(config.tick_period(), Duration::from_millis(100));
        assert_eq!(config.retry_delay(), Duration::from_millis(3000));
        assert_eq!(config.overlap, OverlapPolicy::Skip);
        assert_eq!(config.delivery, DeliveryPolicy::FireAndForget);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PublisherConfig =
            serde_json::from_str(r#"{"endpoint":"ws://localhost:9000","overlap":"coalesce"}"#)
                .unwrap();
        assert_eq!(config.endpoint, "ws://localhost:9000");
        assert_eq!(config.overlap, OverlapPolicy::Coalesce);
        assert_eq!(config.tick_period_ms, DEFAULT_TICK_PERIOD_MS);
    }

    #[rstest]
    #[case::http_endpoint(PublisherConfig { endpoint: "http://localhost".into(), ..Default::default() })]
    #[case::tls_endpoint(PublisherConfig { endpoint: "wss://localhost".into(), ..Default::default() })]
    #[case::zero_tick(PublisherConfig { tick_period_ms: 0, ..Default::default() })]
    #[case::zero_retry(PublisherConfig { retry_delay_ms: 0, ..Default::default() })]
    #[case::confidence_above_one(PublisherConfig { min_confidence: 1.5, ..Default::default() })]
    #[case::nan_confidence(PublisherConfig { min_confidence: f64::NAN, ..Default::default() })]
    #[case::zero_buffer(PublisherConfig { outbound_buffer: 0, ..Default::default() })]
    fn test_invalid_configs(#[case] config: PublisherConfig) {
        assert!(matches!(config.validate(), Err(FacecastError::Config(_))));
    }

    #[test]
    fn test_connection_config() {
        let config = PublisherConfig {
            retry_delay_ms: 250,
            connect_timeout_ms: 1500,
            outbound_buffer: 4,
            ..Default::default()
        };
        let conn = config.connection_config();
        assert_eq!(conn.retry_delay, Duration::from_millis(250));
        assert_eq!(conn.connect_timeout, Duration::from_millis(1500));
        assert_eq!(conn.outbound_buffer, 4);
    }
}
