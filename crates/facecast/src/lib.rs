//! Facecast: stream per-frame face detections to a downstream consumer.
//!
//! A detection pipeline produces face records at a fixed rate. This crate
//! turns each record into a timestamped JSON message and pushes it over a
//! single persistent WebSocket, reconnecting on failure and skipping messages
//! identical to the previous one.
//!
//! ## Core Types
//!
//! - [`DetectionRecord`] - One detected face for a single frame
//! - [`DetectionSource`] - Trait for the external detection pipeline
//! - [`WireMessage`] - The JSON envelope sent downstream
//! - [`EventFormatter`] - Maps records to wire messages
//!
//! ## Publishing
//!
//! - [`ChangeFilter`] - Suppresses repeats of the last accepted message
//! - [`ConnectionManager`] - Owns the socket and reconnects at a fixed delay
//! - [`Publisher`] - Formatter → filter → connection per record
//! - [`TickRunner`] - Fixed-period loop with an overlap guard
//! - [`Session`] - Wires the above from a [`PublisherConfig`]
//!
//! ## Sources
//!
//! - [`JsonLinesSource`] - Replays detection output stored as JSON lines

pub mod config;
pub mod connection;
pub mod detection;
pub mod error;
pub mod filter;
pub mod message;
pub mod publisher;
pub mod runner;
pub mod session;
pub mod source;

pub use config::PublisherConfig;
pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStats, Transport,
};
pub use detection::{BoundingBox, DetectionRecord, DetectionSource, Gender};
pub use error::{FacecastError, Result};
pub use filter::ChangeFilter;
pub use message::{
    Clock, EventFormatter, FacePayload, FixedClock, Position, SystemClock, WireMessage,
};
pub use publisher::{DeliveryPolicy, PublishOutcome, PublishStats, Publisher, TickReport};
pub use runner::{OverlapPolicy, RunSummary, RunnerStats, TickRunner};
pub use session::{Session, SessionSummary};
pub use source::JsonLinesSource;
