//! Detection source reading newline-delimited JSON.
//!
//! Each line holds the output of one detection pass: a JSON array of records,
//! or a single record object. Blank lines are ticks without faces.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{debug, warn};

use crate::detection::{DetectionRecord, DetectionSource};
use crate::error::Result;

/// Replays detection output captured as JSON lines.
pub struct JsonLinesSource<R> {
    name: String,
    lines: Lines<BufReader<R>>,
    line_number: u64,
    min_confidence: f64,
}

impl JsonLinesSource<tokio::fs::File> {
    /// Read records from a file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::from_reader(file, path.display().to_string()))
    }
}

impl JsonLinesSource<tokio::io::Stdin> {
    /// Read records from standard input.
    pub fn stdin() -> Self {
        Self::from_reader(tokio::io::stdin(), "stdin")
    }
}

impl<R: AsyncRead + Unpin + Send> JsonLinesSource<R> {
    pub fn from_reader(reader: R, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: BufReader::new(reader).lines(),
            line_number: 0,
            min_confidence: 0.0,
        }
    }

    /// Drop records whose detector score is below `min_confidence`.
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn parse_line(&self, line: &str) -> Vec<DetectionRecord> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let values = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Array(values)) => values,
            Ok(value @ serde_json::Value::Object(_)) => vec![value],
            Ok(other) => {
                warn!(
                    "{}:{}: expected an array of detections, got {}",
                    self.name, self.line_number, other
                );
                return Vec::new();
            }
            Err(e) => {
                warn!("{}:{}: invalid JSON: {}", self.name, self.line_number, e);
                return Vec::new();
            }
        };

        values
            .into_iter()
            .enumerate()
            .filter_map(
                |(index, value)| match serde_json::from_value::<DetectionRecord>(value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(
                            "{}:{}: skipping detection #{}: {}",
                            self.name, self.line_number, index, e
                        );
                        None
                    }
                },
            )
            .filter(|record| record.meets_confidence(self.min_confidence))
            .collect()
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> DetectionSource for JsonLinesSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&mut self) -> Result<Option<Vec<DetectionRecord>>> {
        match self.lines.next_line().await? {
            Some(line) => {
                self.line_number += 1;
                Ok(Some(self.parse_line(&line)))
            }
            None => {
                debug!("{}: end of input after {} lines", self.name, self.line_number);
                Ok(None)
            }
        }
    }
}
