use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::{Reading, ReadingValue, Subscriptions, ValueSource};
use crate::error::{Error, Result};

/// Field read from each record when none is configured
pub const DEFAULT_FIELD: &str = "value";

/// Push-driven source fed by an external record stream
///
/// Each record is one JSON object per line. The configured field is taken as
/// the new value: strings verbatim, numbers and booleans in their JSON text
/// form. Records that do not parse are dropped and counted; they never update
/// the reading.
pub struct FeedSource {
    subscriptions: Subscriptions<Reading>,
    field: String,
    accepted: AtomicU64,
    discarded: AtomicU64,
}

impl FeedSource {
    pub fn new<S: Into<String>>(field: S) -> Self {
        Self {
            subscriptions: Subscriptions::new(),
            field: field.into(),
            accepted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Extracts the configured field from a raw record.
    pub fn parse_record(&self, record: &str) -> Result<ReadingValue> {
        let value: Value = serde_json::from_str(record)
            .map_err(|e| Error::malformed(format!("invalid JSON: {e}")))?;

        let Value::Object(mut fields) = value else {
            return Err(Error::malformed("record is not an object"));
        };

        match fields.remove(&self.field) {
            Some(Value::String(text)) => Ok(ReadingValue::Text(text)),
            Some(Value::Number(number)) => Ok(ReadingValue::Text(number.to_string())),
            Some(Value::Bool(flag)) => Ok(ReadingValue::Text(flag.to_string())),
            Some(other) => Err(Error::malformed(format!(
                "field '{}' has unsupported value {other}",
                self.field
            ))),
            None => Err(Error::malformed(format!("missing field '{}'", self.field))),
        }
    }

    /// Feeds one line from the external source.
    ///
    /// Blank lines are ignored and yield `Ok(None)`. A malformed record is
    /// counted and logged before the error is returned.
    pub fn ingest(&self, line: &str) -> Result<Option<Arc<Reading>>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        match self.parse_record(line) {
            Ok(value) => {
                let reading = self
                    .subscriptions
                    .publish_with(|previous| Reading::succeeding(previous, value));
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(value = %reading.value(), "Feed reading accepted");
                Ok(Some(reading))
            }
            Err(e) => {
                self.discard(&e);
                Err(e)
            }
        }
    }

    /// Feeds one raw line. Bytes that are not UTF-8 count as a malformed
    /// record.
    pub fn ingest_bytes(&self, line: &[u8]) -> Result<Option<Arc<Reading>>> {
        match std::str::from_utf8(line) {
            Ok(text) => self.ingest(text),
            Err(e) => {
                let e = Error::malformed(format!("invalid UTF-8: {e}"));
                self.discard(&e);
                Err(e)
            }
        }
    }

    fn discard(&self, error: &Error) {
        let discarded = self.discarded.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(error = %error, discarded, "Discarding malformed feed record");
    }

    /// Reads records until the feed ends. Malformed records, including lines
    /// that are not UTF-8, are skipped.
    pub async fn run<R>(&self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.split(b'\n');
        while let Some(line) = lines.next_segment().await? {
            // Already logged and counted
            let _ = self.ingest_bytes(&line);
        }

        info!(
            accepted = self.accepted(),
            discarded = self.discarded(),
            "Feed ended"
        );
        Ok(())
    }

    /// Number of records that updated the reading
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Number of malformed records dropped so far
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl Default for FeedSource {
    fn default() -> Self {
        Self::new(DEFAULT_FIELD)
    }
}

impl ValueSource for FeedSource {
    fn subscriptions(&self) -> &Subscriptions<Reading> {
        &self.subscriptions
    }
}

/// Opens the feed input: `-` for stdin, otherwise a file or device path.
pub async fn open(path: &str) -> Result<Box<dyn AsyncBufRead + Send + Unpin>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::config(format!("cannot open feed {path}: {e}")))?;
    Ok(Box::new(BufReader::new(file)))
}
