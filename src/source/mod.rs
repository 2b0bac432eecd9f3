//! Sensor value sources
//!
//! A [`ValueSource`] owns the current [`Reading`] and tells listeners whenever
//! it is replaced. Two variants exist: [`simulated::SimulatedSource`], a random
//! walk driven by a shared timer, and [`feed::FeedSource`], fed by an external
//! record stream such as a serial device.

use std::{fmt, sync::Arc};

use time::OffsetDateTime;

pub mod feed;
pub mod simulated;
pub mod subscriptions;

pub use feed::FeedSource;
pub use simulated::SimulatedSource;
pub use subscriptions::{Listener, SubscriptionId, Subscriptions};

/// The value carried by a reading
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingValue {
    /// A numeric measurement, rounded to one decimal when rendered
    Number(f64),
    /// A value taken verbatim from an external feed
    Text(String),
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Number(value) => write!(f, "{value}"),
            ReadingValue::Text(text) => f.write_str(text),
        }
    }
}

/// An immutable sensor reading
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    value: ReadingValue,
    timestamp: OffsetDateTime,
}

impl Reading {
    pub fn new(value: ReadingValue, timestamp: OffsetDateTime) -> Self {
        Self { value, timestamp }
    }

    /// Creates the reading that replaces `previous`, stamped now.
    ///
    /// Timestamps never go backwards even if the wall clock does.
    pub fn succeeding(previous: Option<&Reading>, value: ReadingValue) -> Self {
        let now = OffsetDateTime::now_utc();
        let timestamp = match previous {
            Some(previous) if previous.timestamp > now => previous.timestamp,
            _ => now,
        };
        Self { value, timestamp }
    }

    pub fn value(&self) -> &ReadingValue {
        &self.value
    }

    /// When the value last changed
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }
}

/// Listener type used by value sources
pub type ChangeListener = Listener<Reading>;

/// A producer of readings with change notification
///
/// Implementors only provide the [`Subscriptions`] holding their state; the
/// remaining operations are derived from it.
pub trait ValueSource: Send + Sync + 'static {
    fn subscriptions(&self) -> &Subscriptions<Reading>;

    /// The current reading, `None` until the first value arrives
    fn current_reading(&self) -> Option<Arc<Reading>> {
        self.subscriptions().current()
    }

    /// Registers a listener invoked with every new reading.
    fn on_change(&self, listener: ChangeListener) -> SubscriptionId {
        self.subscriptions().subscribe(listener)
    }

    /// Removes a listener. Removing an unknown listener is a no-op.
    fn off_change(&self, id: SubscriptionId) -> bool {
        self.subscriptions().unsubscribe(id)
    }

    /// Atomically reads the current reading and registers a listener for the
    /// ones that follow it.
    fn observe(&self, listener: ChangeListener) -> (Option<Arc<Reading>>, SubscriptionId) {
        self.subscriptions().observe(listener)
    }
}
