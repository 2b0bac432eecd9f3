//! Observable sensor resource
//!
//! [`ObservableResource`] is the server side of CoAP Observe (RFC 7641) for
//! the sensor. It answers one-shot reads and keeps a set of observers, each
//! with its own ordered update queue and delivery task:
//!
//! ```text
//! ValueSource::publish ──► listener (per observer) ──► queue ──► delivery task ──► stream
//! ```
//!
//! An observer goes `Registered → Notified* → Unregistered`. Unregistration
//! happens exactly once, either because the stream reports the session closed
//! or failed, or because [`ObservableResource::unregister_observer`] was
//! called. Either way the listener is removed and the stream is dropped with
//! the task, so nothing writes to it afterwards.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    representation::{MediaType, Representation, RepresentationBuilder},
    source::{ChangeListener, Reading, SubscriptionId, ValueSource},
};

pub mod stream;

pub use stream::ObserveStream;

/// Identifies one observation for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// Returned by a successful registration; used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    id: ObserverId,
}

impl ObserverHandle {
    pub fn id(&self) -> ObserverId {
        self.id
    }
}

struct ActiveObserver {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

struct Registry {
    source: Arc<dyn ValueSource>,
    active: Mutex<HashMap<ObserverId, ActiveObserver>>,
}

impl Registry {
    fn active(&self) -> MutexGuard<'_, HashMap<ObserverId, ActiveObserver>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the observer and its listener. `None` if already released.
    fn release(&self, id: ObserverId) -> Option<ActiveObserver> {
        let entry = self.active().remove(&id)?;
        self.source.off_change(entry.subscription);
        Some(entry)
    }
}

/// The observable sensor resource
pub struct ObservableResource {
    registry: Arc<Registry>,
    builder: RepresentationBuilder,
    next_id: AtomicU64,
}

impl ObservableResource {
    pub fn new(source: Arc<dyn ValueSource>, builder: RepresentationBuilder) -> Self {
        Self {
            registry: Arc::new(Registry {
                source,
                active: Mutex::new(HashMap::new()),
            }),
            builder,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn source(&self) -> &Arc<dyn ValueSource> {
        &self.registry.source
    }

    /// Representation of the current reading for a plain GET.
    pub fn handle_one_shot(&self, format: MediaType) -> Result<Representation> {
        let reading = self
            .registry
            .source
            .current_reading()
            .ok_or(Error::DataUnavailable)?;
        Ok(self.builder.sensor(&reading, format))
    }

    /// Subscribes `stream` to the sensor.
    ///
    /// The current reading is sent right away as the initial notification.
    /// Without a reading the stream is rejected with [`Error::DataUnavailable`]
    /// and not registered. Must be called inside a tokio runtime.
    pub async fn register_observer<S>(&self, stream: S, format: MediaType) -> Result<ObserverHandle>
    where
        S: ObserveStream,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let (queue, updates) = mpsc::unbounded_channel::<Arc<Reading>>();
        let listener: ChangeListener = Arc::new(move |reading: &Arc<Reading>| {
            // Fails only once the observer has ended
            let _ = queue.send(Arc::clone(reading));
        });

        let source = &self.registry.source;
        let (initial, subscription) = source.observe(listener);

        let Some(initial) = initial else {
            source.off_change(subscription);
            let error = Error::DataUnavailable;
            stream.reject(&error).await;
            debug!(observer = %id, "Observe rejected, no reading yet");
            return Err(error);
        };

        if let Err(e) = stream.send(&self.builder.sensor(&initial, format)).await {
            source.off_change(subscription);
            warn!(observer = %id, error = %e, "Initial notification failed");
            return Err(e);
        }

        let observers = {
            let mut active = self.registry.active();
            let task = tokio::spawn(deliver(
                id,
                stream,
                updates,
                self.builder.clone(),
                format,
                Arc::clone(&self.registry),
            ));
            active.insert(id, ActiveObserver { subscription, task });
            active.len()
        };

        debug!(observer = %id, observers, "Observer registered");
        Ok(ObserverHandle { id })
    }

    /// Ends an observation. Returns `false` if it had already ended.
    pub fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        match self.registry.release(handle.id) {
            Some(entry) => {
                entry.task.abort();
                debug!(observer = %handle.id, "Observer unregistered");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, handle: ObserverHandle) -> bool {
        self.registry.active().contains_key(&handle.id)
    }

    pub fn observer_count(&self) -> usize {
        self.registry.active().len()
    }

    /// Ends every observation. Returns how many were active.
    pub fn close_all(&self) -> usize {
        let entries: Vec<(ObserverId, ActiveObserver)> = self.registry.active().drain().collect();
        let closed = entries.len();
        for (_, entry) in entries {
            self.registry.source.off_change(entry.subscription);
            entry.task.abort();
        }
        if closed > 0 {
            info!(observers = closed, "Closed all observers");
        }
        closed
    }
}

impl Drop for ObservableResource {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for ObservableResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableResource")
            .field("observers", &self.observer_count())
            .finish()
    }
}

async fn deliver<S>(
    id: ObserverId,
    stream: S,
    mut updates: UnboundedReceiver<Arc<Reading>>,
    builder: RepresentationBuilder,
    format: MediaType,
    registry: Arc<Registry>,
) where
    S: ObserveStream,
{
    let mut delivered: u64 = 1;

    loop {
        tokio::select! {
            // Closure wins over a pending update so a closed stream is never written
            biased;

            _ = stream.closed() => {
                debug!(observer = %id, delivered, "Observe session closed");
                break;
            }
            update = updates.recv() => {
                let Some(reading) = update else { break };
                if let Err(e) = stream.send(&builder.sensor(&reading, format)).await {
                    warn!(observer = %id, error = %e, "Notification failed, dropping observer");
                    break;
                }
                delivered += 1;
            }
        }
    }

    registry.release(id);
    drop(stream);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FeedSource, ReadingValue, SimulatedSource};
    use crate::test_utils::MockStream;

    fn resource(source: Arc<dyn ValueSource>) -> ObservableResource {
        ObservableResource::new(source, RepresentationBuilder::default())
    }

    #[test]
    fn test_one_shot_without_reading() {
        let resource = resource(Arc::new(FeedSource::default()));
        let result = resource.handle_one_shot(MediaType::Turtle);
        assert!(matches!(result, Err(Error::DataUnavailable)));
    }

    #[test]
    fn test_one_shot_with_reading() {
        let source = Arc::new(SimulatedSource::manual(Box::new(|| 0.5)));
        let resource = resource(source);
        let representation = resource.handle_one_shot(MediaType::Turtle).unwrap();
        assert_eq!(representation.content_format, MediaType::Turtle);
        assert!(representation.text().contains("\"30.0\"^^xsd:float"));
    }

    #[tokio::test]
    async fn test_register_without_reading_rejects_stream() {
        let source = Arc::new(FeedSource::default());
        let resource = resource(source.clone());
        let (stream, tap) = MockStream::new();

        let result = resource.register_observer(stream, MediaType::Turtle).await;
        assert!(matches!(result, Err(Error::DataUnavailable)));
        assert_eq!(tap.rejection().as_deref(), Some("No data available"));
        assert_eq!(resource.observer_count(), 0);
        assert!(source.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_initial_send_leaves_nothing_registered() {
        let source = Arc::new(SimulatedSource::manual(Box::new(|| 0.5)));
        let resource = resource(source.clone());
        let (stream, tap) = MockStream::new();
        tap.fail_sends();

        let result = resource.register_observer(stream, MediaType::Turtle).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
        assert_eq!(resource.observer_count(), 0);
        assert!(source.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_updates_are_delivered_in_order() {
        let source = Arc::new(FeedSource::default());
        source.ingest(r#"{"value": "a"}"#).unwrap();
        let resource = resource(source.clone());
        let (stream, mut tap) = MockStream::new();

        resource
            .register_observer(stream, MediaType::Turtle)
            .await
            .unwrap();
        for value in ["b", "c", "d"] {
            source.ingest(&format!(r#"{{"value": "{value}"}}"#)).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let representation = tap.next().await.unwrap();
            let text = representation.text();
            let value = ["a", "b", "c", "d"]
                .into_iter()
                .find(|v| text.contains(&format!("itm:hasValue \"{v}\"")))
                .unwrap();
            seen.push(value);
        }
        assert_eq!(seen, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let source = Arc::new(FeedSource::default());
        source.ingest(r#"{"value": 1}"#).unwrap();
        let resource = resource(source.clone());
        let (stream, tap) = MockStream::new();

        let handle = resource
            .register_observer(stream, MediaType::Turtle)
            .await
            .unwrap();
        assert!(resource.is_registered(handle));

        assert!(resource.unregister_observer(handle));
        assert!(!resource.unregister_observer(handle));
        assert_eq!(resource.observer_count(), 0);
        assert!(source.subscriptions().is_empty());

        // Stream is dropped with the aborted task
        tap.dropped().await;
        source.ingest(r#"{"value": 2}"#).unwrap();
        assert_eq!(tap.writes_after_close(), 0);
    }

    #[tokio::test]
    async fn test_stream_close_unregisters_observer() {
        let source = Arc::new(FeedSource::default());
        source.ingest(r#"{"value": 1}"#).unwrap();
        let resource = resource(source.clone());
        let (stream, mut tap) = MockStream::new();

        let handle = resource
            .register_observer(stream, MediaType::Turtle)
            .await
            .unwrap();
        tap.next().await.unwrap();

        tap.close();
        source.ingest(r#"{"value": 2}"#).unwrap();
        tap.dropped().await;

        assert!(!resource.is_registered(handle));
        assert!(!resource.unregister_observer(handle));
        assert!(source.subscriptions().is_empty());
        assert_eq!(tap.writes_after_close(), 0);
        assert_eq!(tap.sent(), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let source = Arc::new(FeedSource::default());
        source.ingest(r#"{"value": 1}"#).unwrap();
        let resource = resource(source.clone());

        for _ in 0..3 {
            let (stream, _tap) = MockStream::new();
            resource
                .register_observer(stream, MediaType::Turtle)
                .await
                .unwrap();
        }
        assert_eq!(resource.observer_count(), 3);
        assert_eq!(resource.close_all(), 3);
        assert_eq!(resource.observer_count(), 0);
        assert!(source.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_late_observer_gets_snapshot_then_changes() {
        let source = Arc::new(FeedSource::default());
        source.ingest(r#"{"value": "old"}"#).unwrap();
        source.ingest(r#"{"value": "current"}"#).unwrap();
        let resource = resource(source.clone());
        let (stream, mut tap) = MockStream::new();

        resource
            .register_observer(stream, MediaType::Turtle)
            .await
            .unwrap();
        source.ingest(r#"{"value": "next"}"#).unwrap();

        assert!(tap.next().await.unwrap().text().contains("\"current\""));
        assert!(tap.next().await.unwrap().text().contains("\"next\""));
        assert_eq!(
            source.current_reading().unwrap().value(),
            &ReadingValue::Text("next".into())
        );
    }
}
