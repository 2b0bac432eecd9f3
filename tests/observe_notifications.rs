//! Observe notification tests against in-memory streams
//!
//! Covers fan-out from the shared simulated timer, ordering of feed-driven
//! updates, idempotent unregistration and the no-write-after-close guarantee.

use std::{sync::Arc, time::Duration};

use coap_ssp::{
    Error, FeedSource, MediaType, ObservableResource, RepresentationBuilder, SimulatedSource,
    ValueSource,
    test_utils::{MockStream, StreamTap},
};

fn value_of(text: &str) -> String {
    let start = text.find("itm:hasValue \"").expect("value triple") + "itm:hasValue \"".len();
    let end = start + text[start..].find('"').expect("closing quote");
    text[start..end].to_string()
}

async fn next_value(tap: &mut StreamTap) -> String {
    let representation = tokio::time::timeout(Duration::from_secs(5), tap.next())
        .await
        .expect("notification in time")
        .expect("stream still open");
    value_of(&representation.text())
}

#[tokio::test(start_paused = true)]
async fn test_two_observers_see_the_same_tick() {
    let source = Arc::new(SimulatedSource::with_jitter(
        Duration::from_secs(1),
        Box::new(|| 0.0),
    ));
    let resource = ObservableResource::new(source.clone(), RepresentationBuilder::default());

    let (first, mut first_tap) = MockStream::new();
    let (second, mut second_tap) = MockStream::new();
    resource
        .register_observer(first, MediaType::Turtle)
        .await
        .unwrap();
    resource
        .register_observer(second, MediaType::Turtle)
        .await
        .unwrap();

    assert_eq!(next_value(&mut first_tap).await, "30.0");
    assert_eq!(next_value(&mut second_tap).await, "30.0");

    // One tick of the shared timer reaches both observers with one value
    let first_tick = next_value(&mut first_tap).await;
    let second_tick = next_value(&mut second_tap).await;
    assert_eq!(first_tick, "30.5");
    assert_eq!(first_tick, second_tick);

    assert_eq!(next_value(&mut first_tap).await, "31.0");
    assert_eq!(next_value(&mut second_tap).await, "31.0");
}

#[tokio::test]
async fn test_feed_updates_arrive_in_order() {
    let feed = Arc::new(FeedSource::new("temp"));
    feed.ingest(r#"{"temp": 0}"#).unwrap();
    let resource = ObservableResource::new(feed.clone(), RepresentationBuilder::default());

    let (stream, mut tap) = MockStream::new();
    resource
        .register_observer(stream, MediaType::N3)
        .await
        .unwrap();

    let feeder = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move {
            for i in 1..=50 {
                feed.ingest(&format!(r#"{{"temp": {i}}}"#)).unwrap();
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    for expected in 0..=50 {
        assert_eq!(next_value(&mut tap).await, expected.to_string());
    }
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_late_observer_starts_from_current_reading() {
    let feed = Arc::new(FeedSource::default());
    let resource = ObservableResource::new(feed.clone(), RepresentationBuilder::default());

    let (early, mut early_tap) = MockStream::new();
    feed.ingest(r#"{"value": "a"}"#).unwrap();
    resource
        .register_observer(early, MediaType::Turtle)
        .await
        .unwrap();
    feed.ingest(r#"{"value": "b"}"#).unwrap();

    let (late, mut late_tap) = MockStream::new();
    resource
        .register_observer(late, MediaType::Turtle)
        .await
        .unwrap();
    feed.ingest(r#"{"value": "c"}"#).unwrap();

    assert_eq!(next_value(&mut early_tap).await, "a");
    assert_eq!(next_value(&mut early_tap).await, "b");
    assert_eq!(next_value(&mut early_tap).await, "c");

    assert_eq!(next_value(&mut late_tap).await, "b");
    assert_eq!(next_value(&mut late_tap).await, "c");
}

#[tokio::test]
async fn test_unregister_twice_equals_once() {
    let feed = Arc::new(FeedSource::default());
    feed.ingest(r#"{"value": 1}"#).unwrap();
    let resource = ObservableResource::new(feed.clone(), RepresentationBuilder::default());

    let (kept, mut kept_tap) = MockStream::new();
    let (removed, removed_tap) = MockStream::new();
    resource
        .register_observer(kept, MediaType::Turtle)
        .await
        .unwrap();
    let handle = resource
        .register_observer(removed, MediaType::Turtle)
        .await
        .unwrap();

    assert!(resource.unregister_observer(handle));
    assert!(!resource.unregister_observer(handle));
    assert_eq!(resource.observer_count(), 1);
    assert_eq!(feed.subscriptions().len(), 1);

    removed_tap.dropped().await;
    feed.ingest(r#"{"value": 2}"#).unwrap();

    assert_eq!(next_value(&mut kept_tap).await, "1");
    assert_eq!(next_value(&mut kept_tap).await, "2");
    assert_eq!(removed_tap.sent(), 1);
}

#[tokio::test]
async fn test_no_writes_after_close() {
    let feed = Arc::new(FeedSource::default());
    feed.ingest(r#"{"value": 1}"#).unwrap();
    let resource = ObservableResource::new(feed.clone(), RepresentationBuilder::default());

    let (stream, mut tap) = MockStream::new();
    resource
        .register_observer(stream, MediaType::Turtle)
        .await
        .unwrap();
    assert_eq!(next_value(&mut tap).await, "1");

    tap.close();
    for i in 2..20 {
        feed.ingest(&format!(r#"{{"value": {i}}}"#)).unwrap();
    }
    tap.dropped().await;

    assert_eq!(tap.writes_after_close(), 0);
    assert_eq!(resource.observer_count(), 0);
    assert!(feed.subscriptions().is_empty());
}

#[tokio::test]
async fn test_failing_stream_is_dropped() {
    let feed = Arc::new(FeedSource::default());
    feed.ingest(r#"{"value": 1}"#).unwrap();
    let resource = ObservableResource::new(feed.clone(), RepresentationBuilder::default());

    let (stream, tap) = MockStream::new();
    resource
        .register_observer(stream, MediaType::Turtle)
        .await
        .unwrap();

    tap.fail_sends();
    feed.ingest(r#"{"value": 2}"#).unwrap();
    tap.dropped().await;

    assert_eq!(resource.observer_count(), 0);
    assert!(feed.subscriptions().is_empty());
}

#[tokio::test]
async fn test_observe_before_first_reading() {
    let feed = Arc::new(FeedSource::default());
    let resource = ObservableResource::new(feed.clone(), RepresentationBuilder::default());

    let (stream, tap) = MockStream::new();
    let result = resource.register_observer(stream, MediaType::Turtle).await;

    assert!(matches!(result, Err(Error::DataUnavailable)));
    assert_eq!(tap.rejection().as_deref(), Some("No data available"));
    assert!(tap.is_dropped());
    assert!(feed.subscriptions().is_empty());
}
