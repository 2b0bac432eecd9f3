//! Dispatch tests: routing, method checks, content negotiation and the
//! data-unavailable path, driven through the `tower::Service` interface.

use std::sync::Arc;

use tower::ServiceExt;

use coap_ssp::{
    DeviceDescriptor, Dispatched, Dispatcher, Exchange, FeedSource, IncomingRequest, MediaType,
    RepresentationBuilder, RequestType, Response, ResponseType, SimulatedSource, ValueSource,
    test_utils::{MockStream, get, get_accept, observe, request_with},
};

fn device() -> DeviceDescriptor {
    DeviceDescriptor::new(
        "Weather station",
        "SVA_05-SS15",
        vec!["192.168.1.20".parse().unwrap()],
    )
}

fn simulated() -> Dispatcher {
    let source: Arc<dyn ValueSource> = Arc::new(SimulatedSource::manual(Box::new(|| 0.5)));
    Dispatcher::new(source, RepresentationBuilder::default(), device())
}

fn empty_feed() -> Dispatcher {
    Dispatcher::new(
        Arc::new(FeedSource::default()),
        RepresentationBuilder::default(),
        device(),
    )
}

async fn call(dispatcher: &Dispatcher, request: IncomingRequest) -> Response {
    dispatcher
        .clone()
        .oneshot(Exchange::new(request, || MockStream::new().0))
        .await
        .unwrap()
        .reply()
        .expect("expected a direct reply")
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let response = call(&simulated(), get("/pressure")).await;
    assert_eq!(response.status, ResponseType::NotFound);
    assert_eq!(response.content_format, Some(MediaType::TextPlain));
    assert_eq!(response.text(), "Resource not found: /pressure");
}

#[tokio::test]
async fn test_non_get_methods_are_rejected() {
    let dispatcher = simulated();
    for method in [RequestType::Post, RequestType::Put, RequestType::Delete] {
        for path in ["/.well-known/core", "/device", "/temperature"] {
            let response = call(&dispatcher, request_with(method, path, None, None)).await;
            assert_eq!(response.status, ResponseType::MethodNotAllowed, "{method:?} {path}");
            assert_eq!(response.text(), "Methods other than GET are disallowed");
        }
    }
}

#[tokio::test]
async fn test_unknown_path_wins_over_method() {
    let request = request_with(RequestType::Post, "/nothing", None, None);
    let response = call(&simulated(), request).await;
    assert_eq!(response.status, ResponseType::NotFound);
}

#[tokio::test]
async fn test_discovery_rejects_xml_accept() {
    let response = call(&simulated(), get_accept("/.well-known/core", 41)).await;
    assert_eq!(response.status, ResponseType::UnsupportedContentFormat);
    assert_eq!(
        response.text(),
        "Accept header must be application/link-format"
    );
}

#[tokio::test]
async fn test_discovery_document() {
    let dispatcher = simulated();
    for request in [get("/.well-known/core"), get_accept("/.well-known/core", 40)] {
        let response = call(&dispatcher, request).await;
        assert_eq!(response.status, ResponseType::Content);
        assert_eq!(response.content_format, Some(MediaType::LinkFormat));
        assert_eq!(
            response.text(),
            "</device>;ct=202;rt=\"http://itm.uni-luebeck.de/device05\",\
             </temperature>;obs;ct=202;rt=\"http://itm.uni-luebeck.de/groups/5/sensors/temperature\""
        );
    }
}

#[tokio::test]
async fn test_device_description() {
    let response = call(&simulated(), get("/device")).await;
    assert_eq!(response.status, ResponseType::Content);
    assert_eq!(response.content_format, Some(MediaType::Turtle));

    let text = response.text();
    assert!(text.starts_with("@prefix xsd: <http://www.w3.org/2001/XMLSchema#>.\n"));
    assert!(text.contains("itm:device05 itm:hasLabel \"Weather station\""));
    assert!(text.contains("itm:hasGroup \"SVA_05-SS15\""));
    assert!(text.contains("itm:hasIP \"192.168.1.20\""));
    assert!(text.contains(
        "itm:hasSensor <http://itm.uni-luebeck.de/groups/5/sensors/temperature>"
    ));
}

#[tokio::test]
async fn test_rdf_negotiation() {
    let dispatcher = simulated();

    let n3 = call(&dispatcher, get_accept("/device", 203)).await;
    assert_eq!(n3.status, ResponseType::Content);
    assert_eq!(n3.content_format, Some(MediaType::N3));

    for accept in [0, 40, 50, 201] {
        let response = call(&dispatcher, get_accept("/temperature", accept)).await;
        assert_eq!(response.status, ResponseType::UnsupportedContentFormat);
        assert_eq!(response.text(), "Accept header must be text/turtle or text/n3");
    }
}

#[tokio::test]
async fn test_sensor_reading_triples() {
    let response = call(&simulated(), get("/temperature")).await;
    assert_eq!(response.status, ResponseType::Content);

    let text = response.text();
    let statements: Vec<&str> = text
        .lines()
        .filter(|line| !line.starts_with("@prefix") && !line.is_empty())
        .collect();
    assert_eq!(statements.len(), 3, "{text}");
    assert!(statements[0].contains("itm:lastModified \""));
    assert!(statements[0].contains("Z\"^^xsd:dateTime"));
    assert!(statements[1].contains(
        "itm:hasStatus <http://itm.uni-luebeck.de/groups/5/sensors/temperatureStatus>"
    ));
    assert!(statements[2].contains("itm:hasValue \"30.0\"^^xsd:float"));
}

#[tokio::test]
async fn test_feed_without_data() {
    let dispatcher = empty_feed();
    let response = call(&dispatcher, get("/temperature")).await;
    assert_eq!(response.status, ResponseType::NotFound);
    assert_eq!(response.text(), "No data available");
}

#[tokio::test]
async fn test_observe_without_data_is_rejected_on_the_stream() {
    let dispatcher = empty_feed();
    let (stream, tap) = MockStream::new();

    let dispatched = dispatcher
        .clone()
        .oneshot(Exchange::new(observe("/temperature"), move || stream))
        .await
        .unwrap();

    assert!(matches!(dispatched, Dispatched::Closed));
    assert_eq!(tap.rejection().as_deref(), Some("No data available"));
    assert_eq!(tap.sent(), 0);
    assert_eq!(dispatcher.sensor().observer_count(), 0);
}

#[tokio::test]
async fn test_observe_on_device_is_answered_once() {
    let dispatcher = simulated();
    let response = call(&dispatcher, observe("/device")).await;
    assert_eq!(response.status, ResponseType::Content);
    assert_eq!(dispatcher.sensor().observer_count(), 0);
}

#[tokio::test]
async fn test_custom_sensor_name() {
    let naming = coap_ssp::SensorNaming::new("http://example.org/", "dev1", "2", "weather");
    let builder = RepresentationBuilder::new(
        coap_ssp::rdf::Prefixes::standard(naming.base_iri()),
        naming,
    );
    let feed = Arc::new(FeedSource::default());
    feed.ingest(r#"{"value": "sunny"}"#).unwrap();
    let dispatcher = Dispatcher::new(feed, builder, device());

    assert_eq!(
        call(&dispatcher, get("/temperature")).await.status,
        ResponseType::NotFound
    );
    let response = call(&dispatcher, get("/weather")).await;
    assert_eq!(response.status, ResponseType::Content);
    assert!(response.text().contains("itm:hasValue \"sunny\""));
}
