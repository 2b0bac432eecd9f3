//! Request dispatch
//!
//! [`Dispatcher`] routes a decoded CoAP request to the discovery, device or
//! sensor resource. It is a [`tower::Service`] over [`Exchange`]s so the
//! transport can drive it like any other service. Observe registrations are
//! handed a stream opened by the transport; everything else gets a single
//! [`Response`].

use std::{
    convert::Infallible,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::Arc,
    task::{Context, Poll},
};

use coap_lite::{
    CoapOption, CoapRequest, ObserveOption, Packet, RequestType, ResponseType,
    option_value::OptionValueU16,
};
use futures::{FutureExt, future::BoxFuture};
use route_recognizer::Router;
use tower::Service;
use tracing::{debug, error};

use crate::{
    device::DeviceDescriptor,
    error::{Error, Result},
    observer::{ObservableResource, ObserveStream, ObserverHandle},
    representation::{
        MediaType, RDF_FORMATS, Representation, RepresentationBuilder,
    },
    source::ValueSource,
};

/// Path of the CoRE resource directory listing
pub const DISCOVERY_PATH: &str = "/.well-known/core";
/// Path of the device description
pub const DEVICE_PATH: &str = "/device";

/// A decoded request with the options the dispatcher looks at
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub message: Packet,
    pub source: Option<SocketAddr>,
    path: String,
    method: RequestType,
    observe: Option<ObserveOption>,
    accept: Option<u16>,
}

impl From<CoapRequest<SocketAddr>> for IncomingRequest {
    fn from(request: CoapRequest<SocketAddr>) -> Self {
        let path = format!("/{}", request.get_path().trim_start_matches('/'));
        let method = *request.get_method();
        let observe = request.get_observe_flag().and_then(|flag| flag.ok());
        let accept = request
            .message
            .get_first_option_as::<OptionValueU16>(CoapOption::Accept)
            .and_then(|value| value.ok())
            .map(|value| value.0);

        Self {
            message: request.message,
            source: request.source,
            path,
            method,
            observe,
            accept,
        }
    }
}

impl IncomingRequest {
    /// Request path with a leading `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> RequestType {
        self.method
    }

    pub fn observe(&self) -> Option<ObserveOption> {
        self.observe
    }

    /// Raw Accept option value, if present
    pub fn accept(&self) -> Option<u16> {
        self.accept
    }
}

/// A single response: status, optional content format and body
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: ResponseType,
    pub content_format: Option<MediaType>,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Conversion into a [`Response`]
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Representation {
    fn into_response(self) -> Response {
        Response {
            status: ResponseType::Content,
            content_format: Some(self.content_format),
            payload: self.payload,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        Response {
            status: self.status(),
            content_format: Some(MediaType::TextPlain),
            payload: self.to_string().into_bytes(),
        }
    }
}

impl<T: IntoResponse> IntoResponse for Result<T> {
    fn into_response(self) -> Response {
        match self {
            Ok(value) => value.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// A request paired with the means to open an observe stream for it.
///
/// `opener` is only called for an observe registration on the sensor.
pub struct Exchange<O> {
    pub request: IncomingRequest,
    pub opener: O,
}

impl<O> Exchange<O> {
    pub fn new(request: IncomingRequest, opener: O) -> Self {
        Self { request, opener }
    }
}

/// Outcome of dispatching an [`Exchange`]
#[derive(Debug)]
pub enum Dispatched {
    /// Send this response
    Reply(Response),
    /// The request became an observation; the stream sent the first notification
    Observing(ObserverHandle),
    /// The stream already answered (rejection or failed first notification)
    Closed,
}

impl Dispatched {
    pub fn reply(self) -> Option<Response> {
        match self {
            Dispatched::Reply(response) => Some(response),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Discovery,
    Device,
    Sensor,
}

struct Inner {
    routes: Router<Resource>,
    sensor: ObservableResource,
    device: DeviceDescriptor,
    builder: RepresentationBuilder,
}

/// Routes requests to the provider's three resources
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn ValueSource>,
        builder: RepresentationBuilder,
        device: DeviceDescriptor,
    ) -> Self {
        let mut routes = Router::new();
        routes.add(DISCOVERY_PATH, Resource::Discovery);
        routes.add(DEVICE_PATH, Resource::Device);
        routes.add(&builder.naming().sensor_path(), Resource::Sensor);

        Self {
            inner: Arc::new(Inner {
                routes,
                sensor: ObservableResource::new(source, builder.clone()),
                device,
                builder,
            }),
        }
    }

    /// The observable sensor resource
    pub fn sensor(&self) -> &ObservableResource {
        &self.inner.sensor
    }

    pub fn builder(&self) -> &RepresentationBuilder {
        &self.inner.builder
    }
}

/// Picks the response format: the first offered one without Accept, the
/// requested one if offered, otherwise a negotiation error.
pub fn negotiate(accept: Option<u16>, offered: &[MediaType]) -> Result<MediaType> {
    let unsupported = || Error::Negotiation {
        expected: offered
            .iter()
            .map(|media| media.mime())
            .collect::<Vec<_>>()
            .join(" or "),
    };

    match accept {
        None => offered
            .first()
            .copied()
            .ok_or_else(|| Error::internal("no formats offered")),
        Some(code) => MediaType::from_code(code)
            .filter(|media| offered.contains(media))
            .ok_or_else(unsupported),
    }
}

async fn dispatch<O, S>(inner: Arc<Inner>, exchange: Exchange<O>) -> Dispatched
where
    O: FnOnce() -> S,
    S: ObserveStream,
{
    let Exchange { request, opener } = exchange;

    let resource = match inner.routes.recognize(request.path()) {
        Ok(matched) => **matched.handler(),
        Err(_) => {
            debug!(path = request.path(), "No route");
            return Dispatched::Reply(Error::routing(request.path()).into_response());
        }
    };

    if request.method() != RequestType::Get {
        debug!(path = request.path(), method = ?request.method(), "Method not allowed");
        let error = Error::Method {
            allowed: "GET".to_string(),
        };
        return Dispatched::Reply(error.into_response());
    }

    let result = match resource {
        Resource::Discovery => negotiate(request.accept(), &[MediaType::LinkFormat])
            .map(|_| inner.builder.link_format()),
        Resource::Device => negotiate(request.accept(), RDF_FORMATS)
            .map(|format| inner.builder.device(&inner.device, format)),
        Resource::Sensor => {
            let format = match negotiate(request.accept(), RDF_FORMATS) {
                Ok(format) => format,
                Err(e) => return Dispatched::Reply(e.into_response()),
            };

            if request.observe() == Some(ObserveOption::Register) {
                return match inner.sensor.register_observer(opener(), format).await {
                    Ok(handle) => Dispatched::Observing(handle),
                    Err(e) => {
                        debug!(error = %e, "Observe registration ended early");
                        Dispatched::Closed
                    }
                };
            }
            inner.sensor.handle_one_shot(format)
        }
    };

    Dispatched::Reply(result.into_response())
}

impl<O, S> Service<Exchange<O>> for Dispatcher
where
    O: FnOnce() -> S + Send + 'static,
    S: ObserveStream,
{
    type Response = Dispatched;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Dispatched, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, exchange: Exchange<O>) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        let path = exchange.request.path().to_string();

        Box::pin(async move {
            match AssertUnwindSafe(dispatch(inner, exchange)).catch_unwind().await {
                Ok(dispatched) => Ok(dispatched),
                Err(_) => {
                    error!(%path, "Handler panicked");
                    let error = Error::internal("request handler failed");
                    Ok(Dispatched::Reply(error.into_response()))
                }
            }
        })
    }
}
