//! Semantic sensor provider over CoAP
//!
//! Serves a sensor reading as an observable CoAP resource described in RDF,
//! a device description and a CoRE link-format discovery document, and
//! announces itself to a resource registry.

pub mod config;
pub mod device;
pub mod error;
pub mod observer;
pub mod rdf;
pub mod registry;
pub mod representation;
pub mod router;
pub mod serve;
pub mod source;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use device::{DeviceDescriptor, SensorNaming};
pub use error::{Error, Result};
pub use observer::{ObservableResource, ObserveStream, ObserverHandle, ObserverId};
pub use representation::{MediaType, Representation, RepresentationBuilder};
pub use router::{Dispatched, Dispatcher, Exchange, IncomingRequest, IntoResponse, Response};
pub use source::{FeedSource, Reading, ReadingValue, SimulatedSource, ValueSource};

// Re-export CoAP types
pub use coap_lite::{
    CoapOption, CoapRequest, CoapResponse, MessageClass, MessageType, ObserveOption, Packet,
    RequestType, ResponseType, option_value,
};
