//! Payloads for the provider's resources
//!
//! [`RepresentationBuilder`] turns a [`Reading`] or the [`DeviceDescriptor`]
//! into a fixed set of triples and serializes them; it also renders the CoRE
//! link-format discovery document.

use time::{OffsetDateTime, UtcOffset, macros::format_description};

use crate::{
    device::{DeviceDescriptor, SensorNaming},
    rdf::{Prefixes, Term, Triple, XSD, to_turtle},
    source::{Reading, ReadingValue},
};

pub mod media;

pub use media::MediaType;

/// Formats an RDF resource can be negotiated to
pub const RDF_FORMATS: &[MediaType] = &[MediaType::Turtle, MediaType::N3];

/// A serialized resource body with its content format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    pub content_format: MediaType,
    pub payload: Vec<u8>,
}

impl Representation {
    pub fn new(content_format: MediaType, payload: Vec<u8>) -> Self {
        Self {
            content_format,
            payload,
        }
    }

    /// The payload as text, for logging and tests
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Renders a timestamp as ISO-8601 UTC with millisecond precision.
pub fn iso8601(timestamp: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    let utc = timestamp.to_offset(UtcOffset::UTC);
    utc.format(&format).unwrap_or_else(|_| utc.to_string())
}

/// Rounds to one decimal place and renders with exactly one fractional digit.
pub fn one_decimal(value: f64) -> String {
    format!("{:.1}", (value * 10.0).round() / 10.0)
}

/// Builds representations for the device, the sensor and discovery
#[derive(Debug, Clone)]
pub struct RepresentationBuilder {
    prefixes: Prefixes,
    naming: SensorNaming,
}

impl RepresentationBuilder {
    pub fn new(prefixes: Prefixes, naming: SensorNaming) -> Self {
        Self { prefixes, naming }
    }

    pub fn naming(&self) -> &SensorNaming {
        &self.naming
    }

    pub fn prefixes(&self) -> &Prefixes {
        &self.prefixes
    }

    /// lastModified, hasStatus and hasValue for `reading`
    pub fn sensor_triples(&self, reading: &Reading) -> Vec<Triple> {
        let naming = &self.naming;
        let sensor = naming.sensor_iri();
        let status = naming.status_iri();

        let value = match reading.value() {
            ReadingValue::Number(value) => Term::typed(one_decimal(*value), format!("{XSD}float")),
            ReadingValue::Text(text) => Term::literal(text.clone()),
        };

        vec![
            Triple::new(
                &sensor,
                naming.predicate("lastModified"),
                Term::typed(iso8601(reading.timestamp()), format!("{XSD}dateTime")),
            ),
            Triple::new(&sensor, naming.predicate("hasStatus"), Term::iri(&status)),
            Triple::new(status, naming.predicate("hasValue"), value),
        ]
    }

    /// hasLabel, hasGroup, one hasIP per address and hasSensor
    pub fn device_triples(&self, device: &DeviceDescriptor) -> Vec<Triple> {
        let naming = &self.naming;
        let subject = naming.device_iri();

        let mut triples = vec![
            Triple::new(
                &subject,
                naming.predicate("hasLabel"),
                Term::literal(device.label()),
            ),
            Triple::new(
                &subject,
                naming.predicate("hasGroup"),
                Term::literal(device.group()),
            ),
        ];
        triples.extend(device.addresses().iter().map(|address| {
            Triple::new(
                &subject,
                naming.predicate("hasIP"),
                Term::literal(address.to_string()),
            )
        }));
        triples.push(Triple::new(
            &subject,
            naming.predicate("hasSensor"),
            Term::iri(naming.sensor_iri()),
        ));
        triples
    }

    /// Sensor representation in `format` (Turtle syntax, valid for both RDF formats served)
    pub fn sensor(&self, reading: &Reading, format: MediaType) -> Representation {
        let payload = to_turtle(&self.sensor_triples(reading), &self.prefixes);
        Representation::new(format, payload)
    }

    pub fn device(&self, device: &DeviceDescriptor, format: MediaType) -> Representation {
        let payload = to_turtle(&self.device_triples(device), &self.prefixes);
        Representation::new(format, payload)
    }

    /// CoRE link-format listing of the device and the observable sensor
    pub fn link_format(&self) -> Representation {
        let turtle = MediaType::Turtle.code();
        let links = [
            format!(
                "</device>;ct={turtle};rt=\"{}\"",
                self.naming.device_iri()
            ),
            format!(
                "<{}>;obs;ct={turtle};rt=\"{}\"",
                self.naming.sensor_path(),
                self.naming.sensor_iri()
            ),
        ];
        Representation::new(MediaType::LinkFormat, links.join(",").into_bytes())
    }
}

impl Default for RepresentationBuilder {
    fn default() -> Self {
        let naming = SensorNaming::default();
        Self::new(Prefixes::standard(naming.base_iri()), naming)
    }
}
