use std::fmt;

/// Content formats the provider knows about, with their CoAP numbers
///
/// RDF formats use the numbers this family of devices has always announced
/// (201 to 203); they are not IANA registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    TextPlain,
    LinkFormat,
    Xml,
    Json,
    RdfXml,
    Turtle,
    N3,
}

impl MediaType {
    /// Numeric Content-Format / Accept value
    pub fn code(self) -> u16 {
        match self {
            MediaType::TextPlain => 0,
            MediaType::LinkFormat => 40,
            MediaType::Xml => 41,
            MediaType::Json => 50,
            MediaType::RdfXml => 201,
            MediaType::Turtle => 202,
            MediaType::N3 => 203,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(MediaType::TextPlain),
            40 => Some(MediaType::LinkFormat),
            41 => Some(MediaType::Xml),
            50 => Some(MediaType::Json),
            201 => Some(MediaType::RdfXml),
            202 => Some(MediaType::Turtle),
            203 => Some(MediaType::N3),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            MediaType::TextPlain => "text/plain",
            MediaType::LinkFormat => "application/link-format",
            MediaType::Xml => "application/xml",
            MediaType::Json => "application/json",
            MediaType::RdfXml => "application/rdf+xml",
            MediaType::Turtle => "text/turtle",
            MediaType::N3 => "text/n3",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}
