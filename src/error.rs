//! Error types for the sensor provider
//!
//! Every client-facing failure maps onto a CoAP response code and a one-line
//! plain-text diagnostic, see [`Error::status`].

use coap_lite::ResponseType;
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while serving requests, reading the feed or talking to the registry
#[derive(Error, Debug)]
pub enum Error {
    /// No route matches the requested path
    #[error("Resource not found: {path}")]
    Routing { path: String },

    /// The route exists but does not accept the request method
    #[error("Methods other than {allowed} are disallowed")]
    Method { allowed: String },

    /// The Accept option names a format the route cannot produce
    #[error("Accept header must be {expected}")]
    Negotiation { expected: String },

    /// The value source has not produced a reading yet
    #[error("No data available")]
    DataUnavailable,

    /// A record from the external feed could not be parsed
    #[error("Malformed feed record: {reason}")]
    MalformedInput { reason: String },

    /// Sending on an observe stream or to the registry failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A handler failed in an unexpected way
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Invalid startup configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a routing error for `path`
    pub fn routing<S: Into<String>>(path: S) -> Self {
        Self::Routing { path: path.into() }
    }

    /// Create a malformed input error
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedInput {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The CoAP response code a client sees for this error
    pub fn status(&self) -> ResponseType {
        match self {
            Error::Routing { .. } | Error::DataUnavailable => ResponseType::NotFound,
            Error::Method { .. } => ResponseType::MethodNotAllowed,
            Error::Negotiation { .. } => ResponseType::UnsupportedContentFormat,
            Error::MalformedInput { .. } => ResponseType::BadRequest,
            Error::Transport { .. } => ResponseType::ServiceUnavailable,
            Error::Internal { .. } | Error::Config { .. } | Error::Io(_) => {
                ResponseType::InternalServerError
            }
        }
    }
}
