use async_trait::async_trait;

use crate::{error::Error, error::Result, representation::Representation};

/// The open response stream of one observing client
///
/// A stream is owned by its observer's delivery task from registration until
/// the observation ends; it is dropped right after, which is what closes the
/// session on the transport side.
#[async_trait]
pub trait ObserveStream: Send + Sync + 'static {
    /// Writes one notification. An error ends the observation.
    async fn send(&self, representation: &Representation) -> Result<()>;

    /// Answers the registration with an error instead of a representation.
    /// The stream is dropped afterwards without being registered.
    async fn reject(&self, error: &Error);

    /// Resolves once the transport session has ended (client deregistered,
    /// reset a notification, or the server is shutting down).
    async fn closed(&self);
}
