//! Self-registration with a resource registry
//!
//! On startup the provider POSTs once to the registry so the registry can
//! come back and crawl `/.well-known/core`. The request carries no payload;
//! the registry's answer is handed back to the caller.

use std::{fmt, net::SocketAddr, time::Duration};

use coap_lite::{CoapRequest, MessageClass, MessageType, Packet, RequestType, ResponseType};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::UdpSocket,
};
use tracing::{debug, info};
use url::{Host, Url};

use crate::error::{Error, Result};

/// Port used when the registry URL has none
pub const DEFAULT_PORT: u16 = 5683;
/// Path used when the registry URL has none
pub const DEFAULT_PATH: &str = "/registry";
/// How long to wait for the registry's answer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const BUF_SIZE: usize = 8192;

/// Where to register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RegistryTarget {
    /// Parses `coap://host[:port][/path]`; the scheme may be omitted.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("coap://{input}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| Error::config(format!("invalid registry URL '{input}': {e}")))?;
        if url.scheme() != "coap" {
            return Err(Error::config(format!(
                "unsupported registry scheme '{}'",
                url.scheme()
            )));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(address)) => address.to_string(),
            Some(Host::Ipv6(address)) => address.to_string(),
            None => return Err(Error::config(format!("registry URL '{input}' has no host"))),
        };
        let path = match url.path() {
            "" | "/" => DEFAULT_PATH.to_string(),
            path => path.to_string(),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            path,
        })
    }

    /// Resolves the host to a socket address.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| Error::config(format!("registry host '{}' did not resolve", self.host)))
    }
}

impl fmt::Display for RegistryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}{}", self.host, self.port, self.path)
        } else {
            write!(f, "{}:{}{}", self.host, self.port, self.path)
        }
    }
}

/// Registers at `target` and returns the payload of the registry's answer.
///
/// Sends a confirmable POST and waits up to `timeout` for either a
/// piggybacked or a separate response. Error responses and resets fail the
/// registration.
pub async fn announce(target: &RegistryTarget, timeout: Duration) -> Result<Vec<u8>> {
    let registry = target.resolve().await?;
    let bind: SocketAddr = if registry.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(registry).await?;

    let message_id: u16 = rand::random();
    let token = rand::random::<u32>().to_be_bytes().to_vec();

    let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
    request.message.header.set_type(MessageType::Confirmable);
    request.message.header.message_id = message_id;
    request.message.set_token(token.clone());
    request.set_method(RequestType::Post);
    request.set_path(&target.path);

    let bytes = request
        .message
        .to_bytes()
        .map_err(|e| Error::transport(format!("cannot encode registration: {e:?}")))?;

    info!("Registering at {target}");
    socket.send(&bytes).await?;

    tokio::time::timeout(timeout, await_response(&socket, message_id, &token))
        .await
        .map_err(|_| {
            Error::transport(format!(
                "registry did not answer within {}s",
                timeout.as_secs_f32()
            ))
        })?
}

async fn await_response(socket: &UdpSocket, message_id: u16, token: &[u8]) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let len = socket.recv(&mut buf).await?;
        let Ok(packet) = Packet::from_bytes(&buf[..len]) else {
            debug!("Ignoring undecodable datagram from registry");
            continue;
        };

        match packet.header.get_type() {
            MessageType::Reset if packet.header.message_id == message_id => {
                return Err(Error::transport("registry reset the registration"));
            }
            MessageType::Acknowledgement if packet.header.message_id == message_id => {
                if packet.header.code == MessageClass::Empty {
                    debug!("Registration acknowledged, awaiting separate response");
                    continue;
                }
                return payload(packet);
            }
            MessageType::Confirmable | MessageType::NonConfirmable
                if packet.get_token() == token =>
            {
                if packet.header.get_type() == MessageType::Confirmable {
                    let mut ack = Packet::new();
                    ack.header.set_type(MessageType::Acknowledgement);
                    ack.header.message_id = packet.header.message_id;
                    ack.header.code = MessageClass::Empty;
                    if let Ok(bytes) = ack.to_bytes() {
                        socket.send(&bytes).await?;
                    }
                }
                return payload(packet);
            }
            _ => continue,
        }
    }
}

fn payload(packet: Packet) -> Result<Vec<u8>> {
    match packet.header.code {
        MessageClass::Response(
            ResponseType::Created
            | ResponseType::Deleted
            | ResponseType::Valid
            | ResponseType::Changed
            | ResponseType::Content,
        ) => Ok(packet.payload),
        MessageClass::Response(status) => Err(Error::transport(format!(
            "registry answered {status:?}"
        ))),
        other => Err(Error::transport(format!(
            "unexpected message from registry: {other:?}"
        ))),
    }
}

/// Writes the registry's answer to `out` and flushes it.
pub async fn write_response<W>(out: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(payload).await?;
    out.flush().await?;
    Ok(())
}
