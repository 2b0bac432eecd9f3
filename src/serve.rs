//! CoAP over UDP transport
//!
//! Receives datagrams, hands requests to the [`Dispatcher`] and writes the
//! replies. Observe registrations get a [`UdpObserveStream`] bound to the
//! client's endpoint and token; the first notification is the (piggybacked)
//! response to the registration, later ones are non-confirmable messages
//! carrying an increasing Observe sequence number.

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use coap_lite::{
    CoapOption, CoapRequest, CoapResponse, MessageClass, MessageType, Packet, ResponseType,
    option_value::OptionValueU16,
};
use tokio::{net::UdpSocket, sync::watch};
use tower::ServiceExt;
use tracing::{debug, info, trace, warn};

use crate::{
    error::{Error, Result},
    observer::ObserveStream,
    representation::{MediaType, Representation},
    router::{Dispatched, Dispatcher, Exchange, IncomingRequest, IntoResponse, Response},
};

const BUF_SIZE: usize = 8192;

/// Observe sequence numbers are 24 bits wide
const OBSERVE_SEQUENCE_MASK: u32 = 0x00FF_FFFF;

/// Serves `dispatcher` on `socket` until `shutdown` resolves.
///
/// Open observe sessions are closed on the way out.
pub async fn serve<F>(socket: UdpSocket, dispatcher: Dispatcher, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local = socket.local_addr()?;
    let socket = Arc::new(socket);
    let sessions = Arc::new(Sessions::default());
    let message_ids = Arc::new(MessageIds::random());
    let mut buf = vec![0u8; BUF_SIZE];

    debug!(%local, "Receive loop started");
    tokio::pin!(shutdown);

    loop {
        let (len, peer) = tokio::select! {
            _ = &mut shutdown => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    continue;
                }
            },
        };

        let packet = match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%peer, error = ?e, "Dropping undecodable datagram");
                continue;
            }
        };

        match packet.header.get_type() {
            MessageType::Reset => {
                if sessions.reset(peer, packet.header.message_id) {
                    debug!(%peer, "Observer reset a notification");
                }
                continue;
            }
            MessageType::Acknowledgement => continue,
            MessageType::Confirmable | MessageType::NonConfirmable => {}
        }
        if !matches!(packet.header.code, MessageClass::Request(_)) {
            trace!(%peer, "Ignoring non-request message");
            continue;
        }

        let Some(mut skeleton) = CoapResponse::new(&packet).map(|response| response.message)
        else {
            continue;
        };
        if skeleton.header.get_type() == MessageType::NonConfirmable {
            skeleton.header.message_id = message_ids.next();
        }
        skeleton.payload.clear();

        let request = IncomingRequest::from(CoapRequest::from_packet(packet, peer));
        let key = SessionKey {
            peer,
            token: request.message.get_token().to_vec(),
        };
        // Any Observe option replaces or ends what this token observed so far
        if request.observe().is_some() && sessions.close(&key) {
            debug!(%peer, "Previous observe session closed");
        }
        trace!(%peer, path = request.path(), method = ?request.method(), "Request");

        let opener = {
            let socket = Arc::clone(&socket);
            let sessions = Arc::clone(&sessions);
            let message_ids = Arc::clone(&message_ids);
            let skeleton = skeleton.clone();
            move || UdpObserveStream::open(key, skeleton, socket, sessions, message_ids)
        };

        let dispatcher = dispatcher.clone();
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let dispatched = match dispatcher.oneshot(Exchange::new(request, opener)).await {
                Ok(dispatched) => dispatched,
                Err(never) => match never {},
            };

            match dispatched {
                Dispatched::Reply(response) => {
                    let packet = response_packet(skeleton, &response, None);
                    if let Err(e) = send_packet(&socket, &packet, peer).await {
                        warn!(%peer, error = %e, "Reply failed");
                    }
                }
                Dispatched::Observing(handle) => {
                    debug!(%peer, observer = %handle.id(), "Observation started");
                }
                Dispatched::Closed => {}
            }
        });
    }

    let closed = sessions.close_all();
    info!(%local, sessions = closed, "Server stopped");
    Ok(())
}

/// Builds the response message for `response` on top of `skeleton`.
pub fn response_packet(mut skeleton: Packet, response: &Response, observe: Option<u32>) -> Packet {
    skeleton.header.code = MessageClass::Response(response.status);
    if let Some(sequence) = observe {
        skeleton.set_observe_value(sequence);
    }
    if let Some(format) = response.content_format {
        skeleton.add_option_as(CoapOption::ContentFormat, OptionValueU16(format.code()));
    }
    skeleton.payload = response.payload.clone();
    skeleton
}

async fn send_packet(socket: &UdpSocket, packet: &Packet, peer: SocketAddr) -> Result<()> {
    let bytes = packet
        .to_bytes()
        .map_err(|e| Error::transport(format!("cannot encode message: {e:?}")))?;
    socket
        .send_to(&bytes, peer)
        .await
        .map_err(|e| Error::transport(e.to_string()))?;
    Ok(())
}

struct MessageIds(AtomicU16);

impl MessageIds {
    fn random() -> Self {
        Self(AtomicU16::new(rand::random()))
    }

    fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    peer: SocketAddr,
    token: Vec<u8>,
}

struct Session {
    generation: u64,
    closed: watch::Sender<bool>,
    last_message_id: Option<u16>,
}

/// Open observe sessions keyed by client endpoint and token
#[derive(Default)]
struct Sessions {
    next_generation: AtomicU64,
    entries: Mutex<HashMap<SessionKey, Session>>,
}

impl Sessions {
    fn entries(&self) -> MutexGuard<'_, HashMap<SessionKey, Session>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, key: SessionKey) -> (u64, watch::Receiver<bool>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (closed, receiver) = watch::channel(false);
        let session = Session {
            generation,
            closed,
            last_message_id: None,
        };
        if let Some(previous) = self.entries().insert(key, session) {
            previous.closed.send_replace(true);
        }
        (generation, receiver)
    }

    fn close(&self, key: &SessionKey) -> bool {
        match self.entries().remove(key) {
            Some(session) => {
                session.closed.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Closes the session whose last notification had `message_id`.
    fn reset(&self, peer: SocketAddr, message_id: u16) -> bool {
        let mut entries = self.entries();
        let key = entries
            .iter()
            .find(|(key, session)| {
                key.peer == peer && session.last_message_id == Some(message_id)
            })
            .map(|(key, _)| key.clone());

        match key.and_then(|key| entries.remove(&key)) {
            Some(session) => {
                session.closed.send_replace(true);
                true
            }
            None => false,
        }
    }

    fn record(&self, key: &SessionKey, generation: u64, message_id: u16) {
        if let Some(session) = self.entries().get_mut(key)
            && session.generation == generation
        {
            session.last_message_id = Some(message_id);
        }
    }

    /// Forgets a session once its stream is gone, unless it was replaced.
    fn remove(&self, key: &SessionKey, generation: u64) {
        let mut entries = self.entries();
        if entries
            .get(key)
            .is_some_and(|session| session.generation == generation)
        {
            entries.remove(key);
        }
    }

    fn close_all(&self) -> usize {
        let drained: Vec<Session> = self.entries().drain().map(|(_, session)| session).collect();
        for session in &drained {
            session.closed.send_replace(true);
        }
        drained.len()
    }
}

/// Observe stream of one client over UDP
struct UdpObserveStream {
    key: SessionKey,
    generation: u64,
    closed: watch::Receiver<bool>,
    skeleton: Packet,
    first: AtomicBool,
    sequence: AtomicU32,
    socket: Arc<UdpSocket>,
    sessions: Arc<Sessions>,
    message_ids: Arc<MessageIds>,
}

impl UdpObserveStream {
    fn open(
        key: SessionKey,
        skeleton: Packet,
        socket: Arc<UdpSocket>,
        sessions: Arc<Sessions>,
        message_ids: Arc<MessageIds>,
    ) -> Self {
        let (generation, closed) = sessions.open(key.clone());
        Self {
            key,
            generation,
            closed,
            skeleton,
            first: AtomicBool::new(true),
            sequence: AtomicU32::new(1),
            socket,
            sessions,
            message_ids,
        }
    }

    fn notification_skeleton(&self) -> Packet {
        if self.first.swap(false, Ordering::AcqRel) {
            return self.skeleton.clone();
        }
        let mut packet = Packet::new();
        packet.header.set_version(1);
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.message_id = self.message_ids.next();
        packet.set_token(self.key.token.clone());
        packet
    }
}

#[async_trait]
impl ObserveStream for UdpObserveStream {
    async fn send(&self, representation: &Representation) -> Result<()> {
        let packet = self.notification_skeleton();
        let message_id = packet.header.message_id;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) & OBSERVE_SEQUENCE_MASK;
        let response = representation.clone().into_response();

        // Recorded first so a reset racing the send still matches
        self.sessions
            .record(&self.key, self.generation, message_id);
        send_packet(
            &self.socket,
            &response_packet(packet, &response, Some(sequence)),
            self.key.peer,
        )
        .await?;
        trace!(peer = %self.key.peer, sequence, "Notification sent");
        Ok(())
    }

    async fn reject(&self, error: &Error) {
        let response = Response {
            status: error.status(),
            content_format: Some(MediaType::TextPlain),
            payload: error.to_string().into_bytes(),
        };
        let packet = response_packet(self.skeleton.clone(), &response, None);
        if let Err(e) = send_packet(&self.socket, &packet, self.key.peer).await {
            warn!(peer = %self.key.peer, error = %e, "Rejection failed");
        }
    }

    async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for UdpObserveStream {
    fn drop(&mut self) {
        self.sessions.remove(&self.key, self.generation);
    }
}

/// Status of a response packet, if it is one
pub fn response_status(packet: &Packet) -> Option<ResponseType> {
    match packet.header.code {
        MessageClass::Response(status) => Some(status),
        _ => None,
    }
}
