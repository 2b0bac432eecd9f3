//! Test utilities for building requests and observing streams
//!
//! Shared by unit tests and the integration tests under `tests/` (through the
//! `test-utils` feature).

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use coap_lite::{
    CoapOption, CoapRequest, MessageType, ObserveOption, Packet, RequestType,
    option_value::OptionValueU16,
};
use tokio::sync::{mpsc, watch};

use crate::{
    error::{Error, Result},
    observer::ObserveStream,
    representation::Representation,
    router::IncomingRequest,
};

/// Address test requests appear to come from
pub fn test_peer() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 40000))
}

/// Build a confirmable request with optional Accept and Observe options
pub fn request_with(
    method: RequestType,
    path: &str,
    accept: Option<u16>,
    observe: Option<ObserveOption>,
) -> IncomingRequest {
    let mut request = CoapRequest::from_packet(Packet::new(), test_peer());
    request.message.header.set_type(MessageType::Confirmable);
    request.message.header.message_id = 0x1234;
    request.message.set_token(vec![0x51, 0x52]);
    request.set_method(method);
    request.set_path(path);
    if let Some(code) = accept {
        request
            .message
            .add_option_as(CoapOption::Accept, OptionValueU16(code));
    }
    if let Some(flag) = observe {
        request.set_observe_flag(flag);
    }
    request.into()
}

/// Create a GET request for the given path
pub fn get(path: &str) -> IncomingRequest {
    request_with(RequestType::Get, path, None, None)
}

/// Create a GET request with an Accept option
pub fn get_accept(path: &str, accept: u16) -> IncomingRequest {
    request_with(RequestType::Get, path, Some(accept), None)
}

/// Create an observe registration for the given path
pub fn observe(path: &str) -> IncomingRequest {
    request_with(
        RequestType::Get,
        path,
        None,
        Some(ObserveOption::Register),
    )
}

struct Shared {
    closed: watch::Sender<bool>,
    dropped: watch::Sender<bool>,
    fail: AtomicBool,
    sent: AtomicUsize,
    writes_after_close: AtomicUsize,
    rejection: Mutex<Option<String>>,
}

/// In-memory [`ObserveStream`]; the paired [`StreamTap`] inspects and drives it.
pub struct MockStream {
    shared: Arc<Shared>,
    notifications: mpsc::UnboundedSender<Representation>,
}

/// Test side of a [`MockStream`]
pub struct StreamTap {
    shared: Arc<Shared>,
    notifications: mpsc::UnboundedReceiver<Representation>,
}

impl MockStream {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MockStream, StreamTap) {
        let (closed, _) = watch::channel(false);
        let (dropped, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            closed,
            dropped,
            fail: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
            writes_after_close: AtomicUsize::new(0),
            rejection: Mutex::new(None),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        (
            MockStream {
                shared: Arc::clone(&shared),
                notifications: tx,
            },
            StreamTap {
                shared,
                notifications: rx,
            },
        )
    }
}

#[async_trait]
impl ObserveStream for MockStream {
    async fn send(&self, representation: &Representation) -> Result<()> {
        if *self.shared.closed.borrow() {
            self.shared.writes_after_close.fetch_add(1, Ordering::SeqCst);
        }
        if self.shared.fail.load(Ordering::SeqCst) {
            return Err(Error::transport("mock stream refused the write"));
        }
        self.shared.sent.fetch_add(1, Ordering::SeqCst);
        let _ = self.notifications.send(representation.clone());
        Ok(())
    }

    async fn reject(&self, error: &Error) {
        *self
            .shared
            .rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    async fn closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.shared.dropped.send_replace(true);
    }
}

impl StreamTap {
    /// Next notification, `None` once the stream is gone and drained
    pub async fn next(&mut self) -> Option<Representation> {
        self.notifications.recv().await
    }

    /// A notification that has already arrived, if any
    pub fn try_next(&mut self) -> Option<Representation> {
        self.notifications.try_recv().ok()
    }

    /// Ends the session from the client side
    pub fn close(&self) {
        self.shared.closed.send_replace(true);
    }

    /// Makes every following write fail
    pub fn fail_sends(&self) {
        self.shared.fail.store(true, Ordering::SeqCst);
    }

    /// Waits until the stream has been dropped by its owner
    pub async fn dropped(&self) {
        let mut dropped = self.shared.dropped.subscribe();
        let _ = dropped.wait_for(|dropped| *dropped).await;
    }

    pub fn is_dropped(&self) -> bool {
        *self.shared.dropped.borrow()
    }

    pub fn sent(&self) -> usize {
        self.shared.sent.load(Ordering::SeqCst)
    }

    pub fn writes_after_close(&self) -> usize {
        self.shared.writes_after_close.load(Ordering::SeqCst)
    }

    /// Diagnostic of the error the stream was rejected with
    pub fn rejection(&self) -> Option<String> {
        self.shared
            .rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
