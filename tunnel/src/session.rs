use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex, Notify};
use uuid::Uuid;

use crate::error::Error;

/// Identifies a logical stream within a channel.
///
/// `Listener` is the one session per channel created by [`crate::Tunnel::listen`];
/// every other session on that channel is a `Stream` keyed by its wire session
/// id, so the map lookup in the inbound demultiplexer is an exhaustive match
/// rather than a `"listener"` string-literal convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Listener { channel: String },
    Stream { channel: String, id: String },
}

impl SessionKey {
    pub fn channel(&self) -> &str {
        match self {
            SessionKey::Listener { channel } | SessionKey::Stream { channel, .. } => channel,
        }
    }

    /// The wire `Micro-Tunnel-Session` value for this key.
    pub fn wire_session_id(&self) -> &str {
        match self {
            SessionKey::Listener { .. } => crate::message::LISTENER_SESSION_ID,
            SessionKey::Stream { id, .. } => id,
        }
    }
}

/// A delivered inbound message, with the link metadata the demultiplexer
/// observed (needed by a listener's dispatch task to key new sessions; an
/// ordinary stream session only ever looks at `body`).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub remote: String,
    pub wire_session_id: String,
    /// Whether this delivery arrived over a loopback link.
    pub loopback: bool,
}

/// An outbound message queued for the fan-out task.
pub(crate) struct Outbound {
    pub key: SessionKey,
    pub outbound: bool,
    pub loopback: bool,
    /// If set, fan-out sends only to the link with this id and reports
    /// "link not found" for every other one.
    pub link_id: Option<Uuid>,
    pub body: Vec<u8>,
    pub reply: oneshot::Sender<Result<(), Error>>,
}

const RECV_QUEUE_CAPACITY: usize = 128;

/// A logical, bidirectional stream multiplexed over a [`crate::Tunnel`]'s links.
pub struct Session {
    pub key: SessionKey,
    pub outbound: bool,
    /// Whether this session was accepted over a loopback link; its replies
    /// must then go out only over that link.
    loopback: bool,
    remote: std::sync::Mutex<String>,
    first_message_tx: watch::Sender<bool>,
    first_message_rx: watch::Receiver<bool>,
    recv_tx: mpsc::Sender<Delivery>,
    recv_rx: AsyncMutex<mpsc::Receiver<Delivery>>,
    send_tx: mpsc::UnboundedSender<Outbound>,
    closed: Arc<Notify>,
    is_closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        key: SessionKey,
        outbound: bool,
        initial_remote: String,
        loopback: bool,
        send_tx: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<Self> {
        let (recv_tx, recv_rx) = mpsc::channel(RECV_QUEUE_CAPACITY);
        let (first_message_tx, first_message_rx) = watch::channel(false);
        Arc::new(Self {
            key,
            outbound,
            loopback,
            remote: std::sync::Mutex::new(initial_remote),
            first_message_tx,
            first_message_rx,
            recv_tx,
            recv_rx: AsyncMutex::new(recv_rx),
            send_tx,
            closed: Arc::new(Notify::new()),
            is_closed: AtomicBool::new(false),
        })
    }

    pub fn remote(&self) -> String {
        self.remote.lock().unwrap().clone()
    }

    /// Blocks until the first inbound message has set `remote` from the link.
    pub async fn wait(&self) {
        let mut rx = self.first_message_rx.clone();
        let _ = rx.wait_for(|set| *set).await;
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
        self.closed.notify_waiters();
    }

    pub async fn send(&self, body: Vec<u8>) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let (reply, reply_rx) = oneshot::channel();
        self.send_tx
            .send(Outbound {
                key: self.key.clone(),
                outbound: self.outbound,
                loopback: self.loopback,
                link_id: None,
                body,
                reply,
            })
            .map_err(|_| Error::TunnelClosed)?;
        reply_rx.await.map_err(|_| Error::TunnelClosed)?
    }

    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.recv_delivery().await.map(|d| d.body)
    }

    pub(crate) async fn recv_delivery(&self) -> Option<Delivery> {
        self.recv_rx.lock().await.recv().await
    }

    /// Sets `remote` the first time this is called, signalling [`Self::wait`].
    /// Subsequent calls are no-ops: only the first inbound message updates
    /// the session's display remote.
    pub(crate) fn note_inbound_remote(&self, remote: String) {
        if !*self.first_message_rx.borrow() {
            *self.remote.lock().unwrap() = remote;
            let _ = self.first_message_tx.send(true);
        }
    }

    /// Best-effort enqueue into the bounded recv queue; drops silently on `Full`.
    pub(crate) fn try_deliver(&self, delivery: Delivery) -> bool {
        self.recv_tx.try_send(delivery).is_ok()
    }
}

/// Server-side sessions accepted on a listening channel.
pub struct Listener {
    channel: String,
    accept_rx: mpsc::Receiver<Arc<Session>>,
}

impl Listener {
    pub(crate) fn new(channel: String, accept_rx: mpsc::Receiver<Arc<Session>>) -> Self {
        Self { channel, accept_rx }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn accept(&mut self) -> Option<Arc<Session>> {
        self.accept_rx.recv().await
    }
}

pub(crate) fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_session_id_reserves_listener_literal() {
        let listener = SessionKey::Listener { channel: "rpc".into() };
        assert_eq!(listener.wire_session_id(), "listener");
        assert_eq!(listener.channel(), "rpc");

        let stream = SessionKey::Stream { channel: "rpc".into(), id: "abc".into() };
        assert_eq!(stream.wire_session_id(), "abc");
    }

    #[tokio::test]
    async fn note_inbound_remote_only_sets_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(
            SessionKey::Stream { channel: "rpc".into(), id: "abc".into() },
            true,
            "placeholder".into(),
            false,
            tx,
        );
        session.note_inbound_remote("1.2.3.4:9000".into());
        session.note_inbound_remote("5.6.7.8:9000".into());
        assert_eq!(session.remote(), "1.2.3.4:9000");
    }

    #[tokio::test]
    async fn send_on_a_loopback_accepted_session_flags_the_outbound_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(
            SessionKey::Stream { channel: "rpc".into(), id: "abc".into() },
            false,
            "placeholder".into(),
            true,
            tx,
        );
        let send = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.send(b"pong".to_vec()).await }
        });
        let queued = rx.recv().await.expect("send queues an Outbound");
        assert!(queued.loopback, "a session accepted over a loopback link must flag its replies loopback");
        assert!(!queued.outbound);
        let _ = queued.reply.send(Ok(()));
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn try_deliver_drops_when_queue_full() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(
            SessionKey::Stream { channel: "rpc".into(), id: "abc".into() },
            true,
            String::new(),
            false,
            tx,
        );
        let mut delivered = 0;
        for _ in 0..(RECV_QUEUE_CAPACITY + 10) {
            if session.try_deliver(Delivery {
                body: vec![1],
                remote: "r".into(),
                wire_session_id: "abc".into(),
                loopback: false,
            }) {
                delivered += 1;
            }
        }
        assert_eq!(delivered, RECV_QUEUE_CAPACITY);
    }
}
