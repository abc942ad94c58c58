use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::TunnelConfig;
use crate::error::Error;
use crate::link::Link;
use crate::message::{TunnelMessage, TunnelMessageType, LISTENER_SESSION_ID};
use crate::session::{new_session_id, Delivery, Listener, Outbound, Session, SessionKey};
use crate::transport::{Listener as TransportListener, Socket, Transport};

const ACCEPT_QUEUE_CAPACITY: usize = 32;

/// Construction parameters for a [`Tunnel`].
pub struct TunnelBuilder<T: Transport> {
    pub id: Uuid,
    pub token: String,
    pub address: SocketAddr,
    pub nodes: Vec<SocketAddr>,
    pub transport: T,
    pub config: TunnelConfig,
}

/// A session-multiplexed, authenticated peer tunnel.
///
/// Owns a pool of [`Link`]s (one per peer connection) and a map of
/// [`Session`]s (one per logical stream), fans outbound messages across
/// every connected, non-pinned link, and demultiplexes inbound messages by
/// `(channel, sessionId)`.
pub struct Tunnel<T: Transport> {
    id: Uuid,
    token: String,
    address: SocketAddr,
    transport: T,
    config: TunnelConfig,
    nodes: RwLock<Vec<SocketAddr>>,
    links: RwLock<HashMap<SocketAddr, Arc<Link<T::Socket>>>>,
    sessions: Arc<RwLock<HashMap<SessionKey, Arc<Session>>>>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    closed: std::sync::Mutex<Arc<Notify>>,
    running: std::sync::atomic::AtomicBool,
}

impl<T: Transport> Tunnel<T> {
    pub fn new(builder: TunnelBuilder<T>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: builder.id,
            token: builder.token,
            address: builder.address,
            transport: builder.transport,
            config: builder.config,
            nodes: RwLock::new(builder.nodes),
            links: RwLock::new(HashMap::new()),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            outbound_tx,
            outbound_rx: std::sync::Mutex::new(Some(outbound_rx)),
            closed: std::sync::Mutex::new(Arc::new(Notify::new())),
            running: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Replaces the configured node list; the reconnect monitor dials any
    /// addresses missing a link on its next tick.
    pub async fn set_nodes(&self, nodes: Vec<SocketAddr>) {
        *self.nodes.write().await = nodes;
    }

    fn closed_signal(&self) -> Arc<Notify> {
        self.closed.lock().unwrap().clone()
    }

    /// Binds the listener and starts the background tasks. Idempotent while
    /// already connected.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn connect(self: &Arc<Self>) -> Result<(), Error> {
        if self
            .running
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return Ok(());
        }
        *self.closed.lock().unwrap() = Arc::new(Notify::new());

        let listener = self
            .transport
            .listen(self.address)
            .await
            .map_err(|e| match e {
                Error::Transport(inner) => Error::Listen(inner),
                other => other,
            })?;

        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.accept_loop(listener).await }
        });

        let rx = self
            .outbound_rx
            .lock()
            .unwrap()
            .take()
            .expect("outbound receiver taken twice");
        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.fanout_loop(rx).await }
        });

        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.reconnect_monitor().await }
        });

        let nodes = self.nodes.read().await.clone();
        for addr in nodes {
            if let Err(e) = self.setup_link(addr).await {
                warn!(%addr, error = %e, "initial dial failed, leaving to reconnect monitor");
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn close(self: &Arc<Self>) -> Result<(), Error> {
        if !self
            .running
            .swap(false, std::sync::atomic::Ordering::AcqRel)
        {
            return Ok(());
        }
        self.closed_signal().notify_waiters();

        let sessions: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let values = sessions.values().cloned().collect();
            sessions.clear();
            values
        };
        for session in sessions {
            session.close();
        }

        let links: Vec<Arc<Link<T::Socket>>> = {
            let mut links = self.links.write().await;
            let values = links.values().cloned().collect();
            links.clear();
            values
        };
        for link in links {
            let msg = TunnelMessage {
                ty: TunnelMessageType::Close,
                tunnel_id: self.id,
                channel: None,
                session: None,
                token: self.token.clone(),
                body: Vec::new(),
            };
            let _ = link.send(msg).await;
        }

        Ok(())
    }

    /// Dials `addr`, sends the initial `Connect` handshake, and registers the
    /// link once the handshake has been sent.
    #[instrument(skip(self))]
    async fn setup_link(self: &Arc<Self>, addr: SocketAddr) -> Result<(), Error> {
        let socket = self.transport.dial(addr).await?;
        let link = Arc::new(Link::new(Uuid::new_v4(), socket));
        let msg = TunnelMessage {
            ty: TunnelMessageType::Connect,
            tunnel_id: self.id,
            channel: None,
            session: None,
            token: self.token.clone(),
            body: Vec::new(),
        };
        link.send(msg).await?;
        link.set_connected(true);
        link.touch_keep_alive();
        self.links.write().await.insert(addr, Arc::clone(&link));

        tokio::spawn({
            let this = Arc::clone(self);
            let link = Arc::clone(&link);
            async move { this.link_recv_loop(link).await }
        });
        tokio::spawn({
            let this = Arc::clone(self);
            let link = Arc::clone(&link);
            async move { this.keep_alive_loop(link).await }
        });

        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, mut listener: T::Listener) {
        let closed = self.closed_signal();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok(socket) => {
                            let link = Arc::new(Link::new(Uuid::new_v4(), socket));
                            tokio::spawn({
                                let this = Arc::clone(&self);
                                async move { this.link_recv_loop(link).await }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = closed.notified() => return,
            }
        }
    }

    /// Per-link inbound loop: validates the handshake token, then demultiplexes
    /// `Message` frames to the matching session, handles `Close`/`KeepAlive`.
    #[instrument(skip(self, link), fields(remote = %link.remote()))]
    async fn link_recv_loop(self: Arc<Self>, link: Arc<Link<T::Socket>>) {
        let closed = self.closed_signal();
        loop {
            let msg = tokio::select! {
                msg = link.recv() => msg,
                _ = closed.notified() => break,
            };

            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(error = %e, "link recv ended");
                    break;
                }
            };

            if msg.token != self.token {
                warn!(error = %Error::TokenMismatch, "dropping link");
                break;
            }

            match msg.ty {
                TunnelMessageType::Connect => {
                    link.set_connected(true);
                    link.touch_keep_alive();
                    if msg.tunnel_id == self.id {
                        link.set_loopback(true);
                    }
                    self.links.write().await.insert(link.remote(), Arc::clone(&link));
                }
                TunnelMessageType::Close => {
                    break;
                }
                TunnelMessageType::KeepAlive => {
                    link.touch_keep_alive();
                }
                TunnelMessageType::Message => {
                    if !link.is_connected() {
                        break;
                    }
                    self.demux(&link, msg).await;
                }
            }
        }

        self.links.write().await.remove(&link.remote());
    }

    async fn demux(&self, link: &Arc<Link<T::Socket>>, msg: TunnelMessage) {
        let Some(channel) = msg.channel.clone() else {
            return;
        };
        let wire_session_id = msg
            .session
            .clone()
            .unwrap_or_else(|| LISTENER_SESSION_ID.to_string());

        let target_key = if link.is_loopback() {
            SessionKey::Listener { channel: channel.clone() }
        } else {
            let stream_key = SessionKey::Stream {
                channel: channel.clone(),
                id: wire_session_id.clone(),
            };
            let exists = self.sessions.read().await.contains_key(&stream_key);
            if exists {
                stream_key
            } else {
                SessionKey::Listener { channel }
            }
        };

        let session = self.sessions.read().await.get(&target_key).cloned();
        let Some(session) = session else {
            return;
        };

        if session.is_closed() {
            self.sessions.write().await.remove(&target_key);
            return;
        }

        let remote = link.remote().to_string();
        session.note_inbound_remote(remote.clone());
        let delivered = session.try_deliver(Delivery {
            body: msg.body,
            remote,
            wire_session_id,
            loopback: link.is_loopback(),
        });
        if !delivered {
            debug!(channel = %target_key.channel(), "session recv queue full, dropping message");
        }
    }

    async fn keep_alive_loop(self: Arc<Self>, link: Arc<Link<T::Socket>>) {
        let closed = self.closed_signal();
        let mut ticker = tokio::time::interval(self.config.keep_alive);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let msg = TunnelMessage {
                        ty: TunnelMessageType::KeepAlive,
                        tunnel_id: self.id,
                        channel: None,
                        session: None,
                        token: self.token.clone(),
                        body: Vec::new(),
                    };
                    if let Err(e) = link.send(msg).await {
                        warn!(remote = %link.remote(), error = %e, "keepalive send failed");
                        self.links.write().await.remove(&link.remote());
                        return;
                    }
                }
                _ = closed.notified() => return,
            }
        }
    }

    async fn reconnect_monitor(self: Arc<Self>) {
        let closed = self.closed_signal();
        let mut ticker = tokio::time::interval(self.config.reconnect);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let nodes = self.nodes.read().await.clone();
                    let present: std::collections::HashSet<SocketAddr> =
                        self.links.read().await.keys().copied().collect();
                    for addr in nodes {
                        if !present.contains(&addr) {
                            if let Err(e) = self.setup_link(addr).await {
                                debug!(%addr, error = %e, "reconnect attempt failed");
                            }
                        }
                    }
                }
                _ = closed.notified() => return,
            }
        }
    }

    async fn fanout_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        let closed = self.closed_signal();
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => msg,
                _ = closed.notified() => return,
            };
            match msg {
                Some(msg) => self.dispatch_outbound(msg).await,
                None => return,
            }
        }
    }

    async fn dispatch_outbound(&self, msg: Outbound) {
        let snapshot: Vec<Arc<Link<T::Socket>>> = self.links.read().await.values().cloned().collect();

        enum Outcome {
            Sent,
            Skipped(Error),
            Failed(SocketAddr, Error),
        }

        let wire = TunnelMessage {
            ty: TunnelMessageType::Message,
            tunnel_id: self.id,
            channel: Some(msg.key.channel().to_string()),
            session: Some(msg.key.wire_session_id().to_string()),
            token: self.token.clone(),
            body: msg.body,
        };

        let attempts = snapshot.into_iter().map(|link| {
            let wire = wire.clone();
            let outbound = msg.outbound;
            let loopback = msg.loopback;
            let pinned = msg.link_id;
            async move {
                if !link.is_connected() {
                    return Outcome::Skipped(Error::LinkNotConnected);
                }
                if pinned.is_some_and(|id| id != link.id) {
                    return Outcome::Skipped(Error::LinkNotFound);
                }
                if link.is_loopback() && outbound {
                    return Outcome::Skipped(Error::LinkIsLoopback);
                }
                if loopback && !link.is_loopback() {
                    return Outcome::Skipped(Error::LinkIsNotLoopback);
                }
                match link.send(wire).await {
                    Ok(()) => Outcome::Sent,
                    Err(e) => Outcome::Failed(link.remote(), e),
                }
            }
        });

        let results = join_all(attempts).await;

        let mut any_sent = false;
        let mut last_error = Error::NoLinkAccepted;
        let mut failed = Vec::new();
        for outcome in results {
            match outcome {
                Outcome::Sent => any_sent = true,
                Outcome::Skipped(e) => last_error = e,
                Outcome::Failed(addr, e) => {
                    last_error = e;
                    failed.push(addr);
                }
            }
        }

        if !failed.is_empty() {
            let mut links = self.links.write().await;
            for addr in failed {
                links.remove(&addr);
            }
        }

        let result = if any_sent { Ok(()) } else { Err(last_error) };
        let _ = msg.reply.send(result);
    }

    /// Opens a fresh outbound session on `channel`.
    #[instrument(skip(self))]
    pub async fn dial(self: &Arc<Self>, channel: impl Into<String>) -> Result<Arc<Session>, Error> {
        let channel = channel.into();
        let key = SessionKey::Stream {
            channel: channel.clone(),
            id: new_session_id(),
        };
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(Error::DuplicateSession);
        }
        let session = Session::new(key.clone(), true, channel, false, self.outbound_tx.clone());
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Whether any currently registered link is a loopback link (its
    /// connect handshake's tunnel id matched our own).
    pub async fn has_loopback_link(&self) -> bool {
        self.links.read().await.values().any(|link| link.is_loopback())
    }

    /// Starts listening on `channel`. Only one listener per channel may be
    /// active at a time.
    #[instrument(skip(self))]
    pub async fn listen(self: &Arc<Self>, channel: impl Into<String>) -> Result<Listener, Error> {
        let channel = channel.into();
        let key = SessionKey::Listener { channel: channel.clone() };
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(Error::AlreadyListening);
        }
        let listener_session = Session::new(key.clone(), false, String::new(), false, self.outbound_tx.clone());
        sessions.insert(key, Arc::clone(&listener_session));
        drop(sessions);

        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_QUEUE_CAPACITY);
        tokio::spawn({
            let sessions = Arc::clone(&self.sessions);
            let outbound_tx = self.outbound_tx.clone();
            let channel = channel.clone();
            async move {
                Self::listener_dispatch(listener_session, sessions, outbound_tx, channel, accept_tx).await;
            }
        });

        Ok(Listener::new(channel, accept_rx))
    }

    async fn listener_dispatch(
        listener_session: Arc<Session>,
        sessions: Arc<RwLock<HashMap<SessionKey, Arc<Session>>>>,
        outbound_tx: mpsc::UnboundedSender<Outbound>,
        channel: String,
        accept_tx: mpsc::Sender<Arc<Session>>,
    ) {
        loop {
            let Some(delivery) = listener_session.recv_delivery().await else {
                return;
            };
            let key = SessionKey::Stream {
                channel: channel.clone(),
                id: delivery.wire_session_id.clone(),
            };
            let existing = sessions.read().await.get(&key).cloned();
            let session = match existing {
                Some(session) => session,
                None => {
                    let session =
                        Session::new(key.clone(), false, delivery.remote.clone(), delivery.loopback, outbound_tx.clone());
                    sessions.write().await.insert(key, Arc::clone(&session));
                    if accept_tx.send(Arc::clone(&session)).await.is_err() {
                        return;
                    }
                    session
                }
            };
            session.note_inbound_remote(delivery.remote.clone());
            session.try_deliver(delivery);
        }
    }
}
