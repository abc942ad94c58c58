use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Error;
use crate::message::TunnelMessage;

/// A single framed, bidirectional connection to a peer.
///
/// `recv`/`send` take `&self` so a socket can be driven concurrently from a
/// per-link recv task and a keepalive task without an outer lock.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    async fn send(&self, msg: TunnelMessage) -> Result<(), Error>;
    async fn recv(&self) -> Result<TunnelMessage, Error>;
    fn remote(&self) -> SocketAddr;
}

/// Accepts inbound sockets on a bound address.
#[async_trait]
pub trait Listener: Send + 'static {
    type Socket: Socket;

    async fn accept(&mut self) -> Result<Self::Socket, Error>;
}

/// The out-of-scope byte-transport collaborator: dials and listens for framed
/// [`TunnelMessage`]s. A production implementation lives outside this crate
/// (TCP/TLS/QUIC framing, handshake, etc); this trait is the seam.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Socket: Socket;
    type Listener: Listener<Socket = Self::Socket>;

    async fn dial(&self, addr: SocketAddr) -> Result<Self::Socket, Error>;
    async fn listen(&self, addr: SocketAddr) -> Result<Self::Listener, Error>;
}

/// In-memory test double used by this crate's own test suite.
pub mod mock {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    use super::{Listener, Socket, Transport};
    use crate::error::Error;
    use crate::message::TunnelMessage;

    #[derive(Debug, thiserror::Error)]
    enum MockError {
        #[error("no listener bound on {0}")]
        NoListener(SocketAddr),
        #[error("peer hung up")]
        PeerClosed,
    }

    /// A shared in-process "network": maps bound addresses to an accept queue.
    /// Clone to connect several [`MockTransport`]s to the same fabric.
    #[derive(Clone, Default)]
    pub struct MockNetwork {
        listeners: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<AcceptRequest>>>>,
    }

    struct AcceptRequest {
        peer_addr: SocketAddr,
        to_dialer: mpsc::UnboundedSender<TunnelMessage>,
        accepted_tx: oneshot::Sender<mpsc::UnboundedSender<TunnelMessage>>,
    }

    pub struct MockSocket {
        remote: SocketAddr,
        tx: mpsc::UnboundedSender<TunnelMessage>,
        rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TunnelMessage>>,
    }

    #[async_trait]
    impl Socket for MockSocket {
        async fn send(&self, msg: TunnelMessage) -> Result<(), Error> {
            self.tx
                .send(msg)
                .map_err(|_| Error::Transport(Box::new(MockError::PeerClosed)))
        }

        async fn recv(&self) -> Result<TunnelMessage, Error> {
            self.rx
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| Error::Transport(Box::new(MockError::PeerClosed)))
        }

        fn remote(&self) -> SocketAddr {
            self.remote
        }
    }

    pub struct MockListener {
        accept_rx: mpsc::UnboundedReceiver<AcceptRequest>,
    }

    #[async_trait]
    impl Listener for MockListener {
        type Socket = MockSocket;

        async fn accept(&mut self) -> Result<MockSocket, Error> {
            let req = self
                .accept_rx
                .recv()
                .await
                .ok_or_else(|| Error::Transport(Box::new(MockError::PeerClosed)))?;
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = req.accepted_tx.send(tx);
            Ok(MockSocket {
                remote: req.peer_addr,
                tx: req.to_dialer,
                rx: tokio::sync::Mutex::new(rx),
            })
        }
    }

    #[derive(Clone)]
    pub struct MockTransport {
        pub bind_addr: SocketAddr,
        network: MockNetwork,
    }

    impl MockTransport {
        pub fn new(network: MockNetwork, bind_addr: SocketAddr) -> Self {
            Self { bind_addr, network }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Socket = MockSocket;
        type Listener = MockListener;

        async fn dial(&self, addr: SocketAddr) -> Result<MockSocket, Error> {
            let sender = {
                let listeners = self.network.listeners.lock().unwrap();
                listeners
                    .get(&addr)
                    .cloned()
                    .ok_or(MockError::NoListener(addr))
                    .map_err(|e| Error::Transport(Box::new(e)))?
            };
            let (to_dialer, rx) = mpsc::unbounded_channel();
            let (accepted_tx, accepted_rx) = oneshot::channel();
            sender
                .send(AcceptRequest {
                    peer_addr: self.bind_addr,
                    to_dialer,
                    accepted_tx,
                })
                .map_err(|_| Error::Transport(Box::new(MockError::PeerClosed)))?;
            let to_listener = accepted_rx
                .await
                .map_err(|_| Error::Transport(Box::new(MockError::PeerClosed)))?;
            Ok(MockSocket {
                remote: addr,
                tx: to_listener,
                rx: tokio::sync::Mutex::new(rx),
            })
        }

        async fn listen(&self, addr: SocketAddr) -> Result<MockListener, Error> {
            let (accept_tx, accept_rx) = mpsc::unbounded_channel();
            self.network.listeners.lock().unwrap().insert(addr, accept_tx);
            Ok(MockListener { accept_rx })
        }
    }
}
