use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use uuid::Uuid;

use crate::error::Error;
use crate::message::TunnelMessage;
use crate::transport::Socket;

/// One framed connection to a peer, plus the bookkeeping the multiplexer
/// needs (connected/loopback flags, last keepalive time).
pub struct Link<S> {
    pub id: Uuid,
    socket: S,
    connected: AtomicBool,
    loopback: AtomicBool,
    last_keep_alive: Mutex<Instant>,
}

impl<S: Socket> Link<S> {
    pub fn new(id: Uuid, socket: S) -> Self {
        Self {
            id,
            socket,
            connected: AtomicBool::new(false),
            loopback: AtomicBool::new(false),
            last_keep_alive: Mutex::new(Instant::now()),
        }
    }

    pub async fn send(&self, msg: TunnelMessage) -> Result<(), Error> {
        self.socket.send(msg).await
    }

    pub async fn recv(&self) -> Result<TunnelMessage, Error> {
        self.socket.recv().await
    }

    pub fn remote(&self) -> SocketAddr {
        self.socket.remote()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_loopback(&self) -> bool {
        self.loopback.load(Ordering::Acquire)
    }

    pub fn set_loopback(&self, loopback: bool) {
        self.loopback.store(loopback, Ordering::Release);
    }

    pub fn touch_keep_alive(&self) {
        *self.last_keep_alive.lock().unwrap() = Instant::now();
    }

    pub fn last_keep_alive(&self) -> Instant {
        *self.last_keep_alive.lock().unwrap()
    }
}
