use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, instrument, warn};
use tunnel::{Session, Tunnel, Transport};

use crate::advert::{set_route_metric, Advert, ControlMessage};
use crate::config::OverlayConfig;
use crate::error::Error;
use crate::membership::{MembershipPayload, NetworkMessage};
use crate::neighbourhood::Neighbourhood;
use crate::node::NodeId;
use crate::resolver::Resolver;
use crate::router::{Router, RouteTable};

const NETWORK_CHANNEL: &str = "network";
const CONTROL_CHANNEL: &str = "control";

pub struct NetworkBuilder<T: Transport, Rt: Router, Tb: RouteTable, Rs: Resolver> {
    pub self_id: NodeId,
    pub address: String,
    pub seed_nodes: Vec<SocketAddr>,
    pub resolver_name: String,
    pub tunnel: Arc<Tunnel<T>>,
    pub router: Arc<Rt>,
    pub table: Arc<Tb>,
    pub resolver: Arc<Rs>,
    pub config: OverlayConfig,
}

/// Drives membership gossip and route advertisement on top of a [`Tunnel`].
///
/// Opens a dial session and a listener per channel (`network`, `control`),
/// and runs the resolve/announce/prune/advertise background tasks plus the
/// two channel demultiplexers.
pub struct Network<T: Transport, Rt: Router, Tb: RouteTable, Rs: Resolver> {
    tunnel: Arc<Tunnel<T>>,
    neighbourhood: Arc<Neighbourhood>,
    router: Arc<Rt>,
    table: Arc<Tb>,
    resolver: Arc<Rs>,
    resolver_name: String,
    seed_nodes: Vec<SocketAddr>,
    config: OverlayConfig,
    address: String,
    closed: Notify,
    running: AtomicBool,
}

impl<T: Transport, Rt: Router + 'static, Tb: RouteTable + 'static, Rs: Resolver + 'static> Network<T, Rt, Tb, Rs> {
    pub fn new(builder: NetworkBuilder<T, Rt, Tb, Rs>) -> Arc<Self> {
        Arc::new(Self {
            tunnel: builder.tunnel,
            neighbourhood: Arc::new(Neighbourhood::new(builder.self_id, builder.address.clone())),
            router: builder.router,
            table: builder.table,
            resolver: builder.resolver,
            resolver_name: builder.resolver_name,
            seed_nodes: builder.seed_nodes,
            config: builder.config,
            address: builder.address,
            closed: Notify::new(),
            running: AtomicBool::new(false),
        })
    }

    pub async fn nodes(&self) -> Vec<crate::node::Node> {
        self.neighbourhood.nodes().await
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    #[instrument(skip(self))]
    pub async fn connect(self: &Arc<Self>) -> Result<(), Error> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.tunnel.connect().await?;

        let net_dial = self.tunnel.dial(NETWORK_CHANNEL).await?;
        let net_listen = self.tunnel.listen(NETWORK_CHANNEL).await?;
        let ctrl_dial = self.tunnel.dial(CONTROL_CHANNEL).await?;
        let ctrl_listen = self.tunnel.listen(CONTROL_CHANNEL).await?;

        self.router.start().await.map_err(Error::Router)?;

        let hello = NetworkMessage::Connect(MembershipPayload {
            node: self.neighbourhood.self_node().await,
            neighbours: Vec::new(),
        });
        match serde_json::to_vec(&hello) {
            Ok(bytes) => {
                if let Err(e) = net_dial.send(bytes).await {
                    debug!(error = %e, "initial connect announcement failed");
                }
            }
            Err(e) => debug!(error = %e, "failed to marshal connect announcement"),
        }

        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.net_demux(net_listen).await }
        });
        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.ctrl_demux(ctrl_listen).await }
        });
        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.resolve_loop().await }
        });
        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.announce_loop(net_dial).await }
        });
        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.prune_loop().await }
        });
        tokio::spawn({
            let this = Arc::clone(self);
            async move { this.advertise_loop(ctrl_dial).await }
        });

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn close(self: &Arc<Self>) -> Result<(), Error> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.notify_waiters();

        let router_result = self.router.stop().await.map_err(Error::Router);
        let tunnel_result = self.tunnel.close().await.map_err(Error::from);
        router_result?;
        tunnel_result?;
        Ok(())
    }

    async fn net_demux(self: Arc<Self>, mut listener: tunnel::Listener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Some(session) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move { this.read_network_session(session).await });
                        }
                        None => return,
                    }
                }
                _ = self.closed.notified() => return,
            }
        }
    }

    async fn read_network_session(self: Arc<Self>, session: Arc<Session>) {
        while let Some(body) = session.recv().await {
            if let Err(e) = self.handle_network_message(&body).await {
                warn!(error = %e, "failed to process network message");
            }
        }
    }

    async fn handle_network_message(&self, body: &[u8]) -> Result<(), Error> {
        let msg: NetworkMessage = serde_json::from_slice(body)?;
        match msg {
            NetworkMessage::Connect(p) => self.neighbourhood.handle_connect(p.node).await,
            NetworkMessage::Neighbour(p) => self.neighbourhood.handle_neighbour(p.node, p.neighbours).await,
            NetworkMessage::Close(p) => self.neighbourhood.handle_close(&p.node.id, self.table.as_ref()).await,
        }
        Ok(())
    }

    async fn ctrl_demux(self: Arc<Self>, mut listener: tunnel::Listener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Some(session) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move { this.read_control_session(session).await });
                        }
                        None => return,
                    }
                }
                _ = self.closed.notified() => return,
            }
        }
    }

    async fn read_control_session(self: Arc<Self>, session: Arc<Session>) {
        while let Some(body) = session.recv().await {
            if let Err(e) = self.handle_control_message(&body).await {
                warn!(error = %e, "failed to process control message");
            }
        }
    }

    async fn handle_control_message(&self, body: &[u8]) -> Result<(), Error> {
        let msg: ControlMessage = serde_json::from_slice(body)?;
        match msg {
            ControlMessage::Advert(advert) => self.handle_advert(advert).await,
        }
    }

    /// `advert` inbound pipeline: register the advertiser, apply the loop
    /// guard and metric ladder per event, then hand survivors to the router.
    async fn handle_advert(&self, advert: Advert) -> Result<(), Error> {
        let advertiser = advert.id.clone();
        if advertiser != *self.neighbourhood.self_id() && !self.neighbourhood.contains(&advertiser).await {
            self.neighbourhood.register_if_unknown(&advertiser).await;
        }
        if let Some(first) = advert.events.first() {
            self.neighbourhood
                .set_address_if_empty(&advertiser, first.route.gateway.clone())
                .await;
        }

        let mut surviving = Vec::with_capacity(advert.events.len());
        for mut event in advert.events {
            if advertiser != event.route.router
                && !self.neighbourhood.neighbour_knows(&advertiser, &event.route.router).await
            {
                continue;
            }
            let metric = set_route_metric(&self.neighbourhood, &event.route.router).await;
            if metric > 1000 {
                continue;
            }
            event.route.metric = metric;
            surviving.push(event);
        }

        if surviving.is_empty() {
            return Ok(());
        }

        let repackaged = Advert {
            id: advert.id,
            advert_type: advert.advert_type,
            timestamp: advert.timestamp,
            ttl: advert.ttl,
            events: surviving,
        };
        self.router.process(repackaged).await.map_err(Error::Router)
    }

    async fn resolve_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.resolve);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.resolver.resolve(&self.resolver_name).await.map_err(Error::Resolve) {
                        Ok(mut addrs) => {
                            addrs.extend(self.seed_nodes.iter().copied());
                            addrs.sort();
                            addrs.dedup();
                            self.tunnel.set_nodes(addrs).await;
                        }
                        Err(e) => debug!(error = %e, "resolve failed, retrying next tick"),
                    }
                }
                _ = self.closed.notified() => return,
            }
        }
    }

    async fn announce_loop(self: Arc<Self>, session: Arc<Session>) {
        let mut ticker = tokio::time::interval(self.config.announce);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let node = self.neighbourhood.self_node().await;
                    let neighbours = node.neighbours.values().cloned().collect();
                    let payload = MembershipPayload { node, neighbours };
                    match serde_json::to_vec(&NetworkMessage::Neighbour(payload)) {
                        Ok(bytes) => {
                            if let Err(e) = session.send(bytes).await {
                                debug!(error = %e, "announce send failed");
                            }
                        }
                        Err(e) => debug!(error = %e, "announce marshal failed"),
                    }
                }
                _ = self.closed.notified() => return,
            }
        }
    }

    async fn prune_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.prune);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stale = self.neighbourhood.stale(self.config.prune).await;
                    for id in stale {
                        self.neighbourhood.prune_node(&id, self.table.as_ref()).await;
                    }
                }
                _ = self.closed.notified() => return,
            }
        }
    }

    async fn advertise_loop(self: Arc<Self>, session: Arc<Session>) {
        loop {
            tokio::select! {
                advert = self.router.next_advert() => {
                    match advert {
                        Some(mut advert) => {
                            for event in &mut advert.events {
                                event.route.gateway = self.address.clone();
                                event.route.link = NETWORK_CHANNEL.to_string();
                            }
                            match serde_json::to_vec(&ControlMessage::Advert(advert)) {
                                Ok(bytes) => {
                                    if let Err(e) = session.send(bytes).await {
                                        debug!(error = %e, "advert send failed");
                                    }
                                }
                                Err(e) => debug!(error = %e, "advert marshal failed"),
                            }
                        }
                        None => return,
                    }
                }
                _ = self.closed.notified() => return,
            }
        }
    }
}
