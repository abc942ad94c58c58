use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use overlay::resolver::mock::MockResolver;
use overlay::router::mock::{MockRouteTable, MockRouter};
use overlay::{
    Advert, AdvertType, ControlMessage, EventType, Network, NetworkBuilder, NetworkMessage, NodeId,
    OverlayConfig, Route, RouteEvent,
};
use tunnel::transport::mock::{MockNetwork, MockTransport};
use tunnel::{Tunnel, TunnelBuilder, TunnelConfig};
use uuid::Uuid;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn fast_overlay_config() -> OverlayConfig {
    OverlayConfig {
        resolve: Duration::from_millis(500),
        announce: Duration::from_millis(30),
        prune: Duration::from_secs(60),
    }
}

fn fast_tunnel_config() -> TunnelConfig {
    TunnelConfig {
        keep_alive: Duration::from_millis(200),
        reconnect: Duration::from_millis(50),
    }
}

async fn build_network(
    net_fabric: &MockNetwork,
    bind: SocketAddr,
    seed_nodes: Vec<SocketAddr>,
    self_id: &str,
) -> (
    Arc<Network<MockTransport, MockRouter, MockRouteTable, MockResolver>>,
    Arc<MockRouter>,
) {
    let transport = MockTransport::new(net_fabric.clone(), bind);
    let tunnel = Tunnel::new(TunnelBuilder {
        id: Uuid::new_v4(),
        token: "shared".into(),
        address: bind,
        nodes: seed_nodes.clone(),
        transport,
        config: fast_tunnel_config(),
    });
    let router = Arc::new(MockRouter::default());
    let network = Network::new(NetworkBuilder {
        self_id: NodeId::from(self_id),
        address: bind.to_string(),
        seed_nodes,
        resolver_name: "mesh".into(),
        tunnel,
        router: Arc::clone(&router),
        table: Arc::new(MockRouteTable::default()),
        resolver: Arc::new(MockResolver::default()),
        config: fast_overlay_config(),
    });
    network.connect().await.unwrap();
    (network, router)
}

#[tokio::test]
async fn two_node_handshake_discovers_peer_via_announce() {
    init_tracing();
    let fabric = MockNetwork::default();
    let addr_a = addr(6001);
    let addr_b = addr(6002);

    let (node_a, _router_a) = build_network(&fabric, addr_a, vec![addr_b], "A").await;
    let (node_b, _router_b) = build_network(&fabric, addr_b, vec![addr_a], "B").await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let a_ids: Vec<_> = node_a.nodes().await.into_iter().map(|n| n.id).collect();
            let b_ids: Vec<_> = node_b.nodes().await.into_iter().map(|n| n.id).collect();
            if a_ids.contains(&NodeId::from("B")) && b_ids.contains(&NodeId::from("A")) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("both nodes should discover each other within the timeout");
}

#[tokio::test]
async fn loop_guard_drops_event_from_unverifiable_router() {
    init_tracing();
    let fabric = MockNetwork::default();
    let addr_s = addr(6003);
    let (_self_network, router) = build_network(&fabric, addr_s, vec![], "S").await;

    // Impersonate peer N1 with a raw tunnel: announce itself with no
    // neighbours, then advertise a route whose Router (Z) is not in N1's
    // known neighbour set.
    let peer_addr = addr(6004);
    let peer_transport = MockTransport::new(fabric.clone(), peer_addr);
    let peer_tunnel = Tunnel::new(TunnelBuilder {
        id: Uuid::new_v4(),
        token: "shared".into(),
        address: peer_addr,
        nodes: vec![addr_s],
        transport: peer_transport,
        config: fast_tunnel_config(),
    });
    peer_tunnel.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let net_session = peer_tunnel.dial("network").await.unwrap();
    let hello = NetworkMessage::Connect(overlay::MembershipPayload {
        node: overlay::Node::new(NodeId::from("N1"), peer_addr.to_string()),
        neighbours: vec![],
    });
    net_session.send(serde_json::to_vec(&hello).unwrap()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let ctrl_session = peer_tunnel.dial("control").await.unwrap();
    let advert = Advert {
        id: NodeId::from("N1"),
        advert_type: AdvertType::Update,
        timestamp: Utc::now(),
        ttl: 60,
        events: vec![RouteEvent {
            event_type: EventType::Create,
            route: Route {
                service: "svc".into(),
                router: NodeId::from("Z"),
                gateway: peer_addr.to_string(),
                link: "network".into(),
                metric: 0,
            },
        }],
    };
    ctrl_session
        .send(serde_json::to_vec(&ControlMessage::Advert(advert)).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(
        router.processed().is_empty(),
        "an event whose Router is not in the advertiser's known neighbours must never reach the router"
    );
}
