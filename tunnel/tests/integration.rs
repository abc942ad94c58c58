use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tunnel::transport::mock::{MockNetwork, MockTransport};
use tunnel::{Tunnel, TunnelBuilder, TunnelConfig};
use uuid::Uuid;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn fast_config() -> TunnelConfig {
    TunnelConfig {
        keep_alive: Duration::from_millis(50),
        reconnect: Duration::from_millis(50),
    }
}

async fn build(
    network: &MockNetwork,
    bind: SocketAddr,
    nodes: Vec<SocketAddr>,
    token: &str,
) -> Arc<Tunnel<MockTransport>> {
    let transport = MockTransport::new(network.clone(), bind);
    let tunnel = Tunnel::new(TunnelBuilder {
        id: Uuid::new_v4(),
        token: token.to_string(),
        address: bind,
        nodes,
        transport,
        config: fast_config(),
    });
    tunnel.connect().await.unwrap();
    tunnel
}

#[tokio::test]
async fn two_nodes_dial_listen_and_exchange_messages() {
    init_tracing();
    let network = MockNetwork::default();
    let addr_a = addr(5001);
    let addr_b = addr(5002);

    let server = build(&network, addr_a, vec![], "shared-token").await;
    let client = build(&network, addr_b, vec![addr_a], "shared-token").await;

    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut listener = server.listen("rpc").await.unwrap();
    let session = client.dial("rpc").await.unwrap();

    session.send(b"ping".to_vec()).await.unwrap();

    let server_session = listener.accept().await.expect("listener accepted a session");
    let body = server_session.recv().await.expect("server received a message");
    assert_eq!(body, b"ping");

    server_session.send(b"pong".to_vec()).await.unwrap();
    let reply = session.recv().await.expect("client received reply");
    assert_eq!(reply, b"pong");
}

#[tokio::test]
async fn listening_twice_on_same_channel_fails() {
    init_tracing();
    let network = MockNetwork::default();
    let server = build(&network, addr(5003), vec![], "tok").await;
    let _first = server.listen("rpc").await.unwrap();
    let second = server.listen("rpc").await;
    assert!(second.is_err());
}

#[tokio::test]
async fn token_mismatch_prevents_delivery() {
    init_tracing();
    let network = MockNetwork::default();
    let addr_a = addr(5004);
    let addr_b = addr(5005);

    let server = build(&network, addr_a, vec![], "token-a").await;
    let client = build(&network, addr_b, vec![addr_a], "token-b").await;

    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut listener = server.listen("rpc").await.unwrap();
    let session = client.dial("rpc").await.unwrap();

    // The handshake itself carries the mismatched token, so no link is ever
    // registered on either side; the send has no link to fan out across.
    let result = session.send(b"ping".to_vec()).await;
    assert!(result.is_err());

    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err(), "no session should ever have been accepted");
}

#[tokio::test]
async fn loopback_is_detected_by_tunnel_id_not_remote_address() {
    init_tracing();
    let network = MockNetwork::default();
    let addr_a = addr(5008);
    let addr_b = addr(5009);
    let shared_id = Uuid::new_v4();

    let a_transport = MockTransport::new(network.clone(), addr_a);
    let a = Tunnel::new(TunnelBuilder {
        id: shared_id,
        token: "tok".into(),
        address: addr_a,
        nodes: vec![],
        transport: a_transport,
        config: fast_config(),
    });
    a.connect().await.unwrap();

    // B shares A's tunnel id but binds a different address, so a naive
    // address comparison would never mark the resulting link loopback.
    let b_transport = MockTransport::new(network.clone(), addr_b);
    let b = Tunnel::new(TunnelBuilder {
        id: shared_id,
        token: "tok".into(),
        address: addr_b,
        nodes: vec![addr_a],
        transport: b_transport,
        config: fast_config(),
    });
    b.connect().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while !a.has_loopback_link().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("A's link to B must be marked loopback since B's connect handshake carries A's own tunnel id");
}

#[tokio::test]
async fn self_dial_forms_a_loopback_link_and_never_echoes_outbound_sends() {
    init_tracing();
    let network = MockNetwork::default();
    let addr_a = addr(5010);

    let a = build(&network, addr_a, vec![addr_a], "tok").await;

    tokio::time::timeout(Duration::from_secs(1), async {
        while !a.has_loopback_link().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dialing a node's own address must form a loopback link");

    let mut listener = a.listen("test").await.unwrap();
    let session = a.dial("test").await.unwrap();

    let result = session.send(b"ping".to_vec()).await;
    assert!(
        result.is_err(),
        "an outbound-flagged message must never be sent back over the loopback link"
    );

    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err(), "no session should ever be accepted from a send the loopback link rejected");
}

#[tokio::test]
async fn close_is_idempotent_and_stops_delivery() {
    init_tracing();
    let network = MockNetwork::default();
    let addr_a = addr(5006);
    let addr_b = addr(5007);

    let server = build(&network, addr_a, vec![], "tok").await;
    let client = build(&network, addr_b, vec![addr_a], "tok").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut listener = server.listen("rpc").await.unwrap();
    let session = client.dial("rpc").await.unwrap();
    session.send(b"hello".to_vec()).await.unwrap();
    let server_session = listener.accept().await.unwrap();
    assert_eq!(server_session.recv().await.unwrap(), b"hello");

    client.close().await.unwrap();
    client.close().await.unwrap();

    let result = session.send(b"after-close".to_vec()).await;
    assert!(result.is_err());
}
