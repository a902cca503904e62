use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use krpc_encoding::{Envelope, KRPCError, NodeID, RawResponse};
use tokio_krpc::{InboundQuery, KRPCNode};

async fn local_node() -> (tokio_krpc::SendTransport, tokio_krpc::RequestStream, SocketAddr) {
    let node = KRPCNode::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
        .await
        .unwrap();
    let addr = node.local_addr().unwrap();
    let (transport, requests, _unmatched) = node.serve();
    (transport, requests, addr)
}

#[tokio::test]
async fn ping_round_trips_between_two_nodes() {
    let (client, _client_requests, _client_addr) = local_node().await;
    let (server, mut server_requests, server_addr) = local_node().await;

    let client_id = NodeID::generate();
    let server_id = NodeID::generate();

    let responder = tokio::spawn(async move {
        let inbound: InboundQuery = server_requests.recv().await.expect("query arrives");
        assert_eq!(inbound.query.method_name(), "ping");
        server
            .send_response(
                inbound.from,
                inbound.transaction_id,
                RawResponse {
                    id: server_id,
                    token: None,
                    nodes: None,
                    values: None,
                },
            )
            .await
            .unwrap();
    });

    let response = client
        .ping(server_addr, client_id, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.id, server_id);

    responder.await.unwrap();
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (client, _requests, _addr) = local_node().await;
    let dead_end = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));

    let result = client
        .ping(dead_end, NodeID::generate(), Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(tokio_krpc::Error::Timeout)));
}

#[tokio::test]
async fn remote_error_payload_surfaces_as_an_error() {
    let (client, _client_requests, _client_addr) = local_node().await;
    let (server, mut server_requests, server_addr) = local_node().await;

    let responder = tokio::spawn(async move {
        let inbound: InboundQuery = server_requests.recv().await.expect("query arrives");
        server
            .send_error(
                inbound.from,
                inbound.transaction_id,
                KRPCError::new(krpc_encoding::ErrorCode::Protocol, "bad token"),
            )
            .await
            .unwrap();
    });

    let result = client
        .ping(server_addr, NodeID::generate(), Duration::from_secs(2))
        .await;
    assert!(matches!(result, Err(tokio_krpc::Error::Remote(_))));

    responder.await.unwrap();
}

#[test]
fn envelope_decode_error_is_not_a_panic() {
    let err = Envelope::decode(b"garbage").unwrap_err();
    match err {
        krpc_encoding::Error::DecodeError { .. } => {}
        other => panic!("unexpected error: {other:?}"),
    }
}
