use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;

use crate::config::{IndexerConfig, TransportConfig};

use super::message::ERR_METHOD_UNKNOWN;
use super::node::{parse_compact_nodes, parse_compact_peers};
use super::*;

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[test]
fn node_id_generate_is_random() {
    assert_ne!(NodeId::generate().0, NodeId::generate().0);
}

#[test]
fn node_id_neighbour_shares_target_prefix() {
    let own = NodeId([0xAA; 20]);
    let target = NodeId([0x55; 20]);
    let forged = own.neighbour_of(&target);

    assert_eq!(&forged.0[..15], &target.0[..15]);
    assert_eq!(&forged.0[15..], &own.0[15..]);
    // The forged id sits closer to the target than the real one.
    assert!(forged.distance(&target) < own.distance(&target));
}

#[test]
fn compact_nodes_parsing() {
    let mut data = Vec::new();
    data.extend_from_slice(&[7u8; 20]);
    data.extend_from_slice(&[127, 0, 0, 1]);
    data.extend_from_slice(&6881u16.to_be_bytes());

    let nodes = parse_compact_nodes(&data);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].0, NodeId([7; 20]));
    assert_eq!(nodes[0].1, localhost(6881));

    // Trailing garbage and zero ports are discarded.
    data.extend_from_slice(&[0u8; 26]);
    data.push(0xFF);
    assert_eq!(parse_compact_nodes(&data).len(), 1);
}

#[test]
fn compact_peers_parsing() {
    let values = vec![
        crate::bencode::Value::Bytes(Bytes::from_static(&[127, 0, 0, 1, 0x1A, 0xE1])),
        // wrong length
        crate::bencode::Value::Bytes(Bytes::from_static(&[1, 2, 3])),
        // zero port
        crate::bencode::Value::Bytes(Bytes::from_static(&[127, 0, 0, 1, 0, 0])),
        crate::bencode::Value::Integer(42),
    ];

    let peers = parse_compact_peers(&values);
    assert_eq!(peers, vec![localhost(6881)]);
}

#[test]
fn message_query_round_trip() {
    let own = NodeId([9; 20]);
    let msg = Message::get_peers_query(Bytes::from_static(b"ab"), own, [3; 20]);
    let parsed = Message::parse(&msg.encode()).unwrap();

    assert_eq!(parsed.transaction_id, Bytes::from_static(b"ab"));
    match parsed.kind {
        MessageKind::Query {
            sender,
            query: Query::GetPeers { info_hash },
        } => {
            assert_eq!(sender, Some(own));
            assert_eq!(info_hash, [3; 20]);
        }
        other => panic!("unexpected kind: {:?}", other),
    }
}

#[test]
fn message_announce_with_implied_port() {
    let raw = b"d1:ad2:id20:abcdefghij01234567899:info_hash20:mnopqrstuvwxyz12345612:implied_porti1e4:porti0e5:token2:aae1:q13:announce_peer1:t2:aa1:y1:qe";
    let parsed = Message::parse(raw).unwrap();

    match parsed.kind {
        MessageKind::Query {
            query:
                Query::AnnouncePeer {
                    info_hash,
                    port,
                    implied_port,
                },
            ..
        } => {
            assert_eq!(&info_hash, b"mnopqrstuvwxyz123456");
            assert_eq!(port, 0);
            assert!(implied_port);
        }
        other => panic!("unexpected kind: {:?}", other),
    }
}

#[test]
fn message_unknown_method_is_preserved() {
    let raw = b"d1:ad2:id20:abcdefghij0123456789e1:q8:sea_food1:t2:xy1:y1:qe";
    let parsed = Message::parse(raw).unwrap();
    assert!(matches!(
        parsed.kind,
        MessageKind::Query {
            query: Query::Other,
            ..
        }
    ));

    let reply = Message::method_unknown(parsed.transaction_id);
    let encoded = reply.encode();
    assert_eq!(
        encoded,
        b"d1:eli204e14:Method Unknowne1:t2:xy1:y1:ee".to_vec()
    );
    match Message::parse(&encoded).unwrap().kind {
        MessageKind::Error { code, message } => {
            assert_eq!(code, ERR_METHOD_UNKNOWN.0);
            assert_eq!(message, ERR_METHOD_UNKNOWN.1);
        }
        other => panic!("unexpected kind: {:?}", other),
    }
}

#[test]
fn message_token_response_shape() {
    let msg = Message::token_response(
        Bytes::from_static(b"aa"),
        NodeId([1; 20]),
        Bytes::from_static(b"secret12"),
    );
    let value = crate::bencode::decode(&msg.encode()).unwrap();

    assert_eq!(value.get(b"y").and_then(|v| v.as_str()), Some("r"));
    let r = value.get(b"r").unwrap();
    assert_eq!(
        r.get(b"token").and_then(|v| v.as_bytes()).map(|b| b.as_ref()),
        Some(b"secret12".as_slice())
    );
    // Empty values list: a syntactically complete get_peers answer that
    // hands out no peers.
    assert_eq!(r.get(b"values").and_then(|v| v.as_list()).map(|l| l.len()), Some(0));
}

#[test]
fn message_response_with_peers() {
    let raw = b"d1:rd2:id20:abcdefghij01234567895:token8:aoeusnth6:valuesl6:axje.u6:idhtnmee1:t2:aa1:y1:re";
    let parsed = Message::parse(raw).unwrap();

    match parsed.kind {
        MessageKind::Response(body) => {
            assert_eq!(body.values.len(), 2);
            assert!(body.token.is_some());
            assert!(body.nodes.is_empty());
        }
        other => panic!("unexpected kind: {:?}", other),
    }
}

#[test]
fn message_rejects_garbage() {
    assert!(Message::parse(b"").is_err());
    assert!(Message::parse(b"i42e").is_err());
    assert!(Message::parse(b"d1:y1:qe").is_err());
    // Query without args.
    assert!(Message::parse(b"d1:q4:ping1:t2:aa1:y1:qe").is_err());
}

#[tokio::test]
async fn transport_round_trip_on_loopback() {
    let (alpha, _alpha_events) = Transport::new(localhost(0), TransportConfig::default());
    let (beta, mut beta_events) = Transport::new(localhost(0), TransportConfig::default());
    alpha.start().await.unwrap();
    beta.start().await.unwrap();

    let beta_addr = beta.local_addr().unwrap();
    let msg = Message::find_node_query(
        Bytes::from_static(b"tt"),
        NodeId::generate(),
        NodeId::generate(),
    );
    alpha.write(&msg, beta_addr).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), beta_events.recv())
        .await
        .expect("timed out waiting for datagram")
        .expect("event channel closed");
    match event {
        TransportEvent::Packet(received, from) => {
            assert_eq!(received.transaction_id, Bytes::from_static(b"tt"));
            assert_eq!(from.port(), alpha.local_addr().unwrap().port());
        }
        TransportEvent::Congestion => panic!("unexpected congestion event"),
    }

    alpha.terminate();
    beta.terminate();
}

#[tokio::test]
async fn transport_write_after_terminate_fails() {
    let (transport, _events) = Transport::new(localhost(0), TransportConfig::default());
    transport.start().await.unwrap();
    transport.terminate();

    let msg = Message::plain_response(Bytes::from_static(b"aa"), NodeId::generate());
    assert!(matches!(
        transport.write(&msg, localhost(6881)).await,
        Err(DhtError::Closed)
    ));
}

#[tokio::test]
#[should_panic(expected = "started twice")]
async fn transport_double_start_panics() {
    let (transport, _events) = Transport::new(localhost(0), TransportConfig::default());
    transport.start().await.unwrap();
    transport.start().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn throttle_bounds_send_rate() {
    let config = TransportConfig { max_rps: 4 };
    let (transport, _events) = Transport::new(localhost(0), config);
    transport.start().await.unwrap();
    let dst = transport.local_addr().unwrap();

    let msg = Message::plain_response(Bytes::from_static(b"aa"), NodeId::generate());

    // The initial bucket drains after max_rps sends...
    for _ in 0..4 {
        tokio::time::timeout(Duration::from_millis(10), transport.write(&msg, dst))
            .await
            .expect("token should be available")
            .unwrap();
    }
    // ...then a write blocks until the next refill.
    let blocked = tokio::time::timeout(Duration::from_millis(10), transport.write(&msg, dst)).await;
    assert!(blocked.is_err(), "fifth write should wait for refill");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    tokio::time::timeout(Duration::from_millis(10), transport.write(&msg, dst))
        .await
        .expect("refill should have produced tokens")
        .unwrap();

    transport.terminate();
}

#[tokio::test]
async fn service_answers_ping_and_mines_get_peers() {
    let config = IndexerConfig {
        // Keep the probe loop quiet during the test.
        interval: Duration::from_secs(600),
        max_neighbours: 16,
        transport: TransportConfig::default(),
    };
    let (tx, mut results) = tokio::sync::mpsc::channel(16);
    let mut service = IndexingService::new(localhost(0), config, tx);
    service.start().await.unwrap();

    // A scripted correspondent talks to the service over plain UDP.
    let socket = tokio::net::UdpSocket::bind(localhost(0)).await.unwrap();
    let service_addr = {
        // The service owns its transport; discover the port by probing.
        // Bind order guarantees the service socket exists by now.
        let probe = Message::get_peers_query(
            Bytes::from_static(b"q1"),
            NodeId::generate(),
            [0xAB; 20],
        );
        let addr = service.local_addr().expect("service must be bound");
        socket.send_to(&probe.encode(), addr).await.unwrap();
        addr
    };

    // The query must surface as a result carrying the querier's endpoint.
    let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
        .await
        .expect("timed out waiting for result")
        .expect("result channel closed");
    assert_eq!(result.info_hash(), [0xAB; 20]);
    assert_eq!(result.peer_addrs(), [socket.local_addr().unwrap()]);

    // And must be answered with a token response.
    let mut buf = vec![0u8; 1024];
    let (len, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for answer")
        .unwrap();
    assert_eq!(from, service_addr);
    let answer = Message::parse(&buf[..len]).unwrap();
    assert_eq!(answer.transaction_id, Bytes::from_static(b"q1"));
    match answer.kind {
        MessageKind::Response(body) => assert!(body.token.is_some()),
        other => panic!("unexpected kind: {:?}", other),
    }

    service.terminate();
}

#[tokio::test]
async fn manager_fans_in_and_closes_on_terminate() {
    let config = IndexerConfig {
        interval: Duration::from_secs(600),
        max_neighbours: 4,
        transport: TransportConfig::default(),
    };
    let mut manager = IndexingManager::new(&[localhost(0), localhost(0)], config);
    let mut output = manager.output();
    manager.start().await.unwrap();

    manager.terminate();
    let closed = tokio::time::timeout(Duration::from_secs(5), output.recv())
        .await
        .expect("channel should close promptly");
    assert!(closed.is_none());
}
