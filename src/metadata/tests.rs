use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use sha1::{Digest, Sha1};

use crate::config::SinkConfig;
use crate::dht::IndexingResult;

use super::info::parse_info;
use super::wire::{
    extended_message, extension_handshake, metadata_request, parse_extension_handshake,
    parse_metadata_payload, Handshake, MetadataPayload,
};
use super::*;

#[test]
fn big_endian_widths() {
    assert_eq!(to_big_endian(1, 1).unwrap(), vec![0x01]);
    assert_eq!(to_big_endian(255, 1).unwrap(), vec![0xFF]);
    assert_eq!(to_big_endian(65535, 1).unwrap(), vec![0xFF]);
    assert_eq!(to_big_endian(65535, 2).unwrap(), vec![0xFF, 0xFF]);
    assert_eq!(to_big_endian(65535, 4).unwrap(), vec![0x00, 0x00, 0xFF, 0xFF]);
    assert_eq!(to_big_endian(u64::MAX, 2).unwrap(), vec![0xFF, 0xFF]);
}

#[test]
fn big_endian_rejects_other_widths() {
    for width in [0usize, 3, 5, 8, 16] {
        assert!(matches!(
            to_big_endian(1, width),
            Err(LeechError::InvalidWidth(w)) if w == width
        ));
    }
}

#[test]
fn peer_id_shape() {
    let id = PeerId::generate();
    let bytes = id.as_bytes();

    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[..8], crate::constants::PEER_ID_PREFIX);
    assert!(bytes[8..].iter().all(u8::is_ascii_digit));
}

#[test]
fn peer_ids_differ() {
    // Twelve random digits; two equal ids would mean a broken generator.
    assert_ne!(PeerId::generate().as_bytes(), PeerId::generate().as_bytes());
}

#[test]
fn handshake_round_trip() {
    let ours = Handshake::new([7; 20], [9; 20]);
    let encoded = ours.encode();

    assert_eq!(encoded.len(), 68);
    assert_eq!(encoded[0], 0x13);
    assert_eq!(&encoded[1..20], b"BitTorrent protocol");
    // Extension bit: reserved byte 5, 0x10.
    assert_eq!(encoded[25] & 0x10, 0x10);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, [7; 20]);
    assert_eq!(decoded.peer_id, [9; 20]);
    assert!(decoded.supports_extensions());
}

#[test]
fn handshake_rejects_foreign_protocols() {
    let mut bad = Handshake::new([0; 20], [0; 20]).encode();
    bad[1] = b'X';
    assert!(matches!(
        Handshake::decode(&bad),
        Err(LeechError::HandshakeRejected)
    ));
    assert!(matches!(
        Handshake::decode(&bad[..60]),
        Err(LeechError::HandshakeRejected)
    ));
}

#[test]
fn extension_handshake_payload_shape() {
    let payload = extension_handshake();
    assert_eq!(payload, b"d1:md11:ut_metadatai1eee".to_vec());

    let parsed = parse_extension_handshake(&payload).unwrap();
    assert_eq!(parsed.ut_metadata, Some(1));
    assert_eq!(parsed.metadata_size, None);
}

#[test]
fn extension_handshake_with_surplus() {
    let parsed =
        parse_extension_handshake(b"d1:md11:ut_metadatai3ee13:metadata_sizei22528eeDENEME")
            .unwrap();
    assert_eq!(parsed.ut_metadata, Some(3));
    assert_eq!(parsed.metadata_size, Some(22528));
}

#[test]
fn extended_message_framing() {
    let msg = extended_message(0, b"payload").unwrap();
    assert_eq!(&msg[..4], &[0, 0, 0, 9]);
    assert_eq!(msg[4], 20);
    assert_eq!(msg[5], 0);
    assert_eq!(&msg[6..], b"payload");
}

#[test]
fn metadata_request_is_a_bencoded_extended_message() {
    let msg = metadata_request(3, 1).unwrap();
    assert_eq!(msg[4], 20);
    assert_eq!(msg[5], 3);
    assert_eq!(&msg[6..], b"d8:msg_typei0e5:piecei1ee");
}

#[test]
fn metadata_data_payload_keeps_raw_tail() {
    let mut payload = b"d8:msg_typei1e5:piecei0e10:total_sizei5ee".to_vec();
    payload.extend_from_slice(&[1, 2, 3, 4, 5]);

    match parse_metadata_payload(&payload).unwrap() {
        MetadataPayload::Data { piece, data } => {
            assert_eq!(piece, 0);
            assert_eq!(data.as_ref(), &[1, 2, 3, 4, 5]);
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[test]
fn metadata_reject_payload() {
    match parse_metadata_payload(b"d8:msg_typei2e5:piecei4ee").unwrap() {
        MetadataPayload::Reject { piece } => assert_eq!(piece, 4),
        other => panic!("unexpected payload: {:?}", other),
    }
}

/// A syntactically complete single-file info dictionary whose pieces agree
/// with its length.
fn single_file_info(name: &str, length: u64) -> Vec<u8> {
    let piece_length = 16384u64;
    let piece_count = length.div_ceil(piece_length) as usize;
    let mut out = Vec::new();
    out.extend_from_slice(format!("d6:lengthi{}e4:name{}:{}", length, name.len(), name).as_bytes());
    out.extend_from_slice(format!("12:piece lengthi{}e6:pieces{}:", piece_length, piece_count * 20).as_bytes());
    out.extend_from_slice(&vec![0xAB; piece_count * 20]);
    out.push(b'e');
    out
}

#[test]
fn parse_single_file_info() {
    let raw = single_file_info("linux.iso", 40000);
    let digest: [u8; 20] = Sha1::digest(&raw).into();

    let metadata = parse_info(digest, &raw, 1700000000).unwrap();
    assert_eq!(metadata.info_hash, digest);
    assert_eq!(metadata.name, "linux.iso");
    assert_eq!(metadata.total_size, 40000);
    assert_eq!(
        metadata.files,
        vec![TorrentFile {
            path: "linux.iso".into(),
            size: 40000,
        }]
    );
    assert_eq!(metadata.discovered_on, 1700000000);
}

#[test]
fn parse_multi_file_info() {
    // Two files of 20 and 12 bytes, one 16 KiB piece.
    let raw = b"d5:filesld6:lengthi20e4:pathl3:cd112:track01.flaceed6:lengthi12e4:pathl3:cd19:cover.jpgeee4:name5:album12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
    let metadata = parse_info([0; 20], raw, 0).unwrap();

    assert_eq!(metadata.name, "album");
    assert_eq!(metadata.total_size, 32);
    assert_eq!(metadata.files.len(), 2);
    assert_eq!(metadata.files[0].path, "cd1/track01.flac");
    assert_eq!(metadata.files[1].path, "cd1/cover.jpg");
}

#[test]
fn parse_info_strips_nul_from_name() {
    let raw = b"d6:lengthi100e4:name6:a\x00b\x00cd12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
    let metadata = parse_info([0; 20], raw, 0).unwrap();
    assert_eq!(metadata.name, "abcd");
    // The single-file path inherits the cleaned name.
    assert_eq!(metadata.files[0].path, "abcd");
}

#[test]
fn parse_info_rejections() {
    // Not a dictionary.
    assert!(parse_info([0; 20], b"i42e", 0).is_err());
    // Invalid UTF-8 name.
    assert!(parse_info(
        [0; 20],
        b"d6:lengthi1e4:name2:\xFF\xFE12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae",
        0
    )
    .is_err());
    // Zero total size.
    assert!(parse_info(
        [0; 20],
        b"d6:lengthi0e4:name1:x12:piece lengthi16384e6:pieces0:e",
        0
    )
    .is_err());
    // Negative file size.
    assert!(parse_info(
        [0; 20],
        b"d5:filesld6:lengthi-5e4:pathl1:xeee4:name1:x12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae",
        0
    )
    .is_err());
    // Pieces not a multiple of 20.
    assert!(parse_info(
        [0; 20],
        b"d6:lengthi5e4:name1:x12:piece lengthi16384e6:pieces19:aaaaaaaaaaaaaaaaaaae",
        0
    )
    .is_err());
    // Zero piece length.
    assert!(parse_info(
        [0; 20],
        b"d6:lengthi5e4:name1:x12:piece lengthi0e6:pieces20:aaaaaaaaaaaaaaaaaaaae",
        0
    )
    .is_err());
    // Piece count at odds with the total length.
    assert!(parse_info(
        [0; 20],
        b"d6:lengthi99999e4:name1:x12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae",
        0
    )
    .is_err());
}

fn peer(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[tokio::test]
async fn sink_deduplicates_in_flight_hashes() {
    let sink = Sink::new(SinkConfig {
        max_leeches: 8,
        deadline: Duration::from_secs(60),
    });

    let result = IndexingResult::new([0xFF; 20], vec![peer(443)]);
    sink.sink(result.clone());
    sink.sink(result);

    assert_eq!(sink.pending_count(), 1);
    sink.terminate();
}

#[tokio::test]
async fn sink_drops_results_without_peers() {
    let sink = Sink::new(SinkConfig::default());
    sink.sink(IndexingResult::new([1; 20], Vec::new()));
    assert_eq!(sink.pending_count(), 0);
    sink.terminate();
}

#[tokio::test]
async fn sink_enforces_admission_ceiling() {
    let sink = Sink::new(SinkConfig {
        max_leeches: 2,
        deadline: Duration::from_secs(60),
    });

    for i in 0..5u8 {
        sink.sink(IndexingResult::new([i; 20], vec![peer(400 + i as u16)]));
    }
    assert_eq!(sink.pending_count(), 2);
    sink.terminate();
}

#[tokio::test]
#[should_panic(expected = "terminated sink")]
async fn sink_after_terminate_panics() {
    let sink = Sink::new(SinkConfig::default());
    sink.terminate();
    sink.sink(IndexingResult::new([1; 20], vec![peer(1)]));
}

#[tokio::test]
#[should_panic(expected = "drain() called twice")]
async fn drain_twice_panics() {
    let mut sink = Sink::new(SinkConfig::default());
    let _first = sink.drain();
    let _second = sink.drain();
}
