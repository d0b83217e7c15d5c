//! BitTorrent wire-format helpers for the leech: the 68-byte handshake,
//! length-prefixed message framing, and the extension-protocol payloads.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::bencode::{decode_prefix, encode, Value};
use crate::constants::{
    EXTENSION_BIT, HANDSHAKE_LEN, MSG_EXTENDED, PROTOCOL_STRING, UT_METADATA_LOCAL_ID,
};

use super::error::LeechError;

/// Encodes `value` as `width` big-endian bytes, for the 1/2/4-byte fields of
/// the wire protocol. Values wider than the field are truncated to its low
/// bytes; widths other than 1, 2 and 4 are an error.
pub fn to_big_endian(value: u64, width: usize) -> Result<Vec<u8>, LeechError> {
    match width {
        1 => Ok(vec![value as u8]),
        2 => Ok((value as u16).to_be_bytes().to_vec()),
        4 => Ok((value as u32).to_be_bytes().to_vec()),
        _ => Err(LeechError::InvalidWidth(width)),
    }
}

/// The fixed-size handshake both sides send first.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub reserved: [u8; 8],
}

impl Handshake {
    /// Our handshake: protocol string, the BEP-10 extension bit, and the
    /// session's info-hash and peer id.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] |= EXTENSION_BIT;
        Self {
            info_hash,
            peer_id,
            reserved,
        }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0u8; HANDSHAKE_LEN];
        out[0] = PROTOCOL_STRING.len() as u8;
        out[1..20].copy_from_slice(PROTOCOL_STRING);
        out[20..28].copy_from_slice(&self.reserved);
        out[28..48].copy_from_slice(&self.info_hash);
        out[48..68].copy_from_slice(&self.peer_id);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, LeechError> {
        if data.len() != HANDSHAKE_LEN
            || data[0] as usize != PROTOCOL_STRING.len()
            || &data[1..20] != PROTOCOL_STRING
        {
            return Err(LeechError::HandshakeRejected);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }

    pub fn supports_extensions(&self) -> bool {
        self.reserved[5] & EXTENSION_BIT != 0
    }
}

/// Frames an extended message (BT type 20): 4-byte length prefix, message
/// type, extended id, payload.
pub fn extended_message(ext_id: u8, payload: &[u8]) -> Result<Vec<u8>, LeechError> {
    let mut out = to_big_endian(payload.len() as u64 + 2, 4)?;
    out.extend(to_big_endian(MSG_EXTENDED as u64, 1)?);
    out.extend(to_big_endian(ext_id as u64, 1)?);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Our extension handshake: we advertise `ut_metadata` and nothing else.
pub fn extension_handshake() -> Vec<u8> {
    let mut m = BTreeMap::new();
    m.insert(
        Bytes::from_static(b"ut_metadata"),
        Value::Integer(UT_METADATA_LOCAL_ID as i64),
    );
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"m"), Value::Dict(m));
    encode(&Value::Dict(dict))
}

/// What we need out of the peer's extension handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerExtensions {
    /// The peer's id for `ut_metadata`, if it offers the extension.
    pub ut_metadata: Option<u8>,
    /// The advertised size of the info dictionary.
    pub metadata_size: Option<i64>,
}

/// Parses the peer's extension handshake. Trailing bytes after the
/// dictionary are tolerated; some clients append garbage.
pub fn parse_extension_handshake(payload: &[u8]) -> Result<PeerExtensions, LeechError> {
    let (value, _) = decode_prefix(payload)?;
    let dict = value.as_dict().ok_or(LeechError::ExtensionUnsupported)?;

    Ok(PeerExtensions {
        ut_metadata: dict
            .get(b"m".as_slice())
            .and_then(Value::as_dict)
            .and_then(|m| m.get(b"ut_metadata".as_slice()))
            .and_then(Value::as_integer)
            .filter(|id| (1..=u8::MAX as i64).contains(id))
            .map(|id| id as u8),
        metadata_size: dict
            .get(b"metadata_size".as_slice())
            .and_then(Value::as_integer),
    })
}

/// `ut_metadata` message types (BEP-9).
const MSG_TYPE_REQUEST: i64 = 0;
const MSG_TYPE_DATA: i64 = 1;
const MSG_TYPE_REJECT: i64 = 2;

/// A full wire message requesting one metadata piece.
pub fn metadata_request(ext_id: u8, piece: u32) -> Result<Vec<u8>, LeechError> {
    let mut dict = BTreeMap::new();
    dict.insert(
        Bytes::from_static(b"msg_type"),
        Value::Integer(MSG_TYPE_REQUEST),
    );
    dict.insert(Bytes::from_static(b"piece"), Value::Integer(piece as i64));
    extended_message(ext_id, &encode(&Value::Dict(dict)))
}

/// A decoded `ut_metadata` payload.
#[derive(Debug)]
pub enum MetadataPayload {
    /// A piece of the dictionary: `<bencoded header><raw bytes>`.
    Data { piece: u32, data: Bytes },
    /// The peer refuses to serve the piece.
    Reject { piece: u32 },
    /// A request or unknown msg_type; leeches ignore these.
    Other,
}

/// Decodes a `ut_metadata` payload. The piece bytes of a data message are
/// whatever follows the bencoded header.
pub fn parse_metadata_payload(payload: &[u8]) -> Result<MetadataPayload, LeechError> {
    let (header, consumed) = decode_prefix(payload)?;

    let msg_type = header
        .get(b"msg_type")
        .and_then(Value::as_integer)
        .ok_or(LeechError::ExtensionUnsupported)?;
    let piece = header
        .get(b"piece")
        .and_then(Value::as_integer)
        .filter(|p| (0..=u32::MAX as i64).contains(p))
        .map(|p| p as u32);

    Ok(match (msg_type, piece) {
        (MSG_TYPE_DATA, Some(piece)) => MetadataPayload::Data {
            piece,
            data: Bytes::copy_from_slice(&payload[consumed..]),
        },
        (MSG_TYPE_REJECT, Some(piece)) => MetadataPayload::Reject { piece },
        _ => MetadataPayload::Other,
    })
}
