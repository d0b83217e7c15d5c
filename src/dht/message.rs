use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::bencode::{decode, encode, Value};

use super::error::DhtError;
use super::node::{parse_compact_nodes, parse_compact_nodes6, parse_compact_peers, NodeId};

/// KRPC transaction id. Ours are 2 bytes big-endian; whatever a correspondent
/// sends is echoed back verbatim, regardless of length.
pub type TransactionId = Bytes;

/// Generic error answered to queries whose method we do not implement.
pub const ERR_METHOD_UNKNOWN: (i64, &str) = (204, "Method Unknown");

/// A query received from (or sent to) the network.
#[derive(Debug, Clone)]
pub enum Query {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: [u8; 20],
    },
    AnnouncePeer {
        info_hash: [u8; 20],
        port: u16,
        implied_port: bool,
    },
    /// A method we do not speak; answered with `204 Method Unknown`.
    Other,
}

/// The flattened `r` dictionary of a response.
///
/// KRPC responses do not name the query they answer, so the fields of all
/// response kinds live side by side and the correlation happens via the
/// transaction id at the service layer.
#[derive(Debug, Clone, Default)]
pub struct ResponseBody {
    pub id: Option<NodeId>,
    pub nodes: Vec<(NodeId, SocketAddr)>,
    pub values: Vec<SocketAddr>,
    pub token: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub enum MessageKind {
    Query { sender: Option<NodeId>, query: Query },
    Response(ResponseBody),
    Error { code: i64, message: String },
}

/// One KRPC message, either direction.
#[derive(Debug, Clone)]
pub struct Message {
    pub transaction_id: TransactionId,
    pub kind: MessageKind,
}

impl Message {
    // ------------------------------------------------------------------
    // Outgoing queries
    // ------------------------------------------------------------------

    pub fn find_node_query(tid: TransactionId, id: NodeId, target: NodeId) -> Self {
        Self {
            transaction_id: tid,
            kind: MessageKind::Query {
                sender: Some(id),
                query: Query::FindNode { target },
            },
        }
    }

    pub fn get_peers_query(tid: TransactionId, id: NodeId, info_hash: [u8; 20]) -> Self {
        Self {
            transaction_id: tid,
            kind: MessageKind::Query {
                sender: Some(id),
                query: Query::GetPeers { info_hash },
            },
        }
    }

    // ------------------------------------------------------------------
    // Outgoing responses
    // ------------------------------------------------------------------

    /// Answer to `ping`, `find_node` and `announce_peer`: our id, plus an
    /// empty `nodes` string on the wire. We must answer to stay in our
    /// correspondents' routing tables, but we never hand out routing data.
    pub fn plain_response(tid: TransactionId, id: NodeId) -> Self {
        Self {
            transaction_id: tid,
            kind: MessageKind::Response(ResponseBody {
                id: Some(id),
                ..ResponseBody::default()
            }),
        }
    }

    /// Answer to `get_peers`: a synthesized token with empty `values`, so
    /// the querier comes back with `announce_peer` instead of real peers.
    pub fn token_response(tid: TransactionId, id: NodeId, token: Bytes) -> Self {
        Self {
            transaction_id: tid,
            kind: MessageKind::Response(ResponseBody {
                id: Some(id),
                token: Some(token),
                ..ResponseBody::default()
            }),
        }
    }

    pub fn error(tid: TransactionId, code: i64, message: &str) -> Self {
        Self {
            transaction_id: tid,
            kind: MessageKind::Error {
                code,
                message: message.to_string(),
            },
        }
    }

    pub fn method_unknown(tid: TransactionId) -> Self {
        Self::error(tid, ERR_METHOD_UNKNOWN.0, ERR_METHOD_UNKNOWN.1)
    }

    // ------------------------------------------------------------------
    // Wire codec
    // ------------------------------------------------------------------

    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;
        let dict = value
            .as_dict()
            .ok_or(DhtError::InvalidMessage("not a dictionary"))?;

        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(Value::as_bytes)
            .cloned()
            .ok_or(DhtError::InvalidMessage("missing transaction id"))?;

        let kind = match dict.get(b"y".as_slice()).and_then(Value::as_str) {
            Some("q") => parse_query(dict)?,
            Some("r") => parse_response(dict)?,
            Some("e") => parse_error(dict)?,
            _ => return Err(DhtError::InvalidMessage("missing or unknown y key")),
        };

        Ok(Self {
            transaction_id,
            kind,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dict = BTreeMap::new();
        dict.insert(
            Bytes::from_static(b"t"),
            Value::Bytes(self.transaction_id.clone()),
        );

        match &self.kind {
            MessageKind::Query { sender, query } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("q"));

                let mut args = BTreeMap::new();
                if let Some(id) = sender {
                    args.insert(Bytes::from_static(b"id"), bytes_value(id.as_bytes()));
                }

                let name = match query {
                    Query::Ping | Query::Other => "ping",
                    Query::FindNode { target } => {
                        args.insert(Bytes::from_static(b"target"), bytes_value(target.as_bytes()));
                        "find_node"
                    }
                    Query::GetPeers { info_hash } => {
                        args.insert(Bytes::from_static(b"info_hash"), bytes_value(info_hash));
                        "get_peers"
                    }
                    Query::AnnouncePeer {
                        info_hash,
                        port,
                        implied_port,
                    } => {
                        args.insert(Bytes::from_static(b"info_hash"), bytes_value(info_hash));
                        args.insert(Bytes::from_static(b"port"), Value::Integer(*port as i64));
                        if *implied_port {
                            args.insert(Bytes::from_static(b"implied_port"), Value::Integer(1));
                        }
                        "announce_peer"
                    }
                };

                dict.insert(Bytes::from_static(b"q"), Value::string(name));
                dict.insert(Bytes::from_static(b"a"), Value::Dict(args));
            }
            MessageKind::Response(body) => {
                dict.insert(Bytes::from_static(b"y"), Value::string("r"));

                let mut resp = BTreeMap::new();
                if let Some(id) = &body.id {
                    resp.insert(Bytes::from_static(b"id"), bytes_value(id.as_bytes()));
                }
                if let Some(token) = &body.token {
                    resp.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
                    // get_peers responses must carry values or nodes; we
                    // offer neither, so an empty values list goes out.
                    resp.insert(Bytes::from_static(b"values"), Value::List(Vec::new()));
                }
                if body.token.is_none() {
                    // find_node answers carry a nodes string, empty for us.
                    resp.insert(Bytes::from_static(b"nodes"), Value::Bytes(Bytes::new()));
                }
                dict.insert(Bytes::from_static(b"r"), Value::Dict(resp));
            }
            MessageKind::Error { code, message } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("e"));
                dict.insert(
                    Bytes::from_static(b"e"),
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                );
            }
        }

        encode(&Value::Dict(dict))
    }
}

fn bytes_value(bytes: &[u8]) -> Value {
    Value::Bytes(Bytes::copy_from_slice(bytes))
}

fn parse_query(dict: &BTreeMap<Bytes, Value>) -> Result<MessageKind, DhtError> {
    let name = dict
        .get(b"q".as_slice())
        .and_then(Value::as_str)
        .ok_or(DhtError::InvalidMessage("missing query name"))?;

    let args = dict
        .get(b"a".as_slice())
        .and_then(Value::as_dict)
        .ok_or(DhtError::InvalidMessage("missing query args"))?;

    let sender = args
        .get(b"id".as_slice())
        .and_then(Value::as_bytes)
        .and_then(|b| NodeId::from_bytes(b).ok());

    let query = match name {
        "ping" => Query::Ping,
        "find_node" => {
            let target = args
                .get(b"target".as_slice())
                .and_then(Value::as_bytes)
                .and_then(|b| NodeId::from_bytes(b).ok())
                .ok_or(DhtError::InvalidMessage("missing target"))?;
            Query::FindNode { target }
        }
        "get_peers" => Query::GetPeers {
            info_hash: info_hash_arg(args)?,
        },
        "announce_peer" => {
            let port = args
                .get(b"port".as_slice())
                .and_then(Value::as_integer)
                .filter(|p| (0..=u16::MAX as i64).contains(p))
                .ok_or(DhtError::InvalidMessage("missing or invalid port"))?;
            let implied_port = args
                .get(b"implied_port".as_slice())
                .and_then(Value::as_integer)
                .map(|v| v != 0)
                .unwrap_or(false);
            Query::AnnouncePeer {
                info_hash: info_hash_arg(args)?,
                port: port as u16,
                implied_port,
            }
        }
        _ => Query::Other,
    };

    Ok(MessageKind::Query { sender, query })
}

fn info_hash_arg(args: &BTreeMap<Bytes, Value>) -> Result<[u8; 20], DhtError> {
    args.get(b"info_hash".as_slice())
        .and_then(Value::as_bytes)
        .filter(|b| b.len() == 20)
        .map(|b| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(b);
            hash
        })
        .ok_or(DhtError::InvalidMessage("missing info_hash"))
}

fn parse_response(dict: &BTreeMap<Bytes, Value>) -> Result<MessageKind, DhtError> {
    let resp = dict
        .get(b"r".as_slice())
        .and_then(Value::as_dict)
        .ok_or(DhtError::InvalidMessage("missing response dict"))?;

    let mut body = ResponseBody {
        id: resp
            .get(b"id".as_slice())
            .and_then(Value::as_bytes)
            .and_then(|b| NodeId::from_bytes(b).ok()),
        ..ResponseBody::default()
    };

    if let Some(nodes) = resp.get(b"nodes".as_slice()).and_then(Value::as_bytes) {
        body.nodes = parse_compact_nodes(nodes);
    }
    if let Some(nodes6) = resp.get(b"nodes6".as_slice()).and_then(Value::as_bytes) {
        body.nodes.extend(parse_compact_nodes6(nodes6));
    }
    if let Some(values) = resp.get(b"values".as_slice()).and_then(Value::as_list) {
        body.values = parse_compact_peers(values);
    }
    body.token = resp
        .get(b"token".as_slice())
        .and_then(Value::as_bytes)
        .cloned();

    Ok(MessageKind::Response(body))
}

fn parse_error(dict: &BTreeMap<Bytes, Value>) -> Result<MessageKind, DhtError> {
    let list = dict
        .get(b"e".as_slice())
        .and_then(Value::as_list)
        .ok_or(DhtError::InvalidMessage("missing error list"))?;

    Ok(MessageKind::Error {
        code: list.first().and_then(Value::as_integer).unwrap_or(0),
        message: list
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    })
}
