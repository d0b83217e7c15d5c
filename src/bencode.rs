//! Bencoding (BEP-3).
//!
//! Both sides of the crate speak bencode: KRPC messages on the DHT side and
//! extension-protocol payloads on the BitTorrent side. The `ut_metadata`
//! data message appends raw piece bytes after a bencoded dictionary, so the
//! decoder exposes [`decode_prefix`], which reports how much of the input it
//! consumed and leaves the surplus to the caller.
//!
//! Dictionaries are kept in a `BTreeMap` with byte-string keys, which makes
//! the encoder emit keys in lexicographic order without a sorting pass and
//! guarantees that equal values encode to identical bytes.

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;
