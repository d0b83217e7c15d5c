use bytes::Bytes;

use crate::bencode::{decode, Value};

use super::error::LeechError;

/// One file of a torrent. Single-file torrents are normalized to a one-entry
/// list whose path is the torrent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Path inside the torrent, components joined with `/`.
    pub path: String,
    /// Size in bytes; never negative in a validated record.
    pub size: i64,
}

/// A verified, normalized metadata record, the crate's end product.
///
/// Immutable once produced: the leech only constructs it after the SHA-1 of
/// the reassembled info dictionary matched the info-hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub info_hash: [u8; 20],
    /// Torrent title: file name of a single-file torrent, root directory
    /// name of a multi-file one. NUL bytes are stripped.
    pub name: String,
    pub files: Vec<TorrentFile>,
    /// Sum of all file sizes; always positive.
    pub total_size: u64,
    /// Unix seconds at which the swarm was first seen by the leech.
    pub discovered_on: i64,
}

/// Parses and validates a verified info dictionary into a [`Metadata`].
///
/// Rejections mirror what a well-formed torrent must satisfy: UTF-8 name and
/// paths, non-negative file sizes, a positive total, and a `pieces` string
/// consistent with the piece length and the total length.
pub fn parse_info(
    info_hash: [u8; 20],
    raw: &[u8],
    discovered_on: i64,
) -> Result<Metadata, LeechError> {
    let value = decode(raw)?;
    let dict = value
        .as_dict()
        .ok_or(LeechError::InvalidInfo("not a dictionary"))?;

    let name = dict
        .get(b"name".as_slice())
        .and_then(Value::as_bytes)
        .map(strip_nul)
        .ok_or(LeechError::InvalidInfo("missing name"))?
        .ok_or(LeechError::InvalidInfo("name is not utf-8"))?;

    let files = match dict.get(b"length".as_slice()) {
        // Single-file form: the name is the path.
        Some(length) => {
            let size = length
                .as_integer()
                .ok_or(LeechError::InvalidInfo("length is not an integer"))?;
            vec![TorrentFile {
                path: name.clone(),
                size,
            }]
        }
        // Multi-file form: a list of {path: [components...], length}.
        None => dict
            .get(b"files".as_slice())
            .and_then(Value::as_list)
            .ok_or(LeechError::InvalidInfo("neither length nor files"))?
            .iter()
            .map(parse_file_entry)
            .collect::<Result<Vec<_>, _>>()?,
    };

    if files.is_empty() {
        return Err(LeechError::InvalidInfo("no files"));
    }
    let mut total_size: u64 = 0;
    for file in &files {
        if file.size < 0 {
            return Err(LeechError::InvalidInfo("file size less than zero"));
        }
        total_size = total_size
            .checked_add(file.size as u64)
            .ok_or(LeechError::InvalidInfo("total size overflows"))?;
    }
    if total_size == 0 {
        return Err(LeechError::InvalidInfo("zero total size"));
    }

    validate_pieces(dict.get(b"pieces".as_slice()), dict.get(b"piece length".as_slice()), total_size)?;

    Ok(Metadata {
        info_hash,
        name,
        files,
        total_size,
        discovered_on,
    })
}

fn parse_file_entry(entry: &Value) -> Result<TorrentFile, LeechError> {
    let dict = entry
        .as_dict()
        .ok_or(LeechError::InvalidInfo("file entry is not a dictionary"))?;

    let size = dict
        .get(b"length".as_slice())
        .and_then(Value::as_integer)
        .ok_or(LeechError::InvalidInfo("file entry without length"))?;

    let components = dict
        .get(b"path".as_slice())
        .and_then(Value::as_list)
        .ok_or(LeechError::InvalidInfo("file entry without path"))?;
    if components.is_empty() {
        return Err(LeechError::InvalidInfo("empty file path"));
    }

    let mut path = String::new();
    for component in components {
        let component = component
            .as_str()
            .ok_or(LeechError::InvalidInfo("path component is not utf-8"))?;
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(component);
    }

    Ok(TorrentFile { path, size })
}

/// The `pieces` string must hold one 20-byte SHA-1 per piece and agree with
/// the piece length and the total length.
fn validate_pieces(
    pieces: Option<&Value>,
    piece_length: Option<&Value>,
    total_size: u64,
) -> Result<(), LeechError> {
    let pieces = pieces
        .and_then(Value::as_bytes)
        .ok_or(LeechError::InvalidInfo("missing pieces"))?;
    if pieces.len() % 20 != 0 {
        return Err(LeechError::InvalidInfo("pieces has invalid length"));
    }

    let piece_length = piece_length
        .and_then(Value::as_integer)
        .filter(|len| *len > 0)
        .ok_or(LeechError::InvalidInfo("zero piece length"))? as u64;

    let expected = total_size.div_ceil(piece_length) as usize;
    if pieces.len() / 20 != expected {
        return Err(LeechError::InvalidInfo(
            "piece count and file lengths are at odds",
        ));
    }
    Ok(())
}

/// Strips NUL bytes and insists on UTF-8 for what remains.
fn strip_nul(bytes: &Bytes) -> Option<String> {
    let cleaned: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
    String::from_utf8(cleaned).ok()
}
