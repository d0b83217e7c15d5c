use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::constants::{
    EXTENSION_HANDSHAKE_ID, HANDSHAKE_LEN, MAX_METADATA_SIZE, MAX_WIRE_MESSAGE, MSG_EXTENDED,
    METADATA_PIECE_SIZE,
};

use super::error::LeechError;
use super::info::{parse_info, Metadata};
use super::peer_id::PeerId;
use super::wire::{
    extended_message, extension_handshake, metadata_request, parse_extension_handshake,
    parse_metadata_payload, Handshake, MetadataPayload,
};

/// One attempt to pull the info dictionary for `info_hash` out of a single
/// peer, bounded by a total deadline.
///
/// The session is strictly one-shot: connect, handshake, `ut_metadata`
/// handshake, request every piece in order, verify, disconnect. Anything the
/// peer sends that is not part of that script (keepalives, choke traffic,
/// unknown extensions) is ignored.
pub struct Leech {
    info_hash: [u8; 20],
    peer: SocketAddr,
    peer_id: PeerId,
}

impl Leech {
    pub fn new(info_hash: [u8; 20], peer: SocketAddr, peer_id: PeerId) -> Self {
        Self {
            info_hash,
            peer,
            peer_id,
        }
    }

    /// Runs the session to completion or to `deadline`, whichever comes
    /// first. The deadline covers everything including the TCP connect; on
    /// expiry the connection is dropped and [`LeechError::Timeout`] is
    /// returned.
    pub async fn run(self, deadline: Instant) -> Result<Metadata, LeechError> {
        match tokio::time::timeout_at(deadline.into(), self.session()).await {
            Ok(result) => result,
            Err(_) => Err(LeechError::Timeout),
        }
    }

    async fn session(self) -> Result<Metadata, LeechError> {
        let stream = TcpStream::connect(self.peer)
            .await
            .map_err(LeechError::Connect)?;
        let mut wire = WireStream::new(stream);

        // 68-byte handshakes, ours first.
        let ours = Handshake::new(self.info_hash, *self.peer_id.as_bytes());
        wire.write_all(&ours.encode()).await?;
        let theirs = wire.read_handshake().await?;
        if theirs.info_hash != self.info_hash {
            return Err(LeechError::InfoHashMismatch);
        }
        if !theirs.supports_extensions() {
            return Err(LeechError::ExtensionUnsupported);
        }

        // Extension handshakes; wait for theirs to learn the metadata size
        // and their ut_metadata id.
        let payload = extension_handshake();
        wire.write_all(&extended_message(EXTENSION_HANDSHAKE_ID, &payload)?)
            .await?;
        let (ut_metadata, metadata_size) = loop {
            let (ext_id, payload) = wire.read_extended().await?;
            if ext_id != EXTENSION_HANDSHAKE_ID {
                continue;
            }
            let extensions = parse_extension_handshake(&payload)?;
            let ut_metadata = extensions
                .ut_metadata
                .ok_or(LeechError::ExtensionUnsupported)?;
            let metadata_size = extensions.metadata_size.unwrap_or(0);
            if metadata_size <= 0 || metadata_size as usize > MAX_METADATA_SIZE {
                return Err(LeechError::InvalidMetadataSize(metadata_size));
            }
            break (ut_metadata, metadata_size as usize);
        };

        let piece_count = metadata_size.div_ceil(METADATA_PIECE_SIZE);
        trace!(
            peer = %self.peer,
            metadata_size,
            piece_count,
            "fetching metadata"
        );

        // Request everything up front; peers answer in their own order but
        // assembly is strictly by index.
        for piece in 0..piece_count {
            wire.write_all(&metadata_request(ut_metadata, piece as u32)?)
                .await?;
        }

        let mut pieces: Vec<Option<Bytes>> = vec![None; piece_count];
        let mut remaining = piece_count;
        while remaining > 0 {
            let (ext_id, payload) = wire.read_extended().await?;
            // Their handshake id is 0 and anything we did not negotiate is
            // noise; only messages tagged with our local id matter.
            if ext_id != crate::constants::UT_METADATA_LOCAL_ID {
                continue;
            }

            match parse_metadata_payload(&payload)? {
                MetadataPayload::Data { piece, data } => {
                    let index = piece as usize;
                    if index >= piece_count || data.len() > METADATA_PIECE_SIZE {
                        return Err(LeechError::PieceTooLarge(piece));
                    }
                    let expected = piece_size(index, piece_count, metadata_size);
                    if data.len() != expected {
                        return Err(LeechError::PieceTooLarge(piece));
                    }
                    if pieces[index].replace(data).is_none() {
                        remaining -= 1;
                    }
                }
                MetadataPayload::Reject { .. } => return Err(LeechError::ExtensionUnsupported),
                MetadataPayload::Other => {}
            }
        }

        // Reassemble in index order and verify content addressing.
        let mut dictionary = Vec::with_capacity(metadata_size);
        for piece in pieces.into_iter().flatten() {
            dictionary.extend_from_slice(&piece);
        }
        let digest: [u8; 20] = Sha1::digest(&dictionary).into();
        if digest != self.info_hash {
            return Err(LeechError::HashMismatch);
        }

        let discovered_on = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        parse_info(self.info_hash, &dictionary, discovered_on)
    }
}

fn piece_size(index: usize, piece_count: usize, metadata_size: usize) -> usize {
    if index + 1 == piece_count {
        metadata_size - index * METADATA_PIECE_SIZE
    } else {
        METADATA_PIECE_SIZE
    }
}

/// Length-prefixed framing over the TCP stream. Read errors surface as
/// [`LeechError::PeerClosed`]; the overall deadline lives in [`Leech::run`].
struct WireStream {
    stream: TcpStream,
    buf: BytesMut,
}

impl WireStream {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), LeechError> {
        self.stream
            .write_all(data)
            .await
            .map_err(|_| LeechError::PeerClosed)
    }

    async fn read_handshake(&mut self) -> Result<Handshake, LeechError> {
        self.fill_to(HANDSHAKE_LEN).await?;
        let data = self.buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    /// Reads frames until an extended message arrives and returns its
    /// extended id and payload. Keepalives and non-extended messages are
    /// skipped.
    async fn read_extended(&mut self) -> Result<(u8, Bytes), LeechError> {
        loop {
            self.fill_to(4).await?;
            let length = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;

            // Keepalive.
            if length == 0 {
                let _ = self.buf.split_to(4);
                continue;
            }
            if length > MAX_WIRE_MESSAGE {
                return Err(LeechError::PieceTooLarge(0));
            }

            self.fill_to(4 + length).await?;
            let frame = self.buf.split_to(4 + length).freeze().slice(4..);

            if frame[0] != MSG_EXTENDED || frame.len() < 2 {
                continue;
            }
            return Ok((frame[1], frame.slice(2..)));
        }
    }

    async fn fill_to(&mut self, len: usize) -> Result<(), LeechError> {
        while self.buf.len() < len {
            let read = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .map_err(|_| LeechError::PeerClosed)?;
            if read == 0 {
                return Err(LeechError::PeerClosed);
            }
        }
        Ok(())
    }
}
