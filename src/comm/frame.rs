use crate::error::CommError;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};

/// Largest frame a rank accepts from the wire (1 GiB)
pub const MAX_FRAME_BYTES: usize = 1 << 30;

/// Unit exchanged by every collective
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Frame {
    /// bincode-encoded payload
    Data(Vec<u8>),
    /// The run is over; `origin` is the rank that failed first
    Abort { origin: usize, reason: String },
}

impl Frame {
    pub fn is_abort(&self) -> bool {
        matches!(self, Frame::Abort { .. })
    }
}

fn io_error(peer: usize, e: std::io::Error) -> CommError {
    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => CommError::PeerUnreachable(peer),
        _ => CommError::Io { peer, source: e },
    }
}

/// Write one frame: `u32` little-endian body length, then the bincode body
pub fn write_frame<W: Write>(writer: &mut W, peer: usize, frame: &Frame) -> Result<(), CommError> {
    let body = bincode::serialize(frame)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(CommError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            body.len(),
            MAX_FRAME_BYTES
        )));
    }

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);

    writer.write_all(&buf).map_err(|e| io_error(peer, e))?;
    writer.flush().map_err(|e| io_error(peer, e))?;
    Ok(())
}

/// Read one frame written by `write_frame`
pub fn read_frame<R: Read>(reader: &mut R, peer: usize) -> Result<Frame, CommError> {
    read_frame_limited(reader, peer, MAX_FRAME_BYTES)
}

/// Read one frame, refusing bodies longer than `max_bytes` before allocating
pub fn read_frame_limited<R: Read>(
    reader: &mut R,
    peer: usize,
    max_bytes: usize,
) -> Result<Frame, CommError> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| io_error(peer, e))?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > max_bytes {
        return Err(CommError::Protocol(format!(
            "rank {} announced a {} byte frame (limit {})",
            peer, len, max_bytes
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| io_error(peer, e))?;
    Ok(bincode::deserialize(&body)?)
}
