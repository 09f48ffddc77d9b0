//! Collective communication between the ranks of a run.
//!
//! Ranks form a star around the coordinator (rank 0). Three collectives are
//! built on top of two primitive frame exchanges:
//!
//! - **broadcast**: the root computes a value and every rank receives it
//! - **gather**: every rank contributes a value; the root receives them in rank order
//! - **reduce**: gather followed by a left fold in rank order on the root
//!
//! A rank that fails locally never just leaves. Workers send an `Abort`
//! frame in place of their next contribution; the root forwards any abort
//! (or its own failure, or a lost peer) to every connected rank, and every
//! rank surfaces it as `CommError::Aborted`.

mod frame;
mod local;
mod tcp;


pub use frame::{read_frame, read_frame_limited, write_frame, Frame, MAX_FRAME_BYTES};
pub use local::{LocalCommunicator, LocalWorld};
pub use tcp::TcpCommunicator;

use crate::error::{CommError, EngineError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Rank of the coordinator
pub const ROOT: usize = 0;

/// Frame-level collective operations of one rank
pub trait Communicator: Send {
    /// This process's rank, `0..size`
    fn rank(&self) -> usize;

    /// Number of ranks in the run
    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// On the root, send `frame` to every other rank and return it.
    /// Elsewhere, `frame` is ignored and the root's frame is returned.
    fn broadcast_frame(&mut self, frame: Option<Frame>) -> Result<Frame, CommError>;

    /// Send `frame` towards the root. The root gets one frame per rank, in
    /// rank order, its own at index 0; other ranks get `None`.
    fn gather_frame(&mut self, frame: Frame) -> Result<Option<Vec<Frame>>, CommError>;

    /// Tell every reachable rank that the run is over. Best effort: failures
    /// to deliver are ignored, the peer is already gone.
    fn abort(&mut self, origin: usize, reason: &str);
}

fn encode<T: Serialize>(value: &T) -> Result<Frame, CommError> {
    Ok(Frame::Data(bincode::serialize(value)?))
}

fn decode<T: DeserializeOwned>(frame: Frame) -> Result<T, CommError> {
    match frame {
        Frame::Data(bytes) => Ok(bincode::deserialize(&bytes)?),
        Frame::Abort { origin, reason } => Err(CommError::Aborted { origin, reason }),
    }
}

/// Abort every peer on behalf of the root, then hand back the error
fn root_fail<C: Communicator + ?Sized>(comm: &mut C, origin: usize, err: EngineError) -> EngineError {
    let reason = match &err {
        EngineError::Comm(CommError::Aborted { reason, .. }) => reason.clone(),
        other => other.to_string(),
    };
    warn!(rank = comm.rank(), origin, %reason, "aborting run");
    comm.abort(origin, &reason);
    err
}

/// Broadcast a value computed on the root.
///
/// `compute` runs on the root only. If it fails, or the broadcast itself
/// fails, every other rank is aborted. Every rank returns the same value.
pub fn broadcast<C, T, F>(comm: &mut C, compute: F) -> Result<T, EngineError>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, EngineError>,
{
    if comm.is_root() {
        let value = match compute() {
            Ok(value) => value,
            Err(err) => return Err(root_fail(comm, ROOT, err)),
        };
        let frame = match encode(&value) {
            Ok(frame) => frame,
            Err(err) => return Err(root_fail(comm, ROOT, err.into())),
        };
        if let Err(err) = comm.broadcast_frame(Some(frame)) {
            return Err(root_fail(comm, ROOT, err.into()));
        }
        Ok(value)
    } else {
        let frame = comm.broadcast_frame(None)?;
        Ok(decode(frame)?)
    }
}

/// Gather one value per rank on the root, in rank order.
///
/// A rank passing `Err` aborts the whole run: workers send the abort to the
/// root, the root forwards it to everyone else.
pub fn gather<C, T>(comm: &mut C, local: Result<T, EngineError>) -> Result<Option<Vec<T>>, EngineError>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    let rank = comm.rank();

    if !comm.is_root() {
        let err = match local.and_then(|value| Ok(encode(&value)?)) {
            Ok(frame) => match comm.gather_frame(frame) {
                Ok(_) => return Ok(None),
                Err(err) => EngineError::from(err),
            },
            Err(err) => err,
        };
        if !err.is_remote_abort() {
            let reason = err.to_string();
            debug!(rank, %reason, "sending abort to root");
            // The root may already be gone; the local error is what matters.
            let _ = comm.gather_frame(Frame::Abort {
                origin: rank,
                reason,
            });
        }
        return Err(err);
    }

    // Peers never block on a send, so the root can abort without reading
    // their contributions first.
    let own = match local.and_then(|v| Ok(encode(&v)?)) {
        Ok(frame) => frame,
        Err(err) => return Err(root_fail(comm, ROOT, err)),
    };

    let frames = match comm.gather_frame(own) {
        Ok(Some(frames)) => frames,
        Ok(None) => {
            return Err(root_fail(
                comm,
                ROOT,
                CommError::Protocol("root received no gather result".to_string()).into(),
            ))
        }
        Err(err) => return Err(root_fail(comm, ROOT, err.into())),
    };

    let mut values = Vec::with_capacity(frames.len());
    for frame in frames {
        match decode(frame) {
            Ok(value) => values.push(value),
            Err(CommError::Aborted { origin, reason }) => {
                return Err(root_fail(
                    comm,
                    origin,
                    CommError::Aborted { origin, reason }.into(),
                ))
            }
            Err(err) => return Err(root_fail(comm, ROOT, err.into())),
        }
    }
    Ok(Some(values))
}

/// Gather, then fold the contributions left to right in rank order on the root.
///
/// The fold order is fixed, so the result does not depend on message arrival
/// order, and a strict comparison in `op` makes the lowest rank win ties.
pub fn reduce<C, T, F>(comm: &mut C, local: Result<T, EngineError>, op: F) -> Result<Option<T>, EngineError>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnMut(T, T) -> T,
{
    Ok(gather(comm, local)?.and_then(|values| values.into_iter().reduce(op)))
}
