use super::{Communicator, Frame, ROOT};
use crate::error::{CommError, ConfigError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread;

enum LocalLink {
    Root {
        /// Indexed by `rank - 1`
        to_peers: Vec<Sender<Frame>>,
        from_peers: Vec<Receiver<Frame>>,
    },
    Worker {
        to_root: Sender<Frame>,
        from_root: Receiver<Frame>,
    },
}

/// In-process rank connected to its world through channels.
///
/// Dropping a communicator disconnects its channels, which its peers observe
/// as `CommError::PeerUnreachable`, the same way a TCP peer exiting looks.
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    link: LocalLink,
}

/// Builder for a set of in-process ranks
pub struct LocalWorld;

impl LocalWorld {
    /// Create `size` connected communicators, returned in rank order
    pub fn new(size: usize) -> Result<Vec<LocalCommunicator>, ConfigError> {
        if size == 0 {
            return Err(ConfigError::EmptyWorld);
        }

        let mut to_peers = Vec::with_capacity(size - 1);
        let mut from_peers = Vec::with_capacity(size - 1);
        let mut workers = Vec::with_capacity(size - 1);

        for rank in 1..size {
            let (down_tx, down_rx) = unbounded();
            let (up_tx, up_rx) = unbounded();
            to_peers.push(down_tx);
            from_peers.push(up_rx);
            workers.push(LocalCommunicator {
                rank,
                size,
                link: LocalLink::Worker {
                    to_root: up_tx,
                    from_root: down_rx,
                },
            });
        }

        let mut world = Vec::with_capacity(size);
        world.push(LocalCommunicator {
            rank: ROOT,
            size,
            link: LocalLink::Root {
                to_peers,
                from_peers,
            },
        });
        world.extend(workers);
        Ok(world)
    }

    /// Run `f` once per rank, each on its own thread, and collect the
    /// results in rank order.
    pub fn run<T, F>(size: usize, f: F) -> Result<Vec<T>, ConfigError>
    where
        T: Send,
        F: Fn(LocalCommunicator) -> T + Sync,
    {
        let world = Self::new(size)?;
        let f = &f;
        Ok(thread::scope(|scope| {
            let handles: Vec<_> = world
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(value) => value,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        }))
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_frame(&mut self, frame: Option<Frame>) -> Result<Frame, CommError> {
        match &self.link {
            LocalLink::Root { to_peers, .. } => {
                let frame = frame.ok_or_else(|| {
                    CommError::Protocol("root broadcast without a frame".to_string())
                })?;
                for (i, tx) in to_peers.iter().enumerate() {
                    tx.send(frame.clone())
                        .map_err(|_| CommError::PeerUnreachable(i + 1))?;
                }
                Ok(frame)
            }
            LocalLink::Worker { from_root, .. } => from_root
                .recv()
                .map_err(|_| CommError::PeerUnreachable(ROOT)),
        }
    }

    fn gather_frame(&mut self, frame: Frame) -> Result<Option<Vec<Frame>>, CommError> {
        match &self.link {
            LocalLink::Root { from_peers, .. } => {
                let mut frames = Vec::with_capacity(self.size);
                frames.push(frame);
                for (i, rx) in from_peers.iter().enumerate() {
                    let peer = rx.recv().map_err(|_| CommError::PeerUnreachable(i + 1))?;
                    frames.push(peer);
                }
                Ok(Some(frames))
            }
            LocalLink::Worker { to_root, from_root } => {
                if to_root.send(frame).is_err() {
                    // The root left; it may have told us why before it did.
                    let abort = from_root.try_iter().find_map(|frame| match frame {
                        Frame::Abort { origin, reason } => Some(CommError::Aborted { origin, reason }),
                        Frame::Data(_) => None,
                    });
                    return Err(abort.unwrap_or(CommError::PeerUnreachable(ROOT)));
                }
                Ok(None)
            }
        }
    }

    fn abort(&mut self, origin: usize, reason: &str) {
        let frame = Frame::Abort {
            origin,
            reason: reason.to_string(),
        };
        match &self.link {
            LocalLink::Root { to_peers, .. } => {
                for tx in to_peers {
                    let _ = tx.send(frame.clone());
                }
            }
            LocalLink::Worker { to_root, .. } => {
                let _ = to_root.send(frame);
            }
        }
    }
}
