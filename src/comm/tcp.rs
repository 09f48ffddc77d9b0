use super::frame::{read_frame, read_frame_limited, write_frame, Frame};
use super::{Communicator, ROOT};
use crate::config::WorldConfig;
use crate::error::{CommError, ConfigError, EngineError};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on a `Hello` frame; the token is the only variable part
const MAX_HELLO_BYTES: usize = 4096;

/// How long a worker whose send failed waits for the root's abort
const ABORT_GRACE: Duration = Duration::from_millis(500);

/// First message a worker sends after connecting
#[derive(Serialize, Deserialize, Debug)]
struct Hello {
    rank: usize,
    size: usize,
    token: String,
}

/// Coordinator's answer once every rank has joined
#[derive(Serialize, Deserialize, Debug)]
struct Welcome {
    size: usize,
}

enum TcpLink {
    Root {
        /// Indexed by `rank - 1`
        peers: Vec<TcpStream>,
    },
    Worker {
        root: TcpStream,
    },
}

/// Rank connected to the coordinator over TCP (star topology)
pub struct TcpCommunicator {
    rank: usize,
    size: usize,
    link: TcpLink,
}

impl TcpCommunicator {
    /// Bind (rank 0) or join (other ranks) the world described by `world`
    pub fn connect(world: &WorldConfig) -> Result<Self, EngineError> {
        world.validate()?;
        if world.is_coordinator() {
            let listener = TcpListener::bind(world.coordinator).map_err(|e| CommError::Io {
                peer: ROOT,
                source: e,
            })?;
            Self::serve(listener, world)
        } else {
            Self::join(world)
        }
    }

    /// Accept `size - 1` workers on an already bound listener
    pub fn serve(listener: TcpListener, world: &WorldConfig) -> Result<Self, EngineError> {
        world.validate()?;
        let io = |e: std::io::Error| CommError::Io {
            peer: ROOT,
            source: e,
        };

        info!(
            rank = ROOT,
            size = world.size,
            addr = ?listener.local_addr().ok(),
            "waiting for workers"
        );

        let mut slots: Vec<Option<TcpStream>> = (1..world.size).map(|_| None).collect();
        let mut joined = 0;
        let deadline = Instant::now() + world.connect_timeout;
        listener.set_nonblocking(true).map_err(io)?;

        while joined < slots.len() {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    stream.set_nonblocking(false).map_err(io)?;

                    let mut reader = HandshakeReader {
                        stream: &mut stream,
                        deadline,
                    };
                    let hello: Hello = match read_frame_limited(&mut reader, ROOT, MAX_HELLO_BYTES) {
                        Ok(Frame::Data(bytes)) => match bincode::deserialize(&bytes) {
                            Ok(hello) => hello,
                            Err(e) => {
                                warn!(%addr, error = %e, "ignoring connection with a malformed hello");
                                continue;
                            }
                        },
                        Ok(Frame::Abort { origin, reason }) => {
                            warn!(%addr, origin, %reason, "connection aborted during handshake");
                            continue;
                        }
                        Err(e) => {
                            warn!(%addr, error = %e, "ignoring connection that never said hello");
                            continue;
                        }
                    };

                    if hello.token != world.token {
                        warn!(%addr, rank = hello.rank, "rejecting worker with wrong run token");
                        let _ = write_frame(
                            &mut stream,
                            hello.rank,
                            &Frame::Abort {
                                origin: ROOT,
                                reason: "run token mismatch".to_string(),
                            },
                        );
                        continue;
                    }

                    let fatal = if hello.size != world.size {
                        Some(format!(
                            "rank {} was launched with world size {}, coordinator has {}",
                            hello.rank, hello.size, world.size
                        ))
                    } else if hello.rank == ROOT || hello.rank >= world.size {
                        Some(
                            ConfigError::RankOutOfRange {
                                rank: hello.rank,
                                size: world.size,
                            }
                            .to_string(),
                        )
                    } else if slots[hello.rank - 1].is_some() {
                        Some(format!("rank {} joined twice", hello.rank))
                    } else {
                        None
                    };

                    if let Some(reason) = fatal {
                        let _ = write_frame(
                            &mut stream,
                            hello.rank,
                            &Frame::Abort {
                                origin: ROOT,
                                reason: reason.clone(),
                            },
                        );
                        abort_streams(slots.iter_mut().flatten(), &reason);
                        return Err(CommError::Protocol(reason).into());
                    }

                    stream.set_read_timeout(None).map_err(io)?;
                    stream.set_nodelay(true).map_err(io)?;
                    debug!(rank = hello.rank, %addr, "worker joined");
                    slots[hello.rank - 1] = Some(stream);
                    joined += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        let missing = slots.iter().position(Option::is_none).unwrap_or(0) + 1;
                        let reason = format!(
                            "rank {} did not join within {:?}",
                            missing, world.connect_timeout
                        );
                        abort_streams(slots.iter_mut().flatten(), &reason);
                        return Err(CommError::PeerUnreachable(missing).into());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(io(e).into()),
            }
        }

        let mut peers: Vec<TcpStream> = slots.into_iter().flatten().collect();
        let welcome = Frame::Data(
            bincode::serialize(&Welcome { size: world.size }).map_err(CommError::from)?,
        );
        for i in 0..peers.len() {
            if let Err(err) = write_frame(&mut peers[i], i + 1, &welcome) {
                abort_streams(peers.iter_mut(), &err.to_string());
                return Err(err.into());
            }
        }

        info!(rank = ROOT, size = world.size, "all workers joined");
        Ok(Self {
            rank: ROOT,
            size: world.size,
            link: TcpLink::Root { peers },
        })
    }

    /// Connect to the coordinator, retrying until `connect_timeout` runs out
    pub fn join(world: &WorldConfig) -> Result<Self, EngineError> {
        world.validate()?;
        let deadline = Instant::now() + world.connect_timeout;

        let mut stream = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CommError::PeerUnreachable(ROOT).into());
            }
            match TcpStream::connect_timeout(&world.coordinator, remaining) {
                Ok(stream) => break stream,
                Err(e) => {
                    debug!(rank = world.rank, error = %e, "coordinator not reachable yet");
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let io = |e: std::io::Error| CommError::Io {
            peer: ROOT,
            source: e,
        };
        stream.set_nodelay(true).map_err(io)?;

        let hello = Hello {
            rank: world.rank,
            size: world.size,
            token: world.token.clone(),
        };
        write_frame(
            &mut stream,
            ROOT,
            &Frame::Data(bincode::serialize(&hello).map_err(CommError::from)?),
        )?;

        // The coordinator answers once the last rank has joined.
        stream
            .set_read_timeout(Some(world.connect_timeout))
            .map_err(io)?;
        let welcome: Welcome = match read_frame(&mut stream, ROOT)? {
            Frame::Data(bytes) => bincode::deserialize(&bytes).map_err(CommError::from)?,
            Frame::Abort { origin, reason } => {
                return Err(CommError::Aborted { origin, reason }.into())
            }
        };
        stream.set_read_timeout(None).map_err(io)?;

        if welcome.size != world.size {
            return Err(CommError::Protocol(format!(
                "coordinator runs a world of {}, this rank expects {}",
                welcome.size, world.size
            ))
            .into());
        }

        info!(rank = world.rank, size = world.size, "joined coordinator");
        Ok(Self {
            rank: world.rank,
            size: world.size,
            link: TcpLink::Worker { root: stream },
        })
    }
}

/// Look for an abort the root sent before the link broke
fn pending_abort(root: &mut TcpStream) -> Option<CommError> {
    root.set_read_timeout(Some(ABORT_GRACE)).ok()?;
    match read_frame(root, ROOT) {
        Ok(Frame::Abort { origin, reason }) => Some(CommError::Aborted { origin, reason }),
        _ => None,
    }
}

/// Reads from a handshake stream, failing once `deadline` has passed however
/// slowly the peer sends.
struct HandshakeReader<'a> {
    stream: &'a mut TcpStream,
    deadline: Instant,
}

impl Read for HandshakeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(std::io::Error::new(
                ErrorKind::TimedOut,
                "handshake deadline passed",
            ));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        self.stream.read(buf)
    }
}

fn abort_streams<'a>(streams: impl Iterator<Item = &'a mut TcpStream>, reason: &str) {
    let frame = Frame::Abort {
        origin: ROOT,
        reason: reason.to_string(),
    };
    for stream in streams {
        let _ = write_frame(stream, ROOT, &frame);
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_frame(&mut self, frame: Option<Frame>) -> Result<Frame, CommError> {
        match &mut self.link {
            TcpLink::Root { peers } => {
                let frame = frame.ok_or_else(|| {
                    CommError::Protocol("root broadcast without a frame".to_string())
                })?;
                for (i, stream) in peers.iter_mut().enumerate() {
                    write_frame(stream, i + 1, &frame)?;
                }
                Ok(frame)
            }
            TcpLink::Worker { root } => read_frame(root, ROOT),
        }
    }

    fn gather_frame(&mut self, frame: Frame) -> Result<Option<Vec<Frame>>, CommError> {
        match &mut self.link {
            TcpLink::Root { peers } => {
                let mut frames = Vec::with_capacity(peers.len() + 1);
                frames.push(frame);
                for (i, stream) in peers.iter_mut().enumerate() {
                    frames.push(read_frame(stream, i + 1)?);
                }
                Ok(Some(frames))
            }
            TcpLink::Worker { root } => {
                if let Err(err) = write_frame(root, ROOT, &frame) {
                    return Err(pending_abort(root).unwrap_or(err));
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
        match &mut self.link {
            TcpLink::Root { peers } => {
                for (i, stream) in peers.iter_mut().enumerate() {
                    let _ = write_frame(stream, i + 1, &frame);
                }
            }
            TcpLink::Worker { root } => {
                let _ = write_frame(root, ROOT, &frame);
            }
        }
    }
}
