use std::{error::Error, fmt, io, time::Duration};

use comms::{CommsErr, Rank};

use crate::handler::HandlerErr;

/// The coordinator module's result type.
pub type Result<T> = std::result::Result<T, TopologyErr>;

/// Reasons the group couldn't be formed, all of them fatal at startup.
#[derive(Debug)]
pub enum ConnectionFailure {
    Bind { addr: String, source: io::Error },
    Accept(io::Error),
    Handshake(CommsErr),
    RankOutOfRange { rank: Rank, world_size: usize },
    DuplicateRank(Rank),
    WorldSizeMismatch { rank: Rank, got: usize, expected: usize },
    Timeout { connected: usize, expected: usize },
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            Self::Accept(e) => write!(f, "failed to accept a worker: {e}"),
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::RankOutOfRange { rank, world_size } => {
                write!(f, "rank {rank} is out of range for a world of size {world_size}")
            }
            Self::DuplicateRank(rank) => write!(f, "rank {rank} joined twice"),
            Self::WorldSizeMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "rank {rank} expects a world of size {got}, the coordinator expects {expected}"
            ),
            Self::Timeout {
                connected,
                expected,
            } => write!(
                f,
                "timed out waiting for the group, {connected} of {expected} workers joined"
            ),
        }
    }
}

/// Coordinator runtime failures.
#[derive(Debug)]
pub enum TopologyErr {
    Comms(CommsErr),
    ConnectionFailure(ConnectionFailure),
    Handler(HandlerErr),
    InvalidConfig(String),
    UnknownRank(Rank),
    SenderMismatch { expected: Rank, got: Rank },
    UntaggedUpdate { sender: Rank },
    RecvTimeout { waited: Duration },
    GroupClosed,
    GateClosed,
    AggregatorGone,
}

impl fmt::Display for TopologyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comms(e) => write!(f, "comms error: {e}"),
            Self::ConnectionFailure(e) => write!(f, "connection failure: {e}"),
            Self::Handler(e) => write!(f, "handler error: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::UnknownRank(rank) => write!(f, "there is no worker with rank {rank}"),
            Self::SenderMismatch { expected, got } => write!(
                f,
                "package from the link of rank {expected} claims to come from rank {got}"
            ),
            Self::UntaggedUpdate { sender } => {
                write!(f, "update from rank {sender} doesn't carry an epoch tag")
            }
            Self::RecvTimeout { waited } => {
                write!(f, "no package received after waiting {waited:?}")
            }
            Self::GroupClosed => f.write_str("every worker link is closed"),
            Self::GateClosed => f.write_str("the listening duty stopped before opening the epoch"),
            Self::AggregatorGone => f.write_str("the aggregation task is gone"),
        }
    }
}

impl Error for TopologyErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Comms(e) => Some(e),
            Self::Handler(e) => Some(e),
            Self::ConnectionFailure(ConnectionFailure::Bind { source, .. }) => Some(source),
            Self::ConnectionFailure(ConnectionFailure::Accept(e)) => Some(e),
            Self::ConnectionFailure(ConnectionFailure::Handshake(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<CommsErr> for TopologyErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

impl From<HandlerErr> for TopologyErr {
    fn from(value: HandlerErr) -> Self {
        Self::Handler(value)
    }
}

impl From<ConnectionFailure> for TopologyErr {
    fn from(value: ConnectionFailure) -> Self {
        Self::ConnectionFailure(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<TopologyErr> for io::Error {
    fn from(value: TopologyErr) -> Self {
        match value {
            TopologyErr::Comms(e) => e.into(),
            TopologyErr::RecvTimeout { .. } => io::Error::new(io::ErrorKind::TimedOut, value),
            other => io::Error::other(other),
        }
    }
}
