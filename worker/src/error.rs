use std::{error::Error, fmt, io};

use comms::{CommsErr, MessageCode};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Comms(CommsErr),
    ConnectionFailure {
        addr: String,
        detail: String,
    },
    InvalidConfig(String),
    UnexpectedMessage {
        round: usize,
        got: MessageCode,
    },
    Training {
        round: usize,
        source: Box<dyn Error + Send + Sync>,
    },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Comms(e) => write!(f, "comms error: {e}"),
            WorkerErr::ConnectionFailure { addr, detail } => {
                write!(f, "failed to join the group at {addr}: {detail}")
            }
            WorkerErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            WorkerErr::UnexpectedMessage { round, got } => {
                write!(f, "unexpected message at round {round}: got {got}")
            }
            WorkerErr::Training { round, source } => {
                write!(f, "training failed at round {round}: {source}")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Comms(e) => Some(e),
            WorkerErr::Training { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CommsErr> for WorkerErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            WorkerErr::Comms(e) => e.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
