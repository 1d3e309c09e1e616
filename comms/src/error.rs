use std::{error::Error, fmt, io};

use crate::code::MessageCode;

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Failures while framing, decoding or interpreting packages.
#[derive(Debug)]
pub enum CommsErr {
    Io(io::Error),
    /// The peer closed the stream at a frame boundary.
    Disconnected,
    TruncatedPackage {
        needed: usize,
        available: usize,
    },
    ShapeMismatch {
        got: usize,
        expected: usize,
    },
    InvalidShape {
        shape: Vec<usize>,
        elements: usize,
    },
    TrailingBytes {
        left: usize,
    },
    FrameTooLarge {
        len: u64,
        max: usize,
    },
    UnexpectedLayout {
        code: MessageCode,
        tensors: usize,
    },
    BadHandshake(String),
    /// A header field doesn't fit in its 32 bit slot.
    HeaderOverflow {
        value: usize,
    },
}

impl fmt::Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::Io(e) => write!(f, "io error: {e}"),
            CommsErr::Disconnected => f.write_str("the peer closed the connection"),
            CommsErr::TruncatedPackage { needed, available } => write!(
                f,
                "truncated package: needed {needed} more bytes, only {available} available"
            ),
            CommsErr::ShapeMismatch { got, expected } => write!(
                f,
                "parameter length mismatch: got {got}, expected {expected}"
            ),
            CommsErr::InvalidShape { shape, elements } => write!(
                f,
                "tensor shape {shape:?} doesn't describe {elements} elements"
            ),
            CommsErr::TrailingBytes { left } => {
                write!(f, "package has {left} unread trailing bytes")
            }
            CommsErr::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds the maximum of {max}")
            }
            CommsErr::UnexpectedLayout { code, tensors } => write!(
                f,
                "a {code} package can't carry {tensors} tensors in that layout"
            ),
            CommsErr::BadHandshake(detail) => write!(f, "bad handshake: {detail}"),
            CommsErr::HeaderOverflow { value } => {
                write!(f, "header field {value} doesn't fit in 32 bits")
            }
        }
    }
}

impl Error for CommsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommsErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommsErr> for io::Error {
    fn from(value: CommsErr) -> Self {
        match value {
            CommsErr::Io(e) => e,
            CommsErr::Disconnected => io::Error::new(io::ErrorKind::UnexpectedEof, value),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
