use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN,
    error::{CommsErr, Result},
    package::Package,
};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    /// Waits to receive the next package from the inner reader.
    ///
    /// # Returns
    /// The decoded package, `Disconnected` if the peer closed the stream before
    /// a new frame started, or the reason the frame couldn't be read or decoded.
    pub async fn recv(&mut self) -> Result<Package> {
        let mut size_buf = [0; LEN_TYPE_SIZE];

        if let Err(e) = self.rx.read_exact(&mut size_buf).await {
            return match e.kind() {
                io::ErrorKind::UnexpectedEof => Err(CommsErr::Disconnected),
                _ => Err(e.into()),
            };
        }

        let len = LenType::from_be_bytes(size_buf);
        if len > MAX_FRAME_LEN as LenType {
            return Err(CommsErr::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        self.buf.resize(len as usize, 0);
        self.rx.read_exact(&mut self.buf).await?;

        Package::decode(&self.buf)
    }
}
