//! The implementation of the sending end of the application layer protocol.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Rank,
    error::{CommsErr, Result},
    package::Package,
};

/// The sending end handle of the communication.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
    rank: Rank,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    /// * `rank` - The rank stamped as the sender of every package.
    pub(super) fn new(tx: W, rank: Rank) -> Self {
        Self {
            tx,
            buf: Vec::new(),
            rank,
        }
    }

    /// The rank this sender stamps on it's packages.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Sends `pkg` through the inner writer.
    ///
    /// The header is written first, then every tensor's payload is written
    /// straight from the package without being copied.
    ///
    /// # Arguments
    /// * `pkg` - The package to send.
    ///
    /// # Returns
    /// A `FrameTooLarge` error if the package exceeds the frame limit or the io error if the write failed.
    pub async fn send(&mut self, pkg: &Package) -> Result<()> {
        let Self { tx, buf, rank } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);
        pkg.write_header(*rank, buf)?;

        let len = buf.len() - LEN_TYPE_SIZE + pkg.payload_len();
        if len > MAX_FRAME_LEN {
            return Err(CommsErr::FrameTooLarge {
                len: len as u64,
                max: MAX_FRAME_LEN,
            });
        }

        let header = (len as LenType).to_be_bytes();
        buf[..header.len()].copy_from_slice(&header);
        tx.write_all(buf).await?;

        for payload in pkg.payloads() {
            tx.write_all(payload).await?;
        }

        tx.flush().await?;
        Ok(())
    }
}
