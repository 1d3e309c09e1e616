//! The one time rendezvous frames exchanged before any package.
//!
//! A worker sends `Hello { rank, world_size }` right after connecting, the
//! coordinator answers every worker with `Ready { world_size }` once the whole
//! group is connected. Both frames are a magic word followed by big endian `u32`s.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    Rank,
    error::{CommsErr, Result},
};

const HELLO_MAGIC: u32 = u32::from_be_bytes(*b"FLHI");
const READY_MAGIC: u32 = u32::from_be_bytes(*b"FLOK");

/// Sent by a worker to introduce itself to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub rank: Rank,
    pub world_size: usize,
}

/// Sent by the coordinator once every expected participant has joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub world_size: usize,
}

impl Hello {
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, tx: &mut W) -> Result<()> {
        let rank = word("rank", self.rank)?;
        let world_size = word("world size", self.world_size)?;
        write_words(tx, &[HELLO_MAGIC, rank, world_size]).await
    }

    pub async fn read_from<R: AsyncRead + Unpin>(rx: &mut R) -> Result<Self> {
        let [magic, rank, world_size] = read_words::<_, 3>(rx).await?;
        check_magic("hello", magic, HELLO_MAGIC)?;

        Ok(Self {
            rank: rank as Rank,
            world_size: world_size as usize,
        })
    }
}

impl Ready {
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, tx: &mut W) -> Result<()> {
        let world_size = word("world size", self.world_size)?;
        write_words(tx, &[READY_MAGIC, world_size]).await
    }

    pub async fn read_from<R: AsyncRead + Unpin>(rx: &mut R) -> Result<Self> {
        let [magic, world_size] = read_words::<_, 2>(rx).await?;
        check_magic("ready", magic, READY_MAGIC)?;

        Ok(Self {
            world_size: world_size as usize,
        })
    }
}

fn word(field: &str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| CommsErr::BadHandshake(format!("{field} {value} doesn't fit in 32 bits")))
}

fn check_magic(frame: &str, got: u32, expected: u32) -> Result<()> {
    if got != expected {
        let detail = format!("invalid {frame} magic {got:#010x}");
        return Err(CommsErr::BadHandshake(detail));
    }

    Ok(())
}

async fn write_words<W: AsyncWrite + Unpin>(tx: &mut W, words: &[u32]) -> Result<()> {
    let buf: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    tx.write_all(&buf).await?;
    tx.flush().await?;
    Ok(())
}

async fn read_words<R: AsyncRead + Unpin, const N: usize>(rx: &mut R) -> Result<[u32; N]> {
    let mut words = [0; N];

    for word in &mut words {
        let mut bytes = [0; 4];
        rx.read_exact(&mut bytes).await?;
        *word = u32::from_be_bytes(bytes);
    }

    Ok(words)
}
