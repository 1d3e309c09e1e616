mod code;
mod error;
pub mod handshake;
mod model;
pub mod msg;
mod package;
mod receiver;
mod sender;
mod serialization;
pub mod specs;
mod tensor;
mod topology;

use tokio::io::{AsyncRead, AsyncWrite};

pub use code::MessageCode;
pub use error::{CommsErr, Result};
pub use model::{Model, ParamSet};
pub use msg::{MAX_EPOCHS, Msg};
pub use package::Package;
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialization::{deserialize, serialize};
pub use tensor::Tensor;
pub use topology::{LocalTopology, Topology};

/// The identifier of a participant, `COORDINATOR_RANK` or a worker in `1..world_size`.
pub type Rank = usize;

/// The rank of the coordinator.
pub const COORDINATOR_RANK: Rank = 0;

/// The largest frame, in bytes, a receiver accepts.
pub const MAX_FRAME_LEN: usize = 1 << 30;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
/// * `rank` - The rank of this end, stamped on every sent package.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W, rank: Rank) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx, rank))
}
