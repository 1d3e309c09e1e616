mod fedasync;
mod fedavg;
mod selection;

pub use fedasync::{FedAsyncHandler, Staleness};
pub use fedavg::FedAvgHandler;
pub use selection::RandomSelector;

use comms::{MessageCode, Msg, Package, Rank, Tensor};

use crate::handler::HandlerErr;

/// Reads a worker update out of a received payload.
///
/// # Returns
/// The flat parameters and the epoch tag if present, `UnknownMessageCode` for
/// anything but a `ParameterUpdate`.
fn read_update(
    sender: Rank,
    code: MessageCode,
    payload: Vec<Tensor>,
) -> Result<(Vec<f32>, Option<u64>), HandlerErr> {
    if code != MessageCode::ParameterUpdate {
        return Err(HandlerErr::UnknownMessageCode { sender, code });
    }

    let mut pkg = Package::new(code);
    pkg.append_tensors(payload);

    match Msg::try_from(pkg)? {
        Msg::ModelUpdate { params, epoch } => Ok((params, epoch)),
        _ => Err(HandlerErr::UnknownMessageCode { sender, code }),
    }
}
