use std::{error::Error, fmt};

use comms::{CommsErr, MessageCode, Model, Rank, Tensor};

/// Algorithm specific policy driving a coordinator: who trains each round,
/// how received updates are folded into the global model and when a round is over.
///
/// The handler owns the global model and is the only thing allowed to mutate it.
pub trait Handler: Send + 'static {
    type Model: Model;

    /// The current global model.
    fn model(&self) -> &Self::Model;

    /// The amount of workers in the group.
    fn client_num_in_total(&self) -> usize;

    /// The amount of workers activated every round or epoch.
    fn client_num_per_round(&self) -> usize;

    /// Chooses the worker ranks taking part in the next round or epoch.
    fn select_clients(&mut self) -> Vec<Rank>;

    /// Marks a new round as in progress.
    fn start_round(&mut self);

    /// Whether the current round is still waiting for updates.
    fn round_in_progress(&self) -> bool;

    /// Lets the handler know the index of the update it's about to receive.
    fn stamp_update(&mut self, _update_idx: usize) {}

    /// Folds a received package into the global model.
    ///
    /// Called for every received package, whatever it's code. Clearing the
    /// round in progress flag ends the current synchronous round.
    ///
    /// # Arguments
    /// * `sender` - The rank the package came from.
    /// * `code` - The package's message code.
    /// * `payload` - The package's tensors, in the order they were appended.
    fn on_receive(
        &mut self,
        sender: Rank,
        code: MessageCode,
        payload: Vec<Tensor>,
    ) -> Result<(), HandlerErr>;
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    type Model = H::Model;

    fn model(&self) -> &Self::Model {
        (**self).model()
    }

    fn client_num_in_total(&self) -> usize {
        (**self).client_num_in_total()
    }

    fn client_num_per_round(&self) -> usize {
        (**self).client_num_per_round()
    }

    fn select_clients(&mut self) -> Vec<Rank> {
        (**self).select_clients()
    }

    fn start_round(&mut self) {
        (**self).start_round()
    }

    fn round_in_progress(&self) -> bool {
        (**self).round_in_progress()
    }

    fn stamp_update(&mut self, update_idx: usize) {
        (**self).stamp_update(update_idx)
    }

    fn on_receive(
        &mut self,
        sender: Rank,
        code: MessageCode,
        payload: Vec<Tensor>,
    ) -> Result<(), HandlerErr> {
        (**self).on_receive(sender, code, payload)
    }
}

/// Failures reported by a `Handler`.
#[derive(Debug)]
pub enum HandlerErr {
    UnknownMessageCode { sender: Rank, code: MessageCode },
    Comms(CommsErr),
    Rejected(String),
}

impl fmt::Display for HandlerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMessageCode { sender, code } => {
                write!(f, "rank {sender} sent a package with unhandled code {code}")
            }
            Self::Comms(e) => write!(f, "{e}"),
            Self::Rejected(msg) => write!(f, "update rejected: {msg}"),
        }
    }
}

impl Error for HandlerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Comms(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommsErr> for HandlerErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}
