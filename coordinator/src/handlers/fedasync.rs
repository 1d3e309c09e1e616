use comms::{
    CommsErr, MessageCode, ParamSet, Rank, Tensor, deserialize, serialize,
    specs::StalenessSpec,
};
use log::{debug, warn};

use super::{RandomSelector, read_update};
use crate::handler::{Handler, HandlerErr};

/// Scales the mixing weight of an update by how many epochs old it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Staleness {
    Constant,
    /// `(s + 1)^-a`
    Polynomial { a: f32 },
    /// `1` up to `b` epochs of staleness, `1 / (a (s - b) + 1)` after that.
    Hinge { a: f32, b: u64 },
}

impl Staleness {
    pub fn weight(&self, staleness: u64) -> f32 {
        match *self {
            Self::Constant => 1.0,
            Self::Polynomial { a } => (staleness as f32 + 1.0).powf(-a),
            Self::Hinge { a, b } if staleness > b => 1.0 / (a * (staleness - b) as f32 + 1.0),
            Self::Hinge { .. } => 1.0,
        }
    }
}

impl From<StalenessSpec> for Staleness {
    fn from(spec: StalenessSpec) -> Self {
        match spec {
            StalenessSpec::Constant => Self::Constant,
            StalenessSpec::Polynomial { a } => Self::Polynomial { a },
            StalenessSpec::Hinge { a, b } => Self::Hinge { a, b },
        }
    }
}

/// Asynchronous federated optimization, every update is mixed into the global
/// model as soon as it arrives, weighted down by its staleness.
pub struct FedAsyncHandler {
    model: ParamSet,
    selector: RandomSelector,
    total: usize,
    per_round: usize,
    alpha: f32,
    staleness: Staleness,
    update_idx: usize,
    merged: usize,
}

impl FedAsyncHandler {
    /// Creates a new `FedAsyncHandler`.
    ///
    /// # Arguments
    /// * `model` - The initial global model.
    /// * `total` - The amount of workers in the group.
    /// * `per_round` - The amount of workers activated every epoch.
    /// * `alpha` - The mixing weight of a fresh update, in `(0, 1]`.
    /// * `staleness` - How the mixing weight decays with staleness.
    /// * `seed` - Seeds the worker selection.
    pub fn new(
        model: ParamSet,
        total: usize,
        per_round: usize,
        alpha: f32,
        staleness: Staleness,
        seed: Option<u64>,
    ) -> Self {
        Self {
            model,
            selector: RandomSelector::new(total, per_round, seed),
            total,
            per_round,
            alpha,
            staleness,
            update_idx: 0,
            merged: 0,
        }
    }

    /// The amount of updates mixed into the global model so far.
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// The epoch the global model is at, given the index of the update being received.
    fn current_epoch(&self) -> u64 {
        (self.update_idx / self.per_round.max(1)) as u64
    }
}

impl Handler for FedAsyncHandler {
    type Model = ParamSet;

    fn model(&self) -> &ParamSet {
        &self.model
    }

    fn client_num_in_total(&self) -> usize {
        self.total
    }

    fn client_num_per_round(&self) -> usize {
        self.per_round
    }

    fn select_clients(&mut self) -> Vec<Rank> {
        self.selector.select()
    }

    // Epochs never wait for the whole selection.
    fn start_round(&mut self) {}

    fn round_in_progress(&self) -> bool {
        false
    }

    fn stamp_update(&mut self, update_idx: usize) {
        self.update_idx = update_idx;
    }

    fn on_receive(
        &mut self,
        sender: Rank,
        code: MessageCode,
        payload: Vec<Tensor>,
    ) -> Result<(), HandlerErr> {
        let (params, epoch) = read_update(sender, code, payload)?;
        let current = self.current_epoch();

        let epoch = epoch.unwrap_or_else(|| {
            warn!(sender = sender; "untagged update, taking it as fresh");
            current
        });

        let mut global = serialize(&self.model);
        if params.len() != global.len() {
            return Err(CommsErr::ShapeMismatch {
                got: params.len(),
                expected: global.len(),
            }
            .into());
        }

        let staleness = current.saturating_sub(epoch);
        let alpha = self.alpha * self.staleness.weight(staleness);

        for (g, p) in global.iter_mut().zip(&params) {
            *g = (1.0 - alpha) * *g + alpha * p;
        }

        deserialize(&global, &mut self.model)?;
        self.merged += 1;
        debug!(sender = sender, staleness = staleness; "mixed an update with weight {alpha}");
        Ok(())
    }
}
