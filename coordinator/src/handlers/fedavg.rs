use comms::{CommsErr, MessageCode, Model, ParamSet, Rank, Tensor, deserialize};
use log::info;

use super::{RandomSelector, read_update};
use crate::handler::{Handler, HandlerErr};

/// Federated averaging, the round ends once every selected worker sent it's
/// update and the global model becomes their plain average.
pub struct FedAvgHandler {
    model: ParamSet,
    selector: RandomSelector,
    total: usize,
    per_round: usize,
    sum: Vec<f32>,
    received: usize,
    in_progress: bool,
}

impl FedAvgHandler {
    /// Creates a new `FedAvgHandler`.
    ///
    /// # Arguments
    /// * `model` - The initial global model.
    /// * `total` - The amount of workers in the group.
    /// * `per_round` - The amount of workers taking part in every round.
    /// * `seed` - Seeds the worker selection.
    pub fn new(model: ParamSet, total: usize, per_round: usize, seed: Option<u64>) -> Self {
        let sum = vec![0.0; model.num_params()];

        Self {
            model,
            selector: RandomSelector::new(total, per_round, seed),
            total,
            per_round,
            sum,
            received: 0,
            in_progress: false,
        }
    }

    fn aggregate(&mut self) -> Result<(), HandlerErr> {
        let n = self.received as f32;
        for acc in &mut self.sum {
            *acc /= n;
        }

        deserialize(&self.sum, &mut self.model)?;
        self.in_progress = false;
        info!(updates = self.received; "global model averaged");
        Ok(())
    }
}

impl Handler for FedAvgHandler {
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

    fn start_round(&mut self) {
        self.sum.fill(0.0);
        self.received = 0;
        self.in_progress = true;
    }

    fn round_in_progress(&self) -> bool {
        self.in_progress
    }

    fn on_receive(
        &mut self,
        sender: Rank,
        code: MessageCode,
        payload: Vec<Tensor>,
    ) -> Result<(), HandlerErr> {
        let (params, _) = read_update(sender, code, payload)?;

        if !self.in_progress {
            return Err(HandlerErr::Rejected(format!(
                "update from rank {sender} arrived outside of a round"
            )));
        }

        if params.len() != self.sum.len() {
            return Err(CommsErr::ShapeMismatch {
                got: params.len(),
                expected: self.sum.len(),
            }
            .into());
        }

        for (acc, p) in self.sum.iter_mut().zip(&params) {
            *acc += p;
        }

        self.received += 1;
        if self.received == self.per_round {
            self.aggregate()?;
        }

        Ok(())
    }
}
