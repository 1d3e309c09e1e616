use std::error::Error;

use comms::Model;

/// The outcome of a local training pass.
pub type TrainResult = std::result::Result<(), Box<dyn Error + Send + Sync>>;

/// Local training run by a worker every time it receives the global model.
///
/// Training is CPU bound and runs on tokio's blocking pool, so implementors
/// must be movable across threads.
pub trait Trainer<M: Model>: Send + 'static {
    /// Trains `model` in place.
    ///
    /// # Arguments
    /// * `model` - The model, holding the received global parameters.
    /// * `epoch` - The epoch tag of the received update, if any.
    fn train(&mut self, model: &mut M, epoch: Option<u64>) -> TrainResult;
}

impl<M: Model, T: Trainer<M> + ?Sized> Trainer<M> for Box<T> {
    fn train(&mut self, model: &mut M, epoch: Option<u64>) -> TrainResult {
        (**self).train(model, epoch)
    }
}

/// Leaves the model untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl<M: Model> Trainer<M> for Echo {
    fn train(&mut self, _model: &mut M, _epoch: Option<u64>) -> TrainResult {
        Ok(())
    }
}

/// Adds a constant to every parameter.
#[derive(Debug, Clone, Copy)]
pub struct Shift {
    pub delta: f32,
}

impl<M: Model> Trainer<M> for Shift {
    fn train(&mut self, model: &mut M, _epoch: Option<u64>) -> TrainResult {
        for param in model.parameters_mut() {
            param.iter_mut().for_each(|p| *p += self.delta);
        }

        Ok(())
    }
}
