use comms::{
    OnoReceiver, OnoSender, ParamSet,
    specs::{TrainerSpec, WorkerSpec},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{
    Worker,
    connect::join_group,
    error::{Result, WorkerErr},
    trainer::{Echo, Shift, Trainer},
};

/// A trainer picked at runtime from a `TrainerSpec`.
pub type BoxedTrainer = Box<dyn Trainer<ParamSet>>;

/// A worker built from a spec, linked to it's coordinator over TCP.
pub type TcpWorker = Worker<ParamSet, BoxedTrainer, OwnedReadHalf, OwnedWriteHalf>;

/// Builds `Worker`s given a specification.
#[derive(Debug, Default)]
pub struct WorkerBuilder;

impl WorkerBuilder {
    /// Creates a new `WorkerBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Joins the group described by the spec and builds the worker on top of the link.
    ///
    /// # Args
    /// * `spec` - The specification of the worker.
    ///
    /// # Returns
    /// A ready to run worker, `InvalidConfig` if the spec is inconsistent or a
    /// `ConnectionFailure` if the group couldn't be joined.
    pub async fn build(&self, spec: &WorkerSpec) -> Result<TcpWorker> {
        self.validate(spec)?;

        let (rx, tx) = join_group(&spec.group, spec.retry).await?;
        self.build_with_link(spec, rx, tx)
    }

    /// Builds the worker on top of an already established coordinator link.
    ///
    /// # Args
    /// * `spec` - The specification of the worker.
    /// * `rx` - Receiving end of the coordinator link.
    /// * `tx` - Sending end of the coordinator link, stamping the spec's rank.
    ///
    /// # Returns
    /// A new worker, or `InvalidConfig` if the spec is inconsistent.
    pub fn build_with_link<R, W>(
        &self,
        spec: &WorkerSpec,
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
    ) -> Result<Worker<ParamSet, BoxedTrainer, R, W>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.validate(spec)?;

        if tx.rank() != spec.group.rank {
            return Err(WorkerErr::InvalidConfig(format!(
                "the link sends as rank {}, the spec says {}",
                tx.rank(),
                spec.group.rank
            )));
        }

        let model = ParamSet::filled(&spec.model.shapes, spec.model.init);
        let trainer = self.build_trainer(spec.trainer);
        Ok(Worker::new(model, trainer, rx, tx))
    }

    /// Checks the spec is consistent before connecting.
    fn validate(&self, spec: &WorkerSpec) -> Result<()> {
        let group = &spec.group;

        if group.rank == comms::COORDINATOR_RANK || group.rank >= group.world_size {
            return Err(WorkerErr::InvalidConfig(format!(
                "worker rank must be in 1..{}, got {}",
                group.world_size, group.rank
            )));
        }

        if spec.model.shapes.is_empty() {
            return Err(WorkerErr::InvalidConfig(
                "the model needs at least one parameter tensor".into(),
            ));
        }

        Ok(())
    }

    /// Resolves the `Trainer` for this worker.
    fn build_trainer(&self, spec: TrainerSpec) -> BoxedTrainer {
        match spec {
            TrainerSpec::Echo => Box::new(Echo),
            TrainerSpec::Shift { delta } => Box::new(Shift { delta }),
        }
    }
}
