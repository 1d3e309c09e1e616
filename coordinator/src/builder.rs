use std::time::Duration;

use comms::{
    ParamSet, Topology,
    specs::{CoordinatorSpec, HandlerSpec, ModeSpec, StalenessSpec},
};
use log::info;
use tokio::{io::AsyncWrite, net::tcp::OwnedWriteHalf};

use crate::{
    asynchronous::AsyncCoordinator,
    error::{Result, TopologyErr},
    group::{Group, Rendezvous},
    handler::Handler,
    handlers::{FedAsyncHandler, FedAvgHandler},
    report::Outcome,
    sync::SyncCoordinator,
};

/// A handler picked at runtime from a `HandlerSpec`.
pub type BoxedHandler = Box<dyn Handler<Model = ParamSet>>;

/// Every coordinator topology, chosen by the `ModeSpec`.
pub enum Coordinator<W: AsyncWrite + Unpin> {
    Sync(SyncCoordinator<W, BoxedHandler>),
    Async(AsyncCoordinator<W, BoxedHandler>),
}

impl<W> Topology for Coordinator<W>
where
    W: AsyncWrite + Unpin + Send,
{
    type Output = Outcome<BoxedHandler>;
    type Error = TopologyErr;

    async fn run(self) -> Result<Self::Output> {
        match self {
            Self::Sync(coordinator) => coordinator.run().await,
            Self::Async(coordinator) => coordinator.run().await,
        }
    }
}

/// Builds a `Coordinator` given a specification.
#[derive(Debug, Default)]
pub struct CoordinatorBuilder;

impl CoordinatorBuilder {
    /// Creates a new `CoordinatorBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Binds the rendezvous address, waits for the whole group and builds the coordinator.
    ///
    /// # Args
    /// * `spec` - The specification of the coordinator.
    ///
    /// # Returns
    /// A ready to run coordinator, `InvalidConfig` if the spec is inconsistent or
    /// a `ConnectionFailure` if the group couldn't be formed.
    pub async fn build(&self, spec: CoordinatorSpec) -> Result<Coordinator<OwnedWriteHalf>> {
        self.validate(&spec)?;

        let rendezvous = Rendezvous::bind(&spec.group.addr).await?;
        let workers = spec.group.world_size - 1;
        info!("waiting for {workers} workers on {}", rendezvous.local_addr()?);

        let timeout = spec.group.handshake_timeout_ms.map(Duration::from_millis);
        let group = rendezvous.accept_group(spec.group.world_size, timeout).await?;
        self.build_with_group(spec, group)
    }

    /// Builds the coordinator on top of an already connected group.
    ///
    /// # Args
    /// * `spec` - The specification of the coordinator.
    /// * `group` - The connected workers.
    ///
    /// # Returns
    /// A ready to run coordinator or `InvalidConfig`.
    pub fn build_with_group<W>(
        &self,
        spec: CoordinatorSpec,
        group: Group<W>,
    ) -> Result<Coordinator<W>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.validate(&spec)?;

        let group = group.with_recv_timeout(spec.recv_timeout_ms.map(Duration::from_millis));
        let handler = self.build_handler(&spec);

        let coordinator = match spec.mode {
            ModeSpec::Synchronous { global_rounds } => {
                Coordinator::Sync(SyncCoordinator::new(group, handler, global_rounds.get())?)
            }
            ModeSpec::Asynchronous { epochs } => {
                Coordinator::Async(AsyncCoordinator::new(group, handler, epochs.get() as u64)?)
            }
        };

        Ok(coordinator)
    }

    /// Resolves the `Handler` for this coordinator.
    fn build_handler(&self, spec: &CoordinatorSpec) -> BoxedHandler {
        let model = ParamSet::filled(&spec.model.shapes, spec.model.init);
        let total = spec.group.world_size - 1;
        let per_round = spec.client_num_per_round;

        match spec.handler {
            HandlerSpec::FedAvg => {
                Box::new(FedAvgHandler::new(model, total, per_round, spec.seed))
            }
            HandlerSpec::FedAsync { alpha, staleness } => Box::new(FedAsyncHandler::new(
                model,
                total,
                per_round,
                alpha,
                staleness.into(),
                spec.seed,
            )),
        }
    }

    /// Checks the spec is consistent before anything is bound or spawned.
    pub fn validate(&self, spec: &CoordinatorSpec) -> Result<()> {
        let invalid = |msg: String| Err(TopologyErr::InvalidConfig(msg));
        let group = &spec.group;

        if group.rank != comms::COORDINATOR_RANK {
            let rank = group.rank;
            return invalid(format!("the coordinator must have rank 0, got {rank}"));
        }

        if group.world_size < 2 {
            return invalid(format!(
                "a group needs at least one worker, world size is {}",
                group.world_size
            ));
        }

        let total = group.world_size - 1;
        if spec.client_num_per_round == 0 || spec.client_num_per_round > total {
            return invalid(format!(
                "client_num_per_round must be in 1..={total}, got {}",
                spec.client_num_per_round
            ));
        }

        let shapes = &spec.model.shapes;
        if shapes.is_empty() || shapes.iter().any(|s| s.iter().product::<usize>() == 0) {
            return invalid("the model needs at least one non empty parameter tensor".into());
        }

        match (spec.mode, spec.handler) {
            (ModeSpec::Synchronous { .. }, HandlerSpec::FedAvg) => Ok(()),
            (ModeSpec::Asynchronous { epochs }, HandlerSpec::FedAsync { alpha, staleness }) => {
                if epochs.get() as u64 > comms::MAX_EPOCHS {
                    return invalid(format!(
                        "at most {} epochs can be tagged, got {epochs}",
                        comms::MAX_EPOCHS
                    ));
                }

                if !(alpha > 0.0 && alpha <= 1.0) {
                    return invalid(format!("alpha must be in (0, 1], got {alpha}"));
                }

                match staleness {
                    StalenessSpec::Polynomial { a } | StalenessSpec::Hinge { a, .. }
                        if a < 0.0 =>
                    {
                        invalid(format!("staleness decay must not be negative, got {a}"))
                    }
                    _ => Ok(()),
                }
            }
            (mode, handler) => invalid(format!("{handler:?} can't drive a {mode:?} coordinator")),
        }
    }
}
