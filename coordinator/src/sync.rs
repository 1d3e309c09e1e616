use comms::{Msg, Package, Topology};
use log::{debug, info};
use tokio::{io::AsyncWrite, task::JoinHandle};

use crate::{
    aggregator::{self, AggregatorHandle},
    error::{Result, TopologyErr},
    group::{Group, Inbox, Outbox},
    handler::Handler,
    report::{Outcome, RunReport},
};

/// Runs a fixed amount of global rounds, each of them a broadcast of the global
/// model to the selected workers and a wait until the handler closes the round.
pub struct SyncCoordinator<W: AsyncWrite + Unpin, H> {
    group: Group<W>,
    aggregator: AggregatorHandle,
    task: JoinHandle<H>,
    global_rounds: usize,
}

impl<W, H> SyncCoordinator<W, H>
where
    W: AsyncWrite + Unpin + Send,
    H: Handler,
{
    /// Creates a new `SyncCoordinator`.
    ///
    /// # Arguments
    /// * `group` - The connected workers.
    /// * `handler` - The policy owning the global model.
    /// * `global_rounds` - The amount of rounds to run.
    ///
    /// # Returns
    /// `InvalidConfig` if the handler expects a different amount of workers than the group has.
    pub fn new(group: Group<W>, handler: H, global_rounds: usize) -> Result<Self> {
        if handler.client_num_in_total() != group.workers() {
            return Err(TopologyErr::InvalidConfig(format!(
                "handler expects {} workers, the group has {}",
                handler.client_num_in_total(),
                group.workers()
            )));
        }

        let (aggregator, task) = aggregator::spawn(handler);

        Ok(Self {
            group,
            aggregator,
            task,
            global_rounds,
        })
    }

    /// Sends the current global model to the workers selected for this round.
    ///
    /// # Returns
    /// The amount of activated workers.
    async fn activate_clients(
        outbox: &mut Outbox<W>,
        aggregator: &AggregatorHandle,
    ) -> Result<usize> {
        let clients = aggregator.select_clients().await?;
        info!("client id list for this round: {clients:?}");

        let params = aggregator.snapshot().await?;
        let pkg: Package = Msg::ModelUpdate {
            params,
            epoch: None,
        }
        .into();

        for &rank in &clients {
            outbox.send_package(&pkg, rank).await?;
        }

        Ok(clients.len())
    }

    /// Hands every received package to the handler until it ends the round.
    ///
    /// # Returns
    /// The amount of packages received during the round.
    async fn listen_clients(inbox: &mut Inbox, aggregator: &AggregatorHandle) -> Result<usize> {
        let mut in_progress = aggregator.start_round().await?;
        let mut received = 0;

        while in_progress {
            let pkg = inbox.recv_package().await?;
            debug!(sender = pkg.sender(); "received a {} package", pkg.code());

            in_progress = aggregator.deliver(pkg).await?;
            received += 1;
        }

        Ok(received)
    }
}

/// Sends the final global model to every worker in the group, telling them to stop.
///
/// # Returns
/// The amount of sent exit messages.
pub(crate) async fn shutdown_clients<W>(
    outbox: &mut Outbox<W>,
    aggregator: &AggregatorHandle,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let params = aggregator.snapshot().await?;
    let pkg: Package = Msg::Exit {
        params: Some(params),
    }
    .into();

    let mut exits = 0;
    for rank in outbox.ranks() {
        outbox.send_package(&pkg, rank).await?;
        exits += 1;
    }

    info!(exits = exits; "sent the final model to every worker");
    Ok(exits)
}

/// Drops the last handle and waits for the aggregator to give the handler back.
pub(crate) async fn reclaim<H>(aggregator: AggregatorHandle, task: JoinHandle<H>) -> Result<H> {
    drop(aggregator);
    task.await.map_err(|_| TopologyErr::AggregatorGone)
}

impl<W, H> Topology for SyncCoordinator<W, H>
where
    W: AsyncWrite + Unpin + Send,
    H: Handler,
{
    type Output = Outcome<H>;
    type Error = TopologyErr;

    async fn run(self) -> Result<Outcome<H>> {
        let Self {
            group: Group {
                mut outbox,
                mut inbox,
            },
            aggregator,
            task,
            global_rounds,
        } = self;

        let mut report = RunReport::default();

        for round in 1..=global_rounds {
            info!(round = round, total = global_rounds; "global round started");

            let (activations, updates) = tokio::try_join!(
                Self::activate_clients(&mut outbox, &aggregator),
                Self::listen_clients(&mut inbox, &aggregator),
            )?;

            report.rounds += 1;
            report.activations += activations;
            report.updates += updates;
        }

        report.exits = shutdown_clients(&mut outbox, &aggregator).await?;
        info!("synchronous training finished, {report:?}");

        let handler = reclaim(aggregator, task).await?;
        Ok(Outcome { report, handler })
    }
}
