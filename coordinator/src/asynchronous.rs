use comms::{MessageCode, Msg, Package, Topology};
use log::{debug, info, warn};
use tokio::{io::AsyncWrite, sync::watch, task::JoinHandle};

use crate::{
    aggregator::{self, AggregatorHandle},
    error::{Result, TopologyErr},
    group::{Group, Inbox, Outbox},
    handler::Handler,
    report::{Outcome, RunReport},
    sync::{reclaim, shutdown_clients},
};

/// Creates both ends of an epoch gate.
///
/// The gate keeps a watermark of how many epochs have been opened, an epoch is
/// opened by the first update tagged with it. Since epoch `e + 1` is only
/// broadcast after `e` opens, no update can open epochs out of order.
pub fn epoch_gate() -> (GateOpener, GateWaiter) {
    let (tx, rx) = watch::channel(0);
    (GateOpener(tx), GateWaiter(rx))
}

/// The listening side of the gate.
pub struct GateOpener(watch::Sender<u64>);

impl GateOpener {
    /// Opens `epoch` and every epoch before it.
    pub fn open(&self, epoch: u64) {
        self.0.send_if_modified(|opened| {
            let raised = epoch + 1 > *opened;
            if raised {
                *opened = epoch + 1;
            }
            raised
        });
    }
}

/// The activation side of the gate.
pub struct GateWaiter(watch::Receiver<u64>);

impl GateWaiter {
    /// Waits until `epoch` is opened.
    ///
    /// # Errors
    /// `GateClosed` if the opener is dropped before that.
    pub async fn wait_for(&mut self, epoch: u64) -> Result<()> {
        self.0
            .wait_for(|opened| *opened > epoch)
            .await
            .map(|_| ())
            .map_err(|_| TopologyErr::GateClosed)
    }
}

/// Runs a fixed amount of epochs without waiting for every selected worker,
/// the next epoch is broadcast as soon as the first update of the current one
/// arrives. Updates are mixed in as they come, stale ones included.
pub struct AsyncCoordinator<W: AsyncWrite + Unpin, H> {
    group: Group<W>,
    aggregator: AggregatorHandle,
    task: JoinHandle<H>,
    epochs: u64,
}

impl<W, H> AsyncCoordinator<W, H>
where
    W: AsyncWrite + Unpin + Send,
    H: Handler,
{
    /// Creates a new `AsyncCoordinator`.
    ///
    /// # Arguments
    /// * `group` - The connected workers.
    /// * `handler` - The policy owning the global model, it must select exactly
    ///   `client_num_per_round` workers every epoch.
    /// * `epochs` - The amount of epochs to run.
    ///
    /// # Returns
    /// `InvalidConfig` if the handler doesn't fit the group or `epochs` exceeds `MAX_EPOCHS`.
    pub fn new(group: Group<W>, handler: H, epochs: u64) -> Result<Self> {
        if handler.client_num_in_total() != group.workers() {
            return Err(TopologyErr::InvalidConfig(format!(
                "handler expects {} workers, the group has {}",
                handler.client_num_in_total(),
                group.workers()
            )));
        }

        if epochs > comms::MAX_EPOCHS {
            return Err(TopologyErr::InvalidConfig(format!(
                "at most {} epochs can be tagged, got {epochs}",
                comms::MAX_EPOCHS
            )));
        }

        if handler.client_num_per_round() == 0 {
            return Err(TopologyErr::InvalidConfig(
                "at least one worker must be activated every epoch".into(),
            ));
        }

        let (aggregator, task) = aggregator::spawn(handler);

        Ok(Self {
            group,
            aggregator,
            task,
            epochs,
        })
    }

    /// Broadcasts every epoch, each one after the previous epoch opened.
    ///
    /// # Arguments
    /// * `sent` - Counts every sent model update, kept up to date even if
    ///   activation is stopped halfway.
    async fn activate_clients(
        outbox: &mut Outbox<W>,
        aggregator: &AggregatorHandle,
        mut gate: GateWaiter,
        epochs: u64,
        sent: &mut usize,
    ) -> Result<()> {
        for epoch in 0..epochs {
            let clients = aggregator.select_clients().await?;
            info!(epoch = epoch; "client id list for this epoch: {clients:?}");

            let params = aggregator.snapshot().await?;
            let pkg: Package = Msg::ModelUpdate {
                params,
                epoch: Some(epoch),
            }
            .into();

            for &rank in &clients {
                outbox.send_package(&pkg, rank).await?;
                *sent += 1;
            }

            gate.wait_for(epoch).await?;
        }

        Ok(())
    }

    /// Hands exactly `total` packages to the handler, opening the epoch each
    /// update is tagged with.
    ///
    /// # Returns
    /// The amount of received packages.
    async fn listen_clients(
        inbox: &mut Inbox,
        aggregator: &AggregatorHandle,
        gate: GateOpener,
        total: usize,
        epochs: u64,
    ) -> Result<usize> {
        for update_idx in 0..total {
            let pkg = inbox.recv_package().await?;
            let (sender, code) = (pkg.sender(), pkg.code());
            let epoch = Msg::epoch_of(&pkg);
            debug!(sender = sender, update_idx = update_idx; "received a {code} package");

            if code == MessageCode::ParameterUpdate && epoch.is_none() {
                return Err(TopologyErr::UntaggedUpdate { sender });
            }

            aggregator.stamp_update(update_idx).await?;
            aggregator.deliver(pkg).await?;

            match epoch {
                Some(epoch) if epoch < epochs => gate.open(epoch),
                Some(epoch) => warn!(sender = sender; "update tagged with unknown epoch {epoch}"),
                None => {}
            }
        }

        Ok(total)
    }
}

impl<W, H> Topology for AsyncCoordinator<W, H>
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
            epochs,
        } = self;

        let total = epochs as usize * aggregator.client_num_per_round();
        info!(epochs = epochs, updates = total; "asynchronous training started");

        let (opener, waiter) = epoch_gate();
        let mut activations = 0;

        // Only listening bounds the run, activation is dropped wherever it is
        // once every expected package arrived.
        let updates = {
            let activation =
                Self::activate_clients(&mut outbox, &aggregator, waiter, epochs, &mut activations);
            let listening = Self::listen_clients(&mut inbox, &aggregator, opener, total, epochs);
            tokio::pin!(activation, listening);

            let mut activating = true;
            loop {
                tokio::select! {
                    biased;
                    updates = &mut listening => break updates?,
                    res = &mut activation, if activating => {
                        res?;
                        activating = false;
                    }
                }
            }
        };

        let mut report = RunReport {
            rounds: epochs as usize,
            activations,
            updates,
            exits: 0,
        };

        report.exits = shutdown_clients(&mut outbox, &aggregator).await?;
        info!("asynchronous training finished, {report:?}");

        let handler = reclaim(aggregator, task).await?;
        Ok(Outcome { report, handler })
    }
}
