use std::io;

use comms::{
    CommsErr, Model, Msg, OnoReceiver, OnoSender, Rank, Topology, deserialize, serialize,
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task,
};

use crate::{
    error::{Result, WorkerErr},
    trainer::Trainer,
};

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The coordinator sent `Exit`.
    Exit,
    /// The coordinator went away without saying goodbye.
    Disconnected,
}

/// What a worker gives back once it stops.
#[derive(Debug)]
pub struct WorkerReport<M> {
    /// Completed training rounds.
    pub rounds: usize,
    pub exit: ExitReason,
    /// The local model, holding the final global parameters if `Exit` carried them.
    pub model: M,
}

/// Trains the global model it receives and sends back the result, until told to stop.
///
/// Design:
/// - The model is loaded in place from every received update.
/// - Training is CPU bound and runs on tokio's blocking pool via `spawn_blocking`.
/// - The model and trainer are moved out and back, no copies per round.
pub struct Worker<M, T, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    model: M,
    trainer: T,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

impl<M, T, R, W> Worker<M, T, R, W>
where
    M: Model + Send + 'static,
    T: Trainer<M>,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `model` - The local model, shaped like the global one.
    /// * `trainer` - The local training routine.
    /// * `rx` - Receiving end of the coordinator link.
    /// * `tx` - Sending end of the coordinator link, it's rank is this worker's rank.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(model: M, trainer: T, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            model,
            trainer,
            rx,
            tx,
        }
    }

    pub fn rank(&self) -> Rank {
        self.tx.rank()
    }
}

impl<M, T, R, W> Topology for Worker<M, T, R, W>
where
    M: Model + Send + 'static,
    T: Trainer<M>,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    type Output = WorkerReport<M>;
    type Error = WorkerErr;

    /// Serves the coordinator until it sends `Exit` or goes away.
    ///
    /// # Returns
    /// A report of the run.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures, a model update that doesn't fit the
    /// local model, a failed training pass or any message besides updates and `Exit`.
    async fn run(self) -> Result<WorkerReport<M>> {
        let rank = self.rank();
        let Self {
            mut model,
            mut trainer,
            mut rx,
            mut tx,
        } = self;

        let mut rounds = 0;
        let report = |rounds, exit, model| WorkerReport {
            rounds,
            exit,
            model,
        };

        loop {
            let pkg = match rx.recv().await {
                Ok(pkg) => pkg,
                Err(e) if is_disconnection(&e) => {
                    warn!(rank = rank, rounds = rounds; "coordinator disconnected");
                    return Ok(report(rounds, ExitReason::Disconnected, model));
                }
                Err(e) => return Err(e.into()),
            };

            match Msg::try_from(pkg)? {
                Msg::ModelUpdate { params, epoch } => {
                    debug!(rank = rank, round = rounds; "received the global model");
                    deserialize(&params, &mut model)?;

                    (model, trainer) = train(model, trainer, epoch, rounds).await?;

                    let params = serialize(&model);
                    let update = Msg::ModelUpdate { params, epoch };

                    match tx.send(&update.into()).await {
                        Ok(()) => rounds += 1,
                        Err(e) if is_disconnection(&e) => {
                            warn!(rank = rank, rounds = rounds; "coordinator disconnected");
                            return Ok(report(rounds, ExitReason::Disconnected, model));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Msg::Exit { params } => {
                    if let Some(params) = params {
                        deserialize(&params, &mut model)?;
                    }

                    info!(rank = rank, rounds = rounds; "worker finished");
                    return Ok(report(rounds, ExitReason::Exit, model));
                }
                Msg::Other(pkg) => {
                    warn!(rank = rank; "unexpected {} package from the coordinator", pkg.code());
                    return Err(WorkerErr::UnexpectedMessage {
                        round: rounds,
                        got: pkg.code(),
                    });
                }
            }
        }
    }
}

/// Runs the trainer on the blocking pool.
async fn train<M, T>(
    mut model: M,
    mut trainer: T,
    epoch: Option<u64>,
    round: usize,
) -> Result<(M, T)>
where
    M: Model + Send + 'static,
    T: Trainer<M>,
{
    let (model, trainer, res) = task::spawn_blocking(move || {
        let res = trainer.train(&mut model, epoch);
        (model, trainer, res)
    })
    .await
    .map_err(|e| WorkerErr::Training {
        round,
        source: Box::new(e),
    })?;

    res.map_err(|source| WorkerErr::Training { round, source })?;
    Ok((model, trainer))
}

fn is_disconnection(err: &CommsErr) -> bool {
    match err {
        CommsErr::Disconnected => true,
        CommsErr::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
        ),
        _ => false,
    }
}
