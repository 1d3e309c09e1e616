use comms::{Package, Rank, serialize};
use log::{debug, warn};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    error::{Result, TopologyErr},
    handler::{Handler, HandlerErr},
};

const COMMANDS_CAPACITY: usize = 64;

enum Command {
    Select(oneshot::Sender<Vec<Rank>>),
    Snapshot(oneshot::Sender<Vec<f32>>),
    StartRound(oneshot::Sender<bool>),
    StampUpdate(usize),
    Deliver {
        pkg: Package,
        reply: oneshot::Sender<std::result::Result<bool, HandlerErr>>,
    },
}

/// Spawns the task owning a `Handler`.
///
/// Every access to the handler goes through the returned `AggregatorHandle`, the
/// commands are served one at a time in the order they were sent, so deliveries
/// are never interleaved and snapshots never observe a half applied update.
///
/// # Arguments
/// * `handler` - The handler to take ownership of.
///
/// # Returns
/// A handle to send commands to the task and the task's join handle, which
/// resolves to the handler once every `AggregatorHandle` is dropped.
pub fn spawn<H: Handler>(handler: H) -> (AggregatorHandle, JoinHandle<H>) {
    let (tx, rx) = mpsc::channel(COMMANDS_CAPACITY);

    let handle = AggregatorHandle {
        tx,
        client_num_in_total: handler.client_num_in_total(),
        client_num_per_round: handler.client_num_per_round(),
    };

    (handle, tokio::spawn(serve(handler, rx)))
}

async fn serve<H: Handler>(mut handler: H, mut rx: mpsc::Receiver<Command>) -> H {
    while let Some(cmd) = rx.recv().await {
        // A dropped reply only means the requester gave up on it.
        match cmd {
            Command::Select(reply) => {
                let _ = reply.send(handler.select_clients());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(serialize(handler.model()));
            }
            Command::StartRound(reply) => {
                handler.start_round();
                let _ = reply.send(handler.round_in_progress());
            }
            Command::StampUpdate(idx) => handler.stamp_update(idx),
            Command::Deliver { pkg, reply } => {
                let (sender, code, tensors) = pkg.into_parts();
                debug!(sender = sender; "delivering a {code} package");

                let res = handler
                    .on_receive(sender, code, tensors)
                    .map(|_| handler.round_in_progress());

                if let Err(e) = &res {
                    warn!(sender = sender; "handler refused a package: {e}");
                }

                let _ = reply.send(res);
            }
        }
    }

    handler
}

/// A cloneable handle to the task owning the `Handler`.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Command>,
    client_num_in_total: usize,
    client_num_per_round: usize,
}

impl AggregatorHandle {
    pub fn client_num_in_total(&self) -> usize {
        self.client_num_in_total
    }

    pub fn client_num_per_round(&self) -> usize {
        self.client_num_per_round
    }

    /// Asks the handler which workers take part in the next round or epoch.
    pub async fn select_clients(&self) -> Result<Vec<Rank>> {
        self.request(Command::Select).await
    }

    /// Takes a flat copy of the current global model.
    pub async fn snapshot(&self) -> Result<Vec<f32>> {
        self.request(Command::Snapshot).await
    }

    /// Starts a new round.
    ///
    /// # Returns
    /// Whether the round is in progress right after starting it.
    pub async fn start_round(&self) -> Result<bool> {
        self.request(Command::StartRound).await
    }

    /// Stamps the index of the next delivered update.
    pub async fn stamp_update(&self, idx: usize) -> Result<()> {
        self.tx
            .send(Command::StampUpdate(idx))
            .await
            .map_err(|_| TopologyErr::AggregatorGone)
    }

    /// Hands a received package to the handler.
    ///
    /// # Returns
    /// Whether the current round is still in progress after folding the package,
    /// or the handler's error.
    pub async fn deliver(&self, pkg: Package) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Deliver { pkg, reply }).await?;

        let in_progress = rx.await.map_err(|_| TopologyErr::AggregatorGone)??;
        Ok(in_progress)
    }

    async fn request<T, F>(&self, make: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| TopologyErr::AggregatorGone)
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| TopologyErr::AggregatorGone)
    }
}

#[cfg(test)]
mod tests {
    use comms::{MessageCode, Msg, ParamSet, Tensor};

    use super::*;

    /// Sums every update into a single parameter, the round ends after `per_round` of them.
    struct Summing {
        model: Vec<f32>,
        per_round: usize,
        received: usize,
        stamps: Vec<usize>,
    }

    impl Handler for Summing {
        type Model = Vec<f32>;

        fn model(&self) -> &Self::Model {
            &self.model
        }

        fn client_num_in_total(&self) -> usize {
            4
        }

        fn client_num_per_round(&self) -> usize {
            self.per_round
        }

        fn select_clients(&mut self) -> Vec<Rank> {
            (1..=self.per_round).collect()
        }

        fn start_round(&mut self) {
            self.received = 0;
        }

        fn round_in_progress(&self) -> bool {
            self.received < self.per_round
        }

        fn stamp_update(&mut self, update_idx: usize) {
            self.stamps.push(update_idx);
        }

        fn on_receive(
            &mut self,
            sender: Rank,
            code: MessageCode,
            payload: Vec<Tensor>,
        ) -> std::result::Result<(), HandlerErr> {
            if code != MessageCode::ParameterUpdate {
                return Err(HandlerErr::UnknownMessageCode { sender, code });
            }

            self.model[0] += payload[0].data().iter().sum::<f32>();
            self.received += 1;
            Ok(())
        }
    }

    fn summing(per_round: usize) -> Summing {
        Summing {
            model: vec![0.0],
            per_round,
            received: 0,
            stamps: Vec::new(),
        }
    }

    fn update(value: f32) -> Package {
        Msg::ModelUpdate {
            params: vec![value],
            epoch: None,
        }
        .into()
    }

    #[tokio::test]
    async fn concurrent_deliveries_are_all_applied() -> Result<()> {
        let (handle, task) = spawn(summing(64));
        assert!(handle.start_round().await?);

        let mut deliveries = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let handle = handle.clone();
            deliveries.spawn(async move { handle.deliver(update(1.0)).await });
        }

        let mut finished = 0;
        while let Some(res) = deliveries.join_next().await {
            if !res.unwrap()? {
                finished += 1;
            }
        }

        // Only the last applied update closes the round.
        assert_eq!(finished, 1);
        assert_eq!(handle.snapshot().await?, vec![64.0]);

        drop(handle);
        let handler = task.await.unwrap();
        assert_eq!(handler.received, 64);
        Ok(())
    }

    #[tokio::test]
    async fn stamps_precede_the_matching_delivery() -> Result<()> {
        let (handle, task) = spawn(summing(2));
        handle.start_round().await?;

        for idx in 0..2 {
            handle.stamp_update(idx).await?;
            handle.deliver(update(0.5)).await?;
        }

        drop(handle);
        let handler = task.await.unwrap();
        assert_eq!(handler.stamps, vec![0, 1]);
        assert_eq!(handler.model, vec![1.0]);
        Ok(())
    }

    #[tokio::test]
    async fn handler_errors_reach_the_caller() {
        let (handle, _task) = spawn(summing(1));

        let res = handle.deliver(Package::new(MessageCode::Other(7))).await;
        assert!(matches!(
            res,
            Err(TopologyErr::Handler(HandlerErr::UnknownMessageCode {
                code: MessageCode::Other(7),
                ..
            }))
        ));

        // The aggregator keeps serving after a refused package.
        assert_eq!(handle.snapshot().await.unwrap(), vec![0.0]);
    }

    #[tokio::test]
    async fn snapshot_flattens_every_tensor() -> Result<()> {
        struct Fixed(ParamSet);

        impl Handler for Fixed {
            type Model = ParamSet;

            fn model(&self) -> &ParamSet {
                &self.0
            }

            fn client_num_in_total(&self) -> usize {
                1
            }

            fn client_num_per_round(&self) -> usize {
                1
            }

            fn select_clients(&mut self) -> Vec<Rank> {
                vec![1]
            }

            fn start_round(&mut self) {}

            fn round_in_progress(&self) -> bool {
                false
            }

            fn on_receive(
                &mut self,
                _: Rank,
                _: MessageCode,
                _: Vec<Tensor>,
            ) -> std::result::Result<(), HandlerErr> {
                Ok(())
            }
        }

        let model = ParamSet::filled(&[vec![2, 2], vec![3]], 0.5);
        let (handle, _task) = spawn(Fixed(model));

        assert_eq!(handle.snapshot().await?, vec![0.5; 7]);
        assert_eq!(handle.client_num_in_total(), 1);
        Ok(())
    }
}
