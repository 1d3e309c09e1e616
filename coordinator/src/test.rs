#![cfg(test)]

use std::{sync::Arc, time::Duration};

use comms::{
    MessageCode, Msg, OnoReceiver, OnoSender, Package, ParamSet, Rank, Tensor, Topology,
    serialize,
};
use parking_lot::Mutex;
use tokio::{
    io::{self, AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    time,
};

use crate::{
    asynchronous::AsyncCoordinator,
    error::TopologyErr,
    group::Group,
    handler::{Handler, HandlerErr},
    handlers::{FedAsyncHandler, FedAvgHandler, Staleness},
    sync::SyncCoordinator,
};

type WorkerLink = (
    OnoReceiver<ReadHalf<DuplexStream>>,
    OnoSender<WriteHalf<DuplexStream>>,
);

/// Builds a coordinator group of `workers` in memory links, returning the
/// worker ends in rank order.
fn duplex_group(workers: usize) -> (Group<WriteHalf<DuplexStream>>, Vec<WorkerLink>) {
    let mut links = Vec::with_capacity(workers);
    let mut worker_ends = Vec::with_capacity(workers);

    for rank in 1..=workers {
        let (coordinator_end, worker_end) = io::duplex(4096);

        let (rx, tx) = io::split(coordinator_end);
        let (rx, tx) = comms::channel(rx, tx, comms::COORDINATOR_RANK);
        links.push((rank, rx, tx));

        let (rx, tx) = io::split(worker_end);
        worker_ends.push(comms::channel(rx, tx, rank));
    }

    (Group::new(links), worker_ends)
}

/// Everything a mock worker saw before exiting.
#[derive(Debug, Default)]
struct Seen {
    updates: Vec<(Vec<f32>, Option<u64>)>,
    exit: Option<Vec<f32>>,
}

/// Answers every model update with the received parameters shifted by `delta`.
async fn shifting_worker<R, W>(
    mut rx: OnoReceiver<R>,
    mut tx: OnoSender<W>,
    delta: f32,
) -> comms::Result<Seen>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut seen = Seen::default();

    loop {
        match Msg::try_from(rx.recv().await?)? {
            Msg::ModelUpdate { params, epoch } => {
                seen.updates.push((params.clone(), epoch));

                let params = params.into_iter().map(|p| p + delta).collect();
                tx.send(&Msg::ModelUpdate { params, epoch }.into()).await?;
            }
            Msg::Exit { params } => {
                seen.exit = params;
                return Ok(seen);
            }
            Msg::Other(pkg) => panic!("unexpected package {pkg:?}"),
        }
    }
}

fn spawn_workers(
    links: Vec<WorkerLink>,
    delta: f32,
) -> Vec<tokio::task::JoinHandle<comms::Result<Seen>>> {
    links
        .into_iter()
        .map(|(rx, tx)| tokio::spawn(shifting_worker(rx, tx, delta)))
        .collect()
}

async fn join_workers(
    workers: Vec<tokio::task::JoinHandle<comms::Result<Seen>>>,
) -> Vec<Seen> {
    let mut seen = Vec::with_capacity(workers.len());
    for worker in workers {
        seen.push(worker.await.unwrap().unwrap());
    }
    seen
}

#[tokio::test]
async fn one_synchronous_round_with_two_workers() {
    let (group, links) = duplex_group(2);
    let workers = spawn_workers(links, 1.0);

    let model = ParamSet::filled(&[vec![2, 3]], 0.5);
    let handler = FedAvgHandler::new(model, 2, 2, Some(3));
    let outcome = SyncCoordinator::new(group, handler, 1)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.report.rounds, 1);
    assert_eq!(outcome.report.activations, 2);
    assert_eq!(outcome.report.updates, 2);
    assert_eq!(outcome.report.exits, 2);
    assert_eq!(serialize(outcome.handler.model()), vec![1.5; 6]);

    for seen in join_workers(workers).await {
        assert_eq!(seen.updates, vec![(vec![0.5; 6], None)]);
        assert_eq!(seen.exit, Some(vec![1.5; 6]));
    }
}

#[tokio::test]
async fn synchronous_rounds_reach_workers_in_order() {
    const ROUNDS: usize = 5;

    let (group, links) = duplex_group(3);
    let workers = spawn_workers(links, 1.0);

    let model = ParamSet::filled(&[vec![4]], 0.0);
    let handler = FedAvgHandler::new(model, 3, 3, None);
    let outcome = SyncCoordinator::new(group, handler, ROUNDS)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.report.exits, 3);
    assert_eq!(outcome.report.updates, 3 * ROUNDS);

    // Every round adds one to the average, so round `n` broadcasts `n`.
    for seen in join_workers(workers).await {
        let received: Vec<f32> = seen.updates.iter().map(|(params, _)| params[0]).collect();
        let expected: Vec<f32> = (0..ROUNDS).map(|n| n as f32).collect();
        assert_eq!(received, expected);
        assert_eq!(seen.exit, Some(vec![ROUNDS as f32; 4]));
    }
}

#[tokio::test]
async fn partial_participation_only_activates_the_selection() {
    const ROUNDS: usize = 4;

    let (group, links) = duplex_group(4);
    let workers = spawn_workers(links, 0.0);

    let model = ParamSet::filled(&[vec![1]], 2.0);
    let handler = FedAvgHandler::new(model, 4, 2, Some(11));
    let outcome = SyncCoordinator::new(group, handler, ROUNDS)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.report.activations, 2 * ROUNDS);
    assert_eq!(outcome.report.exits, 4);

    let seen = join_workers(workers).await;
    let activations: usize = seen.iter().map(|s| s.updates.len()).sum();
    assert_eq!(activations, 2 * ROUNDS);
    assert!(seen.iter().all(|s| s.exit == Some(vec![2.0])));
}

#[tokio::test]
async fn two_asynchronous_epochs_with_one_worker_each() {
    let (group, links) = duplex_group(2);
    let workers = spawn_workers(links, 1.0);

    let model = ParamSet::filled(&[vec![2]], 0.0);
    let handler = FedAsyncHandler::new(model, 2, 1, 0.5, Staleness::Constant, Some(5));
    let outcome = AsyncCoordinator::new(group, handler, 2)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.report.rounds, 2);
    assert_eq!(outcome.report.activations, 2);
    assert_eq!(outcome.report.updates, 2);
    assert_eq!(outcome.report.exits, 2);
    assert_eq!(outcome.handler.merged(), 2);

    let seen = join_workers(workers).await;
    let mut epochs: Vec<u64> = seen
        .iter()
        .flat_map(|s| s.updates.iter().filter_map(|(_, epoch)| *epoch))
        .collect();
    epochs.sort_unstable();

    assert_eq!(epochs, vec![0, 1]);
    assert!(seen.iter().all(|s| s.exit.is_some()));
}

#[tokio::test]
async fn asynchronous_run_counts_every_update() {
    const EPOCHS: u64 = 6;

    let (group, links) = duplex_group(3);
    let workers = spawn_workers(links, 0.25);

    let model = ParamSet::filled(&[vec![3]], 1.0);
    let staleness = Staleness::Polynomial { a: 0.5 };
    let handler = FedAsyncHandler::new(model, 3, 2, 0.6, staleness, Some(8));
    let outcome = AsyncCoordinator::new(group, handler, EPOCHS)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.report.updates, 2 * EPOCHS as usize);
    assert_eq!(outcome.report.activations, 2 * EPOCHS as usize);
    assert_eq!(outcome.report.exits, 3);

    let seen = join_workers(workers).await;
    let final_model = serialize(outcome.handler.model());
    assert!(seen.iter().all(|s| s.exit.as_ref() == Some(&final_model)));
}

/// Records every delivery, unknown codes are refused unless `accept_unknown`.
struct Recording {
    log: Arc<Mutex<Vec<(Rank, MessageCode)>>>,
    model: Vec<f32>,
    received: usize,
    accept_unknown: bool,
}

impl Recording {
    fn new(log: Arc<Mutex<Vec<(Rank, MessageCode)>>>, accept_unknown: bool) -> Self {
        Self {
            log,
            model: vec![0.0],
            received: 0,
            accept_unknown,
        }
    }
}

impl Handler for Recording {
    type Model = Vec<f32>;

    fn model(&self) -> &Vec<f32> {
        &self.model
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

    fn start_round(&mut self) {
        self.received = 0;
    }

    fn round_in_progress(&self) -> bool {
        self.received == 0
    }

    fn on_receive(
        &mut self,
        sender: Rank,
        code: MessageCode,
        _: Vec<Tensor>,
    ) -> Result<(), HandlerErr> {
        self.log.lock().push((sender, code));

        if matches!(code, MessageCode::Other(_)) && !self.accept_unknown {
            return Err(HandlerErr::UnknownMessageCode { sender, code });
        }

        self.received += 1;
        Ok(())
    }
}

#[tokio::test]
async fn unknown_codes_reach_the_handler_and_stop_the_run() {
    let (group, mut links) = duplex_group(1);
    let (mut rx, mut tx) = links.remove(0);

    let log = Arc::new(Mutex::new(Vec::new()));
    let handler = Recording::new(log.clone(), false);

    let worker = tokio::spawn(async move {
        rx.recv().await?;
        tx.send(&Package::new(MessageCode::Other(9))).await?;
        comms::Result::Ok((rx, tx))
    });

    let res = SyncCoordinator::new(group, handler, 1).unwrap().run().await;
    assert!(matches!(
        res,
        Err(TopologyErr::Handler(HandlerErr::UnknownMessageCode {
            sender: 1,
            code: MessageCode::Other(9)
        }))
    ));

    assert_eq!(*log.lock(), vec![(1, MessageCode::Other(9))]);
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn accepted_extra_packages_count_towards_the_epoch_bound() {
    let (group, mut links) = duplex_group(1);
    let (mut rx, mut tx) = links.remove(0);

    let log = Arc::new(Mutex::new(Vec::new()));
    let handler = Recording::new(log.clone(), true);

    // Every update is answered with an extra package before the tagged reply.
    let worker = tokio::spawn(async move {
        let mut epochs = Vec::new();

        loop {
            match Msg::try_from(rx.recv().await?)? {
                Msg::ModelUpdate { params, epoch } => {
                    epochs.push(epoch);

                    // Replies to a late epoch may find the coordinator gone.
                    let _ = tx.send(&Package::new(MessageCode::Other(9))).await;
                    let _ = tx.send(&Msg::ModelUpdate { params, epoch }.into()).await;
                }
                Msg::Exit { params } => return comms::Result::Ok((epochs, params)),
                Msg::Other(pkg) => panic!("unexpected package {pkg:?}"),
            }
        }
    });

    let outcome = AsyncCoordinator::new(group, handler, 2)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.report.updates, 2);
    assert_eq!(outcome.report.exits, 1);
    assert_eq!(
        *log.lock(),
        vec![
            (1, MessageCode::Other(9)),
            (1, MessageCode::ParameterUpdate)
        ]
    );

    let (epochs, exit) = worker.await.unwrap().unwrap();
    assert_eq!(epochs[0], Some(0));
    assert_eq!(exit, Some(vec![0.0]));
}

#[tokio::test]
async fn next_epoch_waits_for_an_update_of_the_current_one() {
    let (group, mut links) = duplex_group(1);
    let (mut rx, mut tx) = links.remove(0);

    let model = ParamSet::filled(&[vec![2]], 0.0);
    let handler = FedAsyncHandler::new(model, 1, 1, 0.5, Staleness::Constant, None);
    let coordinator = tokio::spawn(AsyncCoordinator::new(group, handler, 2).unwrap().run());

    let Msg::ModelUpdate {
        params,
        epoch: Some(0),
    } = Msg::try_from(rx.recv().await.unwrap()).unwrap()
    else {
        panic!("expected the epoch 0 broadcast");
    };

    // Epoch 1 stays back while epoch 0 is unanswered.
    let early = time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(early.is_err(), "got {early:?} before answering epoch 0");

    let reply = Msg::ModelUpdate {
        params: params.clone(),
        epoch: Some(0),
    };
    tx.send(&reply.into()).await.unwrap();

    let next = Msg::try_from(rx.recv().await.unwrap()).unwrap();
    assert!(matches!(next, Msg::ModelUpdate { epoch: Some(1), .. }));

    let reply = Msg::ModelUpdate {
        params,
        epoch: Some(1),
    };
    tx.send(&reply.into()).await.unwrap();

    let exit = Msg::try_from(rx.recv().await.unwrap()).unwrap();
    assert!(matches!(exit, Msg::Exit { params: Some(_) }));

    let outcome = coordinator.await.unwrap().unwrap();
    assert_eq!(outcome.report.activations, 2);
    assert_eq!(outcome.report.updates, 2);
}

#[tokio::test]
async fn epochs_past_the_tag_limit_are_rejected() {
    let (group, _links) = duplex_group(1);
    let model = ParamSet::filled(&[vec![1]], 0.0);
    let handler = FedAsyncHandler::new(model, 1, 1, 0.5, Staleness::Constant, None);

    assert!(matches!(
        AsyncCoordinator::new(group, handler, comms::MAX_EPOCHS + 1),
        Err(TopologyErr::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn silent_worker_times_out_when_bounded() {
    let (group, links) = duplex_group(1);
    let group = group.with_recv_timeout(Some(Duration::from_millis(50)));

    let handler = FedAvgHandler::new(ParamSet::filled(&[vec![1]], 0.0), 1, 1, None);
    let res = SyncCoordinator::new(group, handler, 1).unwrap().run().await;

    assert!(matches!(res, Err(TopologyErr::RecvTimeout { .. })));
    drop(links);
}

#[tokio::test]
async fn vanished_group_is_reported() {
    let (group, links) = duplex_group(2);
    drop(links);

    let handler = FedAvgHandler::new(ParamSet::filled(&[vec![1]], 0.0), 2, 2, None);
    let res = SyncCoordinator::new(group, handler, 1).unwrap().run().await;

    // Depending on which duty notices first the failure is a write or the closed inbox.
    assert!(matches!(
        res,
        Err(TopologyErr::GroupClosed | TopologyErr::Comms(_))
    ));
}

#[tokio::test]
async fn impersonating_worker_is_rejected() {
    let (coordinator_end, worker_end) = io::duplex(4096);
    let (rx, tx) = io::split(coordinator_end);
    let (rx, tx) = comms::channel(rx, tx, comms::COORDINATOR_RANK);
    let group = Group::new(vec![(1, rx, tx)]);

    // The only link belongs to rank 1, but it's packages claim rank 2.
    let (rx, tx) = io::split(worker_end);
    let (mut rx, mut tx) = comms::channel(rx, tx, 2);
    let worker = tokio::spawn(async move {
        rx.recv().await?;
        let update = Msg::ModelUpdate {
            params: vec![0.0],
            epoch: None,
        };
        tx.send(&update.into()).await?;
        comms::Result::Ok((rx, tx))
    });

    let handler = FedAvgHandler::new(ParamSet::filled(&[vec![1]], 0.0), 1, 1, None);
    let res = SyncCoordinator::new(group, handler, 1).unwrap().run().await;

    assert!(matches!(
        res,
        Err(TopologyErr::SenderMismatch {
            expected: 1,
            got: 2
        })
    ));
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn handler_must_fit_the_group() {
    let (group, _links) = duplex_group(2);
    let handler = FedAvgHandler::new(ParamSet::filled(&[vec![1]], 0.0), 3, 1, None);

    assert!(matches!(
        SyncCoordinator::new(group, handler, 1),
        Err(TopologyErr::InvalidConfig(_))
    ));
}
