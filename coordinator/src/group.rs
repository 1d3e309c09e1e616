use std::{net::SocketAddr, ops::RangeInclusive, time::Duration};

use comms::{
    CommsErr, OnoReceiver, OnoSender, Package, Rank,
    handshake::{Hello, Ready},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc,
    task::JoinSet,
    time::{self, Instant},
};

use crate::error::{ConnectionFailure, Result, TopologyErr};

const INBOX_CAPACITY: usize = 128;

/// The coordinator's end of the rendezvous, listening for the workers of a group.
pub struct Rendezvous {
    listener: TcpListener,
}

impl Rendezvous {
    /// Binds the rendezvous address.
    ///
    /// # Errors
    /// `ConnectionFailure::Bind` if the address can't be bound.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ConnectionFailure::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ConnectionFailure::Accept(e).into())
    }

    /// Waits until every worker rank in `1..world_size` has connected and
    /// introduced itself, then tells all of them the group is ready.
    ///
    /// # Arguments
    /// * `world_size` - The amount of participants, coordinator included.
    /// * `timeout` - How long to wait for the whole group, forever if `None`.
    ///
    /// # Returns
    /// The connected group, or a `ConnectionFailure` on a bad handshake, a rank
    /// out of range or repeated, a world size disagreement or a timeout.
    pub async fn accept_group(
        self,
        world_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Group<OwnedWriteHalf>> {
        let expected = world_size.saturating_sub(1);
        let mut slots: Vec<Option<TcpStream>> = (0..expected).map(|_| None).collect();
        let mut connected = 0;

        let deadline = timeout.map(|limit| Instant::now() + limit);

        while connected < expected {
            let joining = async {
                let (stream, peer) = self
                    .listener
                    .accept()
                    .await
                    .map_err(ConnectionFailure::Accept)?;

                let rank = admit(stream, peer, world_size, &mut slots).await?;
                Ok::<_, TopologyErr>((rank, peer))
            };

            let (rank, peer) = match deadline {
                Some(deadline) => time::timeout_at(deadline, joining).await.map_err(|_| {
                    ConnectionFailure::Timeout {
                        connected,
                        expected,
                    }
                })??,
                None => joining.await?,
            };

            connected += 1;
            info!(rank = rank, connected = connected, expected = expected; "worker joined from {peer}");
        }

        let mut links = Vec::with_capacity(expected);
        for (rank, stream) in (1..).zip(slots) {
            let Some(mut stream) = stream else {
                return Err(TopologyErr::UnknownRank(rank));
            };

            Ready { world_size }
                .write_to(&mut stream)
                .await
                .map_err(ConnectionFailure::Handshake)?;

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx, comms::COORDINATOR_RANK);
            links.push((rank, rx, tx));
        }

        info!(world_size = world_size; "group is ready");
        Ok(Group::new(links))
    }
}

async fn admit(
    mut stream: TcpStream,
    peer: SocketAddr,
    world_size: usize,
    slots: &mut [Option<TcpStream>],
) -> Result<Rank> {
    let hello = Hello::read_from(&mut stream)
        .await
        .map_err(ConnectionFailure::Handshake)?;

    if hello.world_size != world_size {
        return Err(ConnectionFailure::WorldSizeMismatch {
            rank: hello.rank,
            got: hello.world_size,
            expected: world_size,
        }
        .into());
    }

    if hello.rank == comms::COORDINATOR_RANK || hello.rank >= world_size {
        warn!("{peer} claimed rank {}", hello.rank);
        return Err(ConnectionFailure::RankOutOfRange {
            rank: hello.rank,
            world_size,
        }
        .into());
    }

    let slot = &mut slots[hello.rank - 1];
    if slot.is_some() {
        return Err(ConnectionFailure::DuplicateRank(hello.rank).into());
    }

    *slot = Some(stream);
    Ok(hello.rank)
}

/// The coordinator's links to every worker of the group, split in an outgoing
/// and an incoming half so both can be driven concurrently.
pub struct Group<W: AsyncWrite + Unpin> {
    pub outbox: Outbox<W>,
    pub inbox: Inbox,
}

impl<W: AsyncWrite + Unpin> Group<W> {
    /// Creates a group out of already connected links.
    ///
    /// # Arguments
    /// * `links` - The `(rank, receiver, sender)` triplets, ranks must be `1..=links.len()` in order.
    pub fn new<R>(links: Vec<(Rank, OnoReceiver<R>, OnoSender<W>)>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let mut readers = JoinSet::new();
        let mut senders = Vec::with_capacity(links.len());

        for (rank, rx, sender) in links {
            readers.spawn(forward(rank, rx, tx.clone()));
            senders.push(sender);
        }

        Self {
            outbox: Outbox { links: senders },
            inbox: Inbox {
                rx,
                _readers: readers,
                recv_timeout: None,
            },
        }
    }

    /// Bounds every wait of `Inbox::recv_package`.
    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inbox.recv_timeout = timeout;
        self
    }

    /// The amount of connected workers.
    pub fn workers(&self) -> usize {
        self.outbox.links.len()
    }
}

/// Sends packages to individual workers.
pub struct Outbox<W: AsyncWrite + Unpin> {
    links: Vec<OnoSender<W>>,
}

impl<W: AsyncWrite + Unpin> Outbox<W> {
    /// Sends `pkg` to the worker of rank `dst`.
    pub async fn send_package(&mut self, pkg: &Package, dst: Rank) -> Result<()> {
        let link = dst
            .checked_sub(1)
            .and_then(|idx| self.links.get_mut(idx))
            .ok_or(TopologyErr::UnknownRank(dst))?;

        link.send(pkg).await?;
        Ok(())
    }

    /// Every worker rank, in order.
    pub fn ranks(&self) -> RangeInclusive<Rank> {
        1..=self.links.len()
    }
}

/// Receives packages from any worker, in the order they arrive.
pub struct Inbox {
    rx: mpsc::Receiver<Result<Package>>,
    // Aborts the link readers once the inbox is dropped.
    _readers: JoinSet<()>,
    recv_timeout: Option<Duration>,
}

impl Inbox {
    /// Waits for the next package from any worker.
    ///
    /// # Errors
    /// * `RecvTimeout` if a timeout is set and nothing arrives in time.
    /// * `GroupClosed` once every link is closed.
    /// * `SenderMismatch` if a package header doesn't match the rank of it's link.
    /// * `Comms` on any framing or decoding failure.
    pub async fn recv_package(&mut self) -> Result<Package> {
        let next = match self.recv_timeout {
            Some(waited) => time::timeout(waited, self.rx.recv())
                .await
                .map_err(|_| TopologyErr::RecvTimeout { waited })?,
            None => self.rx.recv().await,
        };

        next.ok_or(TopologyErr::GroupClosed)?
    }
}

async fn forward<R>(rank: Rank, mut rx: OnoReceiver<R>, tx: mpsc::Sender<Result<Package>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let res = match rx.recv().await {
            Ok(pkg) if pkg.sender() != rank => Err(TopologyErr::SenderMismatch {
                expected: rank,
                got: pkg.sender(),
            }),
            Ok(pkg) => Ok(pkg),
            Err(CommsErr::Disconnected) => {
                debug!(rank = rank; "link closed");
                break;
            }
            Err(e) => Err(e.into()),
        };

        let failed = res.is_err();
        if tx.send(res).await.is_err() || failed {
            break;
        }
    }
}
