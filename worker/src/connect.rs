use std::{fmt, future::Future, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    handshake::{Hello, Ready},
    specs::{GroupSpec, RetrySpec},
};
use log::{info, warn};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::error::{Result, WorkerErr};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retries an async operation with exponential backoff.
///
/// Delays go `initial_delay`, `2 * initial_delay`, `4 * initial_delay`, ... capped at 30s.
///
/// # Arguments
/// * `operation` - A name for the operation, for logging.
/// * `max_attempts` - How many times to try, at least once.
/// * `initial_delay` - The wait after the first failure.
/// * `f` - Produces a new attempt.
///
/// # Returns
/// The first success or the error of the last attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: &str,
    max_attempts: u32,
    initial_delay: Duration,
    mut f: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                warn!("{operation} failed (attempt {attempt}/{max_attempts}): {e}");
                time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
                attempt += 1;
            }
        }
    }
}

/// Joins the group described by `spec`.
///
/// Connects to the rendezvous address, retrying while the coordinator isn't
/// listening yet, introduces itself and waits until the coordinator confirms
/// the whole group is present.
///
/// # Arguments
/// * `spec` - Where to connect, this worker's rank and the expected world size.
/// * `retry` - How persistently to connect.
///
/// # Returns
/// Both ends of the link to the coordinator, sending packages stamped with this worker's rank.
pub async fn join_group(
    spec: &GroupSpec,
    retry: RetrySpec,
) -> Result<(OnoReceiver<OwnedReadHalf>, OnoSender<OwnedWriteHalf>)> {
    let failure = |detail: String| WorkerErr::ConnectionFailure {
        addr: spec.addr.clone(),
        detail,
    };

    let initial_delay = Duration::from_millis(retry.initial_delay_ms);
    let mut stream = retry_with_backoff("connect", retry.max_attempts, initial_delay, || {
        TcpStream::connect(spec.addr.as_str())
    })
    .await
    .map_err(|e| failure(e.to_string()))?;

    let hello = Hello {
        rank: spec.rank,
        world_size: spec.world_size,
    };
    hello.write_to(&mut stream).await?;
    info!(rank = spec.rank; "connected to {}, waiting for the group", spec.addr);

    let ready = match spec.handshake_timeout_ms.map(Duration::from_millis) {
        Some(limit) => time::timeout(limit, Ready::read_from(&mut stream))
            .await
            .map_err(|_| failure(format!("the group wasn't ready after {limit:?}")))?,
        None => Ready::read_from(&mut stream).await,
    }
    .map_err(|e| failure(e.to_string()))?;

    if ready.world_size != spec.world_size {
        return Err(failure(format!(
            "the coordinator formed a group of {}, expected {}",
            ready.world_size, spec.world_size
        )));
    }

    info!(rank = spec.rank, world_size = ready.world_size; "joined the group");
    let (rx, tx) = stream.into_split();
    Ok(comms::channel(rx, tx, spec.rank))
}
