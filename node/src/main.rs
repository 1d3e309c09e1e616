use std::{env, fs, str::FromStr};

use anyhow::{Context, bail};
use comms::{
    Topology,
    specs::{CoordinatorSpec, GroupSpec, WorkerSpec},
};
use coordinator::{CoordinatorBuilder, Handler};
use log::info;
use tokio::signal;
use worker::WorkerBuilder;

const USAGE: &str = "usage: node <coordinator|worker> <spec.json>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let (Some(role), Some(path)) = (args.next(), args.next()) else {
        bail!(USAGE);
    };

    let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;

    tokio::select! {
        ret = run(&role, &raw) => ret?,
        _ = signal::ctrl_c() => info!("received SIGINT, stopping"),
    }

    Ok(())
}

async fn run(role: &str, raw: &str) -> anyhow::Result<()> {
    match role {
        "coordinator" => {
            let mut spec: CoordinatorSpec = serde_json::from_str(raw)?;
            apply_env(&mut spec.group)?;

            let coordinator = CoordinatorBuilder::new().build(spec).await?;
            let outcome = coordinator.run().await?;
            let model = comms::serialize(outcome.handler.model());
            info!("training finished: {:?}, final model: {model:?}", outcome.report);
        }
        "worker" => {
            let mut spec: WorkerSpec = serde_json::from_str(raw)?;
            apply_env(&mut spec.group)?;

            let worker = WorkerBuilder::new().build(&spec).await?;
            let report = worker.run().await?;
            info!(rounds = report.rounds; "worker stopped: {:?}", report.exit);
        }
        other => bail!("unknown role {other:?}, {USAGE}"),
    }

    Ok(())
}

/// Lets the deployment override where and as whom a process joins the group.
fn apply_env(group: &mut GroupSpec) -> anyhow::Result<()> {
    if let Ok(addr) = env::var("FL_ADDR") {
        group.addr = addr;
    }

    override_from_env("FL_RANK", &mut group.rank)?;
    override_from_env("FL_WORLD_SIZE", &mut group.world_size)?;
    Ok(())
}

fn override_from_env<T>(key: &str, value: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = env::var(key) {
        *value = raw.parse().with_context(|| format!("parsing {key}={raw}"))?;
    }

    Ok(())
}
