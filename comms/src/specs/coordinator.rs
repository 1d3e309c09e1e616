use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::{GroupSpec, ModelSpec};

/// Which coordinator topology to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSpec {
    Synchronous { global_rounds: NonZeroUsize },
    Asynchronous { epochs: NonZeroUsize },
}

/// How much a stale update is trusted when mixed into the global model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessSpec {
    Constant,
    Polynomial { a: f32 },
    Hinge { a: f32, b: u64 },
}

/// The specification for the `Handler` trait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerSpec {
    FedAvg,
    FedAsync { alpha: f32, staleness: StalenessSpec },
}

/// The specification of the coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    pub group: GroupSpec,
    pub mode: ModeSpec,
    pub client_num_per_round: usize,
    pub model: ModelSpec,
    pub handler: HandlerSpec,
    /// Bounded wait for every receive, no timeout if missing.
    #[serde(default)]
    pub recv_timeout_ms: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
}
