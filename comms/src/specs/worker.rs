use serde::{Deserialize, Serialize};

use super::{GroupSpec, ModelSpec, RetrySpec};

/// The specification for the `Trainer` trait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerSpec {
    /// Sends back the received parameters untouched.
    Echo,
    /// Adds `delta` to every parameter.
    Shift { delta: f32 },
}

/// The specification of a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub group: GroupSpec,
    pub model: ModelSpec,
    pub trainer: TrainerSpec,
    #[serde(default)]
    pub retry: RetrySpec,
}
