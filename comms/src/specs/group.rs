use serde::{Deserialize, Serialize};

use crate::Rank;

/// Where and how a process joins the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    /// The rendezvous address, the coordinator binds it and workers connect to it.
    pub addr: String,
    /// The amount of participants including the coordinator.
    pub world_size: usize,
    /// This process' rank, `0` for the coordinator.
    pub rank: Rank,
    /// How long to wait for the whole group, forever if missing.
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
}

/// Connection retries of a worker while the coordinator isn't listening yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySpec {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 100,
        }
    }
}
