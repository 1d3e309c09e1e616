/// Counters describing a finished coordinator run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Completed global rounds, or epochs for the asynchronous topology.
    pub rounds: usize,
    /// Model updates sent to workers.
    pub activations: usize,
    /// Packages received and handed to the handler.
    pub updates: usize,
    /// Exit messages sent once training was over.
    pub exits: usize,
}

/// What a coordinator gives back once it's done, the handler holds the final model.
#[derive(Debug)]
pub struct Outcome<H> {
    pub report: RunReport,
    pub handler: H,
}
