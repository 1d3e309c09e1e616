/// A participant's protocol state machine, driven to completion by `run`.
///
/// Implemented by the synchronous and asynchronous coordinators and by the worker,
/// the process picks one of them from it's configuration.
#[allow(unused)]
#[trait_variant::make(Topology: Send)]
pub trait LocalTopology {
    /// What the topology hands back once it terminated.
    type Output;

    /// The error that stopped the topology.
    type Error;

    /// Runs the protocol until it's configured end.
    async fn run(self) -> Result<Self::Output, Self::Error>;
}
