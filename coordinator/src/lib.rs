mod aggregator;
mod asynchronous;
mod builder;
mod error;
mod group;
mod handler;
pub mod handlers;
mod report;
mod sync;
mod test;

pub use aggregator::{AggregatorHandle, spawn as spawn_aggregator};
pub use asynchronous::{AsyncCoordinator, GateOpener, GateWaiter, epoch_gate};
pub use builder::{BoxedHandler, Coordinator, CoordinatorBuilder};
pub use error::{ConnectionFailure, Result, TopologyErr};
pub use group::{Group, Inbox, Outbox, Rendezvous};
pub use handler::{Handler, HandlerErr};
pub use report::{Outcome, RunReport};
pub use sync::SyncCoordinator;
