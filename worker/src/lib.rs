pub mod builder;
mod connect;
pub mod error;
pub mod trainer;
pub mod worker;

pub use builder::{BoxedTrainer, TcpWorker, WorkerBuilder};
pub use connect::{join_group, retry_with_backoff};
pub use error::{Result, WorkerErr};
pub use trainer::{Echo, Shift, Trainer};
pub use worker::{ExitReason, Worker, WorkerReport};
