pub mod coordinator;
pub mod group;
pub mod model;
pub mod worker;

pub use coordinator::{CoordinatorSpec, HandlerSpec, ModeSpec, StalenessSpec};
pub use group::{GroupSpec, RetrySpec};
pub use model::ModelSpec;
pub use worker::{TrainerSpec, WorkerSpec};
