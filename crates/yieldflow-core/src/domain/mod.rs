//! Domain model (IDs, positions, tasks, batches, states, errors, yield math).

pub mod alert;
pub mod batch;
pub mod errors;
pub mod ids;
pub mod position;
pub mod state;
pub mod task;
pub mod yield_calc;

pub use alert::AlertKind;
pub use batch::{BatchTrigger, DistributionBatch};
pub use errors::{DistributionError, ErrorKind, HealthFailure};
pub use ids::{BatchId, PositionId, ProductId, TaskId, UserId};
pub use position::{Position, PositionStatus};
pub use state::{BatchStatus, TaskStatus};
pub use task::YieldDistributionTask;
pub use yield_calc::daily_yield;
