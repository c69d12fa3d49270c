mod cancel;
mod outcome;
mod pool;
mod task;

pub use cancel::CancelFlag;
pub use outcome::{OutcomeLog, OutcomeRecord, PoolReport, Status};
pub use pool::{JobBudget, Permit, TaskPool};
pub use task::{Operation, Task, TaskId, TaskKind};
