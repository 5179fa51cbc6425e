//! Dependency planning and transactional loading of OMOP CDM tables.

pub mod coordinator;
pub mod directory;
pub mod memory;
pub mod planner;
pub mod retry;
pub mod sink;

pub use coordinator::{CancellationToken, LoadCoordinator, LoadOptions};
pub use directory::DirectorySink;
pub use memory::MemorySink;
pub use planner::{PlanError, TableLoadPlan, plan};
pub use retry::{Retried, with_retry};
pub use sink::{Predicate, Query, RelationalSink, SinkError};
