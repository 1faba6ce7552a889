//! Saga orchestration.
//!
//! - `coordinator`: lifecycle of saga instances, background drivers, recovery
//! - `executor`: one forward step against its participant
//! - `compensation`: reverse walk over completed steps

pub mod compensation;
pub mod coordinator;
pub mod executor;

pub use compensation::{CompensationEngine, CompensationOutcome};
pub use coordinator::{CoordinatorError, SagaCoordinator, SagaRequest, ADHOC_SAGA_TYPE};
pub use executor::StepExecutor;
