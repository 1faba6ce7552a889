//! Abstract interfaces for orchestrator components.
//!
//! These traits define the contracts for:
//! - Saga state persistence (status store)
//! - Downstream participants (step execution and compensation)

pub mod participant;
pub mod status_store;

pub use participant::{
    CompensationRequest, Participant, ParticipantError, StepReply, StepRequest,
};
pub use status_store::{StatusStore, StoreError};
