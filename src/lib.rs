//! Saga orchestrator.
//!
//! Runs multi-step business transactions against independent participants.
//! Each step has an inverse action; when a step fails, the steps that already
//! succeeded are compensated in reverse order. Saga state is persisted after
//! every transition so unfinished sagas resume after a restart.

pub mod config;
pub mod dlq;
pub mod handlers;
pub mod interfaces;
pub mod model;
pub mod orchestration;
pub mod participants;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod test_utils;
