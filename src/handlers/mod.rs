//! HTTP surface of the orchestrator.

pub mod rest;

pub use rest::{router, serve, AppState};
