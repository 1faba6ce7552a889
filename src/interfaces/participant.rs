//! Participant interface.
//!
//! A participant is the capability the coordinator uses to reach a
//! downstream service: submit a step, await its result, and undo it later.
//! The transport (in-process, HTTP, a broker) is an implementation detail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::SagaContext;

/// Result type for participant calls.
pub type Result<T> = std::result::Result<T, ParticipantError>;

/// Errors returned by participants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParticipantError {
    /// Business rejection. Never retried.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Temporary failure (connection reset, 5xx). Retried per policy.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// No answer within the step timeout. Handled like a rejection.
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Unknown participant: {0}")]
    Unknown(String),
}

impl ParticipantError {
    /// Whether retrying might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ParticipantError::Transient(_))
    }
}

/// Forward step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub saga_id: Uuid,
    pub step: String,
    /// `"{saga_id}:{step}"`. Participants must treat repeated keys as the
    /// same request and return the original reply.
    pub idempotency_key: String,
    /// Step payload from the step definition.
    #[serde(default)]
    pub payload: Value,
    pub context: SagaContext,
}

/// Successful step reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReply {
    /// Output exposed to later steps.
    #[serde(default)]
    pub output: Option<Value>,
    /// Data needed to reverse the step.
    #[serde(default)]
    pub compensation_token: Option<Value>,
}

impl StepReply {
    pub fn new(output: Value) -> Self {
        Self {
            output: Some(output),
            compensation_token: None,
        }
    }

    pub fn with_token(mut self, token: Value) -> Self {
        self.compensation_token = Some(token);
        self
    }
}

/// Inverse action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationRequest {
    pub saga_id: Uuid,
    pub step: String,
    /// `"{saga_id}:{step}:compensate"`.
    pub idempotency_key: String,
    #[serde(default)]
    pub compensation_token: Option<Value>,
    pub context: SagaContext,
}

/// Build the idempotency key of a forward step.
pub fn step_key(saga_id: Uuid, step: &str) -> String {
    format!("{saga_id}:{step}")
}

/// Build the idempotency key of an inverse action.
pub fn compensation_key(saga_id: Uuid, step: &str) -> String {
    format!("{saga_id}:{step}:compensate")
}

/// Downstream participant.
///
/// Implementations must be idempotent per `idempotency_key`: callers retry
/// transient failures and may redeliver after a restart.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Perform the forward action.
    async fn execute(&self, request: &StepRequest) -> Result<StepReply>;

    /// Undo a previously successful forward action.
    async fn compensate(&self, request: &CompensationRequest) -> Result<()>;
}
