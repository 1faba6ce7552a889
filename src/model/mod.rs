//! Saga state model.
//!
//! `SagaInstance` is an explicit finite-state machine. Every mutation goes
//! through a transition method that checks the current status, so a saga
//! persisted after each transition can always be resumed from the store.
//!
//! ```text
//! PENDING -> IN_PROGRESS -> COMPLETED
//!                 |
//!                 v
//!           COMPENSATING -> COMPENSATED
//!                 |
//!                 v
//!               FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Result type for state transitions.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised by rejected state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Saga {id} is terminal ({status}), no further transitions allowed")]
    Terminal { id: Uuid, status: SagaStatus },

    #[error("Invalid transition for saga {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: SagaStatus,
        to: SagaStatus,
    },

    #[error("Step out of order for saga {id}: expected {expected}, got {actual}")]
    StepOutOfOrder {
        id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Step {step} has no pending compensation in saga {id}")]
    CompensationOutOfOrder { id: Uuid, step: String },

    #[error("Saga {id} still has {remaining} steps to run")]
    StepsRemaining { id: Uuid, remaining: usize },
}

/// Overall saga status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Accepted, not yet picked up by the coordinator.
    Pending,
    /// Forward steps are executing.
    InProgress,
    /// Every step succeeded.
    Completed,
    /// A step failed; inverse actions are running.
    Compensating,
    /// Terminal failure requiring manual intervention.
    Failed,
    /// Every completed step was undone.
    Compensated,
}

impl SagaStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Compensated)
    }

    /// Wire name, e.g. `IN_PROGRESS`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Compensating => "COMPENSATING",
            Self::Failed => "FAILED",
            Self::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "COMPENSATING" => Ok(Self::Compensating),
            "FAILED" => Ok(Self::Failed),
            "COMPENSATED" => Ok(Self::Compensated),
            other => Err(format!("unknown saga status: {other}")),
        }
    }
}

/// One step of a saga, bound to a registered participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Step name, unique within the saga.
    pub name: String,
    /// Registry key of the participant that performs the step.
    pub participant: String,
    /// Step-specific input, merged with the saga context by participants.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Per-step timeout override in milliseconds.
    #[serde(default, alias = "timeout_ms", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, participant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            participant: participant.into(),
            payload: Value::Null,
            timeout_ms: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Outcome of a forward step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Success,
    Failure,
}

/// Immutable record of one forward step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: String,
    pub outcome: StepOutcome,
    /// Data the participant needs to reverse the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_token: Option<Value>,
    /// Step output, visible to later steps through the saga context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl StepResult {
    pub fn success(
        step: impl Into<String>,
        output: Option<Value>,
        compensation_token: Option<Value>,
        attempts: u32,
    ) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Success,
            compensation_token,
            output,
            error: None,
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn failure(step: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Failure,
            compensation_token: None,
            output: None,
            error: Some(error.into()),
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// Outcome of an inverse action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationStatus {
    Compensated,
    Failed,
}

/// Record of one compensation, created only by the compensation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationRecord {
    pub step: String,
    pub outcome: CompensationStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CompensationRecord {
    pub fn compensated(step: impl Into<String>, attempts: u32) -> Self {
        Self {
            step: step.into(),
            outcome: CompensationStatus::Compensated,
            attempts,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(step: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            step: step.into(),
            outcome: CompensationStatus::Failed,
            attempts,
            error: Some(error.into()),
            recorded_at: Utc::now(),
        }
    }
}

/// Snapshot of the data participants see while a saga runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaContext {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    /// The submitted request payload.
    pub payload: Value,
    /// Outputs of successful steps, keyed by step name.
    pub outputs: serde_json::Map<String, Value>,
}

/// A saga and its full execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInstance {
    pub id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    pub steps: Vec<StepDefinition>,
    pub current_step: usize,
    pub status: SagaStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub history: Vec<StepResult>,
    #[serde(default)]
    pub compensations: Vec<CompensationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optimistic concurrency version, bumped by the status store on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    /// Create a new `PENDING` saga.
    pub fn new(
        saga_type: impl Into<String>,
        steps: Vec<StepDefinition>,
        payload: Value,
        correlation_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            saga_type: saga_type.into(),
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            steps,
            current_step: 0,
            status: SagaStatus::Pending,
            payload,
            history: Vec::new(),
            compensations: Vec::new(),
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn with_deadline(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the overall deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// The step the coordinator should run next, if any.
    pub fn next_step(&self) -> Option<&StepDefinition> {
        if self.status != SagaStatus::InProgress {
            return None;
        }
        self.steps.get(self.current_step)
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Build the context handed to participants.
    pub fn context(&self) -> SagaContext {
        let outputs = self
            .history
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.output.clone().map(|o| (r.step.clone(), o)))
            .collect();

        SagaContext {
            saga_id: self.id,
            saga_type: self.saga_type.clone(),
            correlation_id: self.correlation_id.clone(),
            payload: self.payload.clone(),
            outputs,
        }
    }

    /// `PENDING -> IN_PROGRESS`. Resuming an `IN_PROGRESS` saga is a no-op.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            SagaStatus::Pending => {
                self.transition(SagaStatus::InProgress);
                Ok(())
            }
            SagaStatus::InProgress => Ok(()),
            other => Err(self.invalid(other, SagaStatus::InProgress)),
        }
    }

    /// Append a forward step result.
    ///
    /// A success advances the step index; a failure moves the saga into
    /// `COMPENSATING`.
    pub fn record_step(&mut self, result: StepResult) -> Result<()> {
        self.ensure_not_terminal()?;
        if self.status != SagaStatus::InProgress {
            return Err(self.invalid(self.status, SagaStatus::InProgress));
        }

        let expected = self
            .steps
            .get(self.current_step)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        if result.step != expected {
            return Err(ModelError::StepOutOfOrder {
                id: self.id,
                expected,
                actual: result.step,
            });
        }

        match result.outcome {
            StepOutcome::Success => {
                self.current_step += 1;
                self.history.push(result);
                self.touch();
            }
            StepOutcome::Failure => {
                let reason = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("step {} failed", result.step));
                self.history.push(result);
                self.begin_compensation(reason)?;
            }
        }
        Ok(())
    }

    /// `IN_PROGRESS -> COMPLETED` once every step has succeeded.
    pub fn complete(&mut self) -> Result<()> {
        self.ensure_not_terminal()?;
        if self.status != SagaStatus::InProgress {
            return Err(self.invalid(self.status, SagaStatus::Completed));
        }
        let remaining = self.steps.len().saturating_sub(self.current_step);
        if remaining > 0 {
            return Err(ModelError::StepsRemaining {
                id: self.id,
                remaining,
            });
        }
        self.transition(SagaStatus::Completed);
        Ok(())
    }

    /// `IN_PROGRESS -> COMPENSATING`.
    pub fn begin_compensation(&mut self, reason: impl Into<String>) -> Result<()> {
        self.ensure_not_terminal()?;
        match self.status {
            SagaStatus::InProgress | SagaStatus::Pending => {
                self.error = Some(reason.into());
                self.transition(SagaStatus::Compensating);
                Ok(())
            }
            other => Err(self.invalid(other, SagaStatus::Compensating)),
        }
    }

    /// Successful steps that have not been compensated yet, most recent first.
    pub fn pending_compensations(&self) -> Vec<&StepResult> {
        self.history
            .iter()
            .rev()
            .filter(|r| r.is_success())
            .filter(|r| {
                !self
                    .compensations
                    .iter()
                    .any(|c| c.step == r.step && c.outcome == CompensationStatus::Compensated)
            })
            .collect()
    }

    /// Append a compensation record. Only the most recent uncompensated step
    /// may be recorded, which keeps the walk in reverse completion order.
    pub fn record_compensation(&mut self, record: CompensationRecord) -> Result<()> {
        self.ensure_not_terminal()?;
        if self.status != SagaStatus::Compensating {
            return Err(self.invalid(self.status, SagaStatus::Compensating));
        }
        let next = self.pending_compensations().first().map(|r| r.step.clone());
        if next.as_deref() != Some(record.step.as_str()) {
            return Err(ModelError::CompensationOutOfOrder {
                id: self.id,
                step: record.step,
            });
        }
        self.compensations.push(record);
        self.touch();
        Ok(())
    }

    /// `COMPENSATING -> COMPENSATED`.
    pub fn finish_compensation(&mut self) -> Result<()> {
        self.ensure_not_terminal()?;
        if self.status != SagaStatus::Compensating {
            return Err(self.invalid(self.status, SagaStatus::Compensated));
        }
        if let Some(step) = self.pending_compensations().first() {
            return Err(ModelError::CompensationOutOfOrder {
                id: self.id,
                step: step.step.clone(),
            });
        }
        self.transition(SagaStatus::Compensated);
        Ok(())
    }

    /// Any non-terminal status `-> FAILED`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.ensure_not_terminal()?;
        self.error = Some(reason.into());
        self.transition(SagaStatus::Failed);
        Ok(())
    }

    fn transition(&mut self, to: SagaStatus) {
        self.status = to;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn ensure_not_terminal(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ModelError::Terminal {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn invalid(&self, from: SagaStatus, to: SagaStatus) -> ModelError {
        if from.is_terminal() {
            return ModelError::Terminal {
                id: self.id,
                status: from,
            };
        }
        ModelError::InvalidTransition {
            id: self.id,
            from,
            to,
        }
    }
}
