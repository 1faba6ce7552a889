//! Saga coordinator.
//!
//! `submit` validates and persists a `PENDING` saga, then hands it to a
//! background task and returns. The task drives the saga to a terminal
//! status, persisting after every transition. Callers observe progress only
//! through `get_status` / `list`.

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::compensation::{CompensationEngine, CompensationOutcome};
use super::executor::StepExecutor;
use crate::config::{Config, RetryPolicy};
use crate::dlq::DeadLetterPublisher;
use crate::interfaces::{StatusStore, StoreError};
use crate::model::{ModelError, SagaInstance, SagaStatus, StepDefinition};
use crate::participants::{ParticipantRegistry, SagaDefinitions};
use crate::utils::retry::backoff;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Saga type recorded for requests that list their own steps.
pub const ADHOC_SAGA_TYPE: &str = "adhoc";

/// Interval between status reads in `wait_for_terminal`.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Errors returned by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    #[error("Saga not found: {0}")]
    NotFound(Uuid),

    #[error("Timed out waiting for saga {0}")]
    WaitTimeout(Uuid),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl CoordinatorError {
    /// Errors the caller caused, reported synchronously as 400.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownSagaType(_))
    }

    /// Errors after which a saga driver must stop instead of re-driving:
    /// another driver owns the saga, or the saga is gone.
    fn ends_driver(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Storage(StoreError::VersionConflict { .. })
                | Self::Storage(StoreError::NotFound(_))
        )
    }
}

/// Request to start a saga.
///
/// Either `saga_type` names a registered definition, or `steps` lists the
/// steps explicitly (with `saga_type` as an optional label).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaRequest {
    #[serde(default)]
    pub saga_type: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl SagaRequest {
    /// Request for a registered saga type.
    pub fn of_type(saga_type: impl Into<String>, payload: Value) -> Self {
        Self {
            saga_type: Some(saga_type.into()),
            payload,
            ..Default::default()
        }
    }

    /// Request listing its own steps.
    pub fn with_steps(steps: Vec<StepDefinition>, payload: Value) -> Self {
        Self {
            steps,
            payload,
            ..Default::default()
        }
    }
}

/// Owns the lifecycle of saga instances.
#[derive(Clone)]
pub struct SagaCoordinator {
    store: Arc<dyn StatusStore>,
    registry: Arc<ParticipantRegistry>,
    definitions: Arc<SagaDefinitions>,
    executor: Arc<StepExecutor>,
    compensation: Arc<CompensationEngine>,
    limiter: Arc<Semaphore>,
    saga_timeout: Option<Duration>,
    /// Backoff for re-driving a saga after a store or model error.
    redrive: RetryPolicy,
}

impl SagaCoordinator {
    pub fn new(
        config: &Config,
        store: Arc<dyn StatusStore>,
        registry: ParticipantRegistry,
        definitions: SagaDefinitions,
        dead_letters: Arc<dyn DeadLetterPublisher>,
    ) -> Self {
        let registry = Arc::new(registry);
        let step_timeout = config.execution.step_timeout();

        Self {
            executor: Arc::new(StepExecutor::new(
                registry.clone(),
                config.retry.step.clone(),
                step_timeout,
            )),
            compensation: Arc::new(CompensationEngine::new(
                store.clone(),
                registry.clone(),
                config.retry.compensation.clone(),
                step_timeout,
                dead_letters,
            )),
            limiter: Arc::new(Semaphore::new(config.execution.max_concurrent_sagas.max(1))),
            saga_timeout: config.execution.saga_timeout(),
            redrive: config.retry.step.clone(),
            definitions: Arc::new(definitions),
            registry,
            store,
        }
    }

    pub fn definitions(&self) -> &SagaDefinitions {
        &self.definitions
    }

    /// Validate, persist as `PENDING` and schedule a saga. Returns without
    /// waiting for any step.
    pub async fn submit(&self, request: SagaRequest) -> Result<Uuid> {
        let (saga_type, steps) = self.resolve(&request)?;
        self.validate_steps(&steps)?;

        let mut saga = SagaInstance::new(saga_type, steps, request.payload, request.correlation_id);
        if let Some(deadline) = self
            .saga_timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
        {
            let expires_at = saga.created_at + deadline;
            saga = saga.with_deadline(expires_at);
        }

        self.store.insert(&saga).await?;
        info!(
            saga_id = %saga.id,
            saga_type = %saga.saga_type,
            correlation_id = %saga.correlation_id,
            steps = saga.steps.len(),
            "Saga accepted"
        );

        self.spawn(saga.id);
        Ok(saga.id)
    }

    /// Snapshot of a saga.
    pub async fn get_status(&self, id: Uuid) -> Result<SagaInstance> {
        self.store.get(id).await?.ok_or(CoordinatorError::NotFound(id))
    }

    /// Snapshots, optionally filtered by status, newest first.
    pub async fn list(&self, status: Option<SagaStatus>) -> Result<Vec<SagaInstance>> {
        Ok(self.store.list(status).await?)
    }

    /// Resume every saga left non-terminal in the store. Returns how many
    /// were rescheduled.
    pub async fn recover(&self) -> Result<usize> {
        let unfinished = self.store.list_unfinished().await?;
        for saga in &unfinished {
            info!(saga_id = %saga.id, status = %saga.status, "Recovering saga");
            self.spawn(saga.id);
        }
        Ok(unfinished.len())
    }

    /// Poll until the saga is terminal or `timeout` elapses.
    pub async fn wait_for_terminal(&self, id: Uuid, timeout: Duration) -> Result<SagaInstance> {
        let poll = async {
            loop {
                match self.get_status(id).await {
                    Ok(saga) if saga.is_terminal() => return Ok(saga),
                    Ok(_) => tokio::time::sleep(POLL_INTERVAL).await,
                    Err(e) => return Err(e),
                }
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| CoordinatorError::WaitTimeout(id))?
    }

    fn resolve(&self, request: &SagaRequest) -> Result<(String, Vec<StepDefinition>)> {
        let saga_type = request
            .saga_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        if !request.steps.is_empty() {
            let label = saga_type.unwrap_or(ADHOC_SAGA_TYPE);
            return Ok((label.to_string(), request.steps.clone()));
        }

        let saga_type = saga_type.ok_or_else(|| {
            CoordinatorError::Validation("either sagaType or steps is required".to_string())
        })?;
        let steps = self
            .definitions
            .get(saga_type)
            .ok_or_else(|| CoordinatorError::UnknownSagaType(saga_type.to_string()))?;
        Ok((saga_type.to_string(), steps.to_vec()))
    }

    fn validate_steps(&self, steps: &[StepDefinition]) -> Result<()> {
        if steps.is_empty() {
            return Err(CoordinatorError::Validation(
                "a saga needs at least one step".to_string(),
            ));
        }
        for (index, step) in steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(CoordinatorError::Validation(format!(
                    "step {index} has no name"
                )));
            }
            if steps[..index].iter().any(|s| s.name == step.name) {
                return Err(CoordinatorError::Validation(format!(
                    "duplicate step name: {}",
                    step.name
                )));
            }
            if !self.registry.contains(&step.participant) {
                return Err(CoordinatorError::Validation(format!(
                    "step {} references unknown participant: {}",
                    step.name, step.participant
                )));
            }
        }
        Ok(())
    }

    fn spawn(&self, id: Uuid) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.drive(id).await;
        });
    }

    async fn drive(self, id: Uuid) {
        let _permit = match self.limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(saga_id = %id, "Saga limiter closed, not driving saga");
                return;
            }
        };

        // Each run reloads the snapshot, so a failed write is retried from the
        // last persisted state. Participants deduplicate by idempotency key.
        let outcome = (|| self.run(id))
            .retry(backoff(&self.redrive))
            .when(|e: &CoordinatorError| !e.ends_driver())
            .notify(|err: &CoordinatorError, dur: Duration| {
                warn!(saga_id = %id, error = %err, delay = ?dur, "Saga driver failed, re-driving");
            })
            .await;

        match outcome {
            Ok(()) => {}
            Err(CoordinatorError::Storage(StoreError::VersionConflict {
                expected, actual, ..
            })) => {
                warn!(
                    saga_id = %id,
                    expected,
                    actual,
                    "Saga modified concurrently, another driver owns it"
                );
            }
            Err(e) => {
                error!(saga_id = %id, error = %e, "Saga driver gave up, saga resumes on next recovery");
            }
        }
    }

    #[tracing::instrument(name = "saga.run", skip(self))]
    async fn run(&self, id: Uuid) -> Result<()> {
        let mut saga = self.get_status(id).await?;
        if saga.is_terminal() {
            debug!(status = %saga.status, "Saga already terminal");
            return Ok(());
        }

        if saga.status == SagaStatus::Pending {
            saga.start()?;
            self.store.update(&mut saga).await?;
            info!("Saga started");
        }

        while let Some(step) = saga.next_step().cloned() {
            if saga.is_expired(Utc::now()) {
                warn!(step = %step.name, "Saga deadline exceeded");
                saga.begin_compensation(format!(
                    "saga deadline exceeded before step {}",
                    step.name
                ))?;
                self.store.update(&mut saga).await?;
                break;
            }

            let result = self.executor.execute(&step, &saga.context()).await;
            saga.record_step(result)?;
            self.store.update(&mut saga).await?;
        }

        match saga.status {
            SagaStatus::InProgress => {
                saga.complete()?;
                self.store.update(&mut saga).await?;
                info!(steps = saga.history.len(), "Saga completed");
            }
            SagaStatus::Compensating => {
                info!(error = ?saga.error, "Saga compensating");
                match self.compensation.compensate(&mut saga).await? {
                    CompensationOutcome::Compensated => {}
                    CompensationOutcome::Failed { step, reason } => {
                        error!(%step, %reason, "Saga failed, manual intervention required");
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
