//! Compensation engine.
//!
//! Walks successful steps in reverse completion order and invokes each
//! step's inverse action. Every record is persisted before the next inverse
//! action starts, so a recovered saga resumes mid-walk.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{error, info, warn};

use super::coordinator::Result;
use crate::config::RetryPolicy;
use crate::dlq::{DeadLetter, DeadLetterPublisher};
use crate::interfaces::participant::{compensation_key, CompensationRequest, ParticipantError};
use crate::interfaces::StatusStore;
use crate::model::{CompensationRecord, SagaInstance, StepResult};
use crate::participants::ParticipantRegistry;
use crate::utils::retry::backoff;

/// How a compensation walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// Every completed step was undone.
    Compensated,
    /// An inverse action exhausted its retries. The saga is `FAILED`.
    Failed { step: String, reason: String },
}

pub struct CompensationEngine {
    store: Arc<dyn StatusStore>,
    registry: Arc<ParticipantRegistry>,
    retry: RetryPolicy,
    timeout: Duration,
    dead_letters: Arc<dyn DeadLetterPublisher>,
}

impl CompensationEngine {
    pub fn new(
        store: Arc<dyn StatusStore>,
        registry: Arc<ParticipantRegistry>,
        retry: RetryPolicy,
        timeout: Duration,
        dead_letters: Arc<dyn DeadLetterPublisher>,
    ) -> Self {
        Self {
            store,
            registry,
            retry,
            timeout,
            dead_letters,
        }
    }

    /// Compensate a `COMPENSATING` saga and persist the terminal status.
    #[tracing::instrument(name = "saga.compensate", skip_all, fields(saga_id = %saga.id))]
    pub async fn compensate(&self, saga: &mut SagaInstance) -> Result<CompensationOutcome> {
        loop {
            let Some(target) = saga.pending_compensations().first().map(|r| (*r).clone()) else {
                break;
            };
            let (result, attempts) = self.invoke(saga, &target).await;

            match result {
                Ok(()) => {
                    info!(step = %target.step, attempts, "Step compensated");
                    saga.record_compensation(CompensationRecord::compensated(&target.step, attempts))?;
                    self.store.update(saga).await?;
                }
                Err(err) => {
                    let reason = err.to_string();
                    error!(step = %target.step, attempts, error = %reason, "Compensation exhausted");

                    saga.record_compensation(CompensationRecord::failed(
                        &target.step,
                        &reason,
                        attempts,
                    ))?;
                    saga.fail(format!(
                        "compensation of step {} failed after {} attempts: {}",
                        target.step, attempts, reason
                    ))?;
                    self.store.update(saga).await?;

                    let mut dead_letter =
                        DeadLetter::from_compensation_failure(saga, &target.step, &reason, attempts);
                    if let Some(step) = saga.step(&target.step) {
                        dead_letter = dead_letter.with_metadata("participant", &step.participant);
                    }
                    if let Err(e) = self.dead_letters.publish(dead_letter).await {
                        error!(error = %e, "Failed to publish dead letter");
                    }

                    return Ok(CompensationOutcome::Failed {
                        step: target.step,
                        reason,
                    });
                }
            }
        }

        saga.finish_compensation()?;
        self.store.update(saga).await?;
        info!(compensated = saga.compensations.len(), "Saga compensated");
        Ok(CompensationOutcome::Compensated)
    }

    /// Invoke one inverse action with retries. Returns the final result and
    /// the number of attempts made.
    async fn invoke(
        &self,
        saga: &SagaInstance,
        target: &StepResult,
    ) -> (std::result::Result<(), ParticipantError>, u32) {
        let Some(step) = saga.step(&target.step) else {
            return (Err(ParticipantError::Unknown(target.step.clone())), 0);
        };
        let Some(participant) = self.registry.get(&step.participant) else {
            return (Err(ParticipantError::Unknown(step.participant.clone())), 0);
        };

        let timeout = step.timeout_ms.map(Duration::from_millis).unwrap_or(self.timeout);
        let request = CompensationRequest {
            saga_id: saga.id,
            step: target.step.clone(),
            idempotency_key: compensation_key(saga.id, &target.step),
            compensation_token: target.compensation_token.clone(),
            context: saga.context(),
        };
        let attempts = AtomicU32::new(0);

        let result = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            match tokio::time::timeout(timeout, participant.compensate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ParticipantError::Timeout(timeout.as_millis() as u64)),
            }
        })
        .retry(backoff(&self.retry))
        .when(|e| !matches!(e, ParticipantError::Unknown(_)))
        .notify(|err: &ParticipantError, dur: Duration| {
            warn!(step = %target.step, error = %err, delay = ?dur, "Compensation failed, retrying");
        })
        .await;

        (result, attempts.load(Ordering::SeqCst))
    }
}
