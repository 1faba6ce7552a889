//! Step executor.
//!
//! Runs one step against its participant and turns the outcome into a
//! `StepResult`. Recording the result is the coordinator's job.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::interfaces::participant::{step_key, ParticipantError, StepRequest};
use crate::model::{SagaContext, StepDefinition, StepResult};
use crate::participants::ParticipantRegistry;
use crate::utils::retry::backoff;

/// Executes forward steps with a per-call timeout and transient retries.
pub struct StepExecutor {
    registry: Arc<ParticipantRegistry>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl StepExecutor {
    pub fn new(registry: Arc<ParticipantRegistry>, retry: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            registry,
            retry,
            default_timeout,
        }
    }

    /// Execute `step` for the saga described by `context`.
    ///
    /// Only transient errors are retried. Rejections, timeouts, unknown
    /// participants and exhausted retries all yield a `FAILURE` result.
    #[tracing::instrument(name = "saga.step", skip_all, fields(saga_id = %context.saga_id, step = %step.name))]
    pub async fn execute(&self, step: &StepDefinition, context: &SagaContext) -> StepResult {
        let Some(participant) = self.registry.get(&step.participant) else {
            let err = ParticipantError::Unknown(step.participant.clone());
            warn!(error = %err, "Step has no participant");
            return StepResult::failure(&step.name, err.to_string(), 0);
        };

        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let request = StepRequest {
            saga_id: context.saga_id,
            step: step.name.clone(),
            idempotency_key: step_key(context.saga_id, &step.name),
            payload: step.payload.clone(),
            context: context.clone(),
        };
        let attempts = AtomicU32::new(0);

        let outcome = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            match tokio::time::timeout(timeout, participant.execute(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ParticipantError::Timeout(timeout.as_millis() as u64)),
            }
        })
        .retry(backoff(&self.retry))
        .when(ParticipantError::is_transient)
        .notify(|err: &ParticipantError, dur: Duration| {
            warn!(error = %err, delay = ?dur, "Transient step failure, retrying");
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match outcome {
            Ok(reply) => {
                debug!(attempts, "Step succeeded");
                StepResult::success(&step.name, reply.output, reply.compensation_token, attempts)
            }
            Err(err) => {
                warn!(error = %err, attempts, "Step failed");
                StepResult::failure(&step.name, err.to_string(), attempts)
            }
        }
    }
}
