//! Dead Letter Queue (DLQ) infrastructure.
//!
//! Sagas that end `FAILED` because an inverse action exhausted its retries
//! are published here for manual remediation. Nothing is retried from the
//! DLQ automatically.
//!
//! ## Topic Naming
//!
//! DLQ topics follow the pattern: `saga.dlq.{saga_type}`
//!
//! ## Usage
//!
//! ```ignore
//! let (publisher, mut receiver) = ChannelDeadLetterPublisher::new();
//! let engine = CompensationEngine::new(store, registry, policy, timeout, Arc::new(publisher));
//!
//! while let Some(dead_letter) = receiver.recv().await {
//!     alert_operators(&dead_letter);
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::model::SagaInstance;

/// DLQ topic prefix. Full topic: `{prefix}.{saga_type}`
pub const DLQ_TOPIC_PREFIX: &str = "saga.dlq";

/// Component name stamped on dead letters raised by the compensation engine.
pub const COMPENSATION_SOURCE: &str = "compensation-engine";

/// Build the DLQ topic name for a saga type.
pub fn dlq_topic_for_saga_type(saga_type: &str) -> String {
    format!("{}.{}", DLQ_TOPIC_PREFIX, saga_type)
}

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Failed to serialize dead letter: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),
}

/// A saga that needs manual intervention.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    /// Step whose inverse action could not be completed.
    pub failed_step: String,
    pub reason: String,
    /// Attempts spent on the failed inverse action.
    pub attempts: u32,
    /// Steps still holding side effects, most recent first.
    pub uncompensated_steps: Vec<String>,
    pub source_component: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl DeadLetter {
    /// Create a dead letter for a saga whose compensation was exhausted.
    pub fn from_compensation_failure(
        saga: &SagaInstance,
        failed_step: impl Into<String>,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            saga_id: saga.id,
            saga_type: saga.saga_type.clone(),
            correlation_id: saga.correlation_id.clone(),
            failed_step: failed_step.into(),
            reason: reason.into(),
            attempts,
            uncompensated_steps: saga
                .pending_compensations()
                .iter()
                .map(|r| r.step.clone())
                .collect(),
            source_component: COMPENSATION_SOURCE.to_string(),
            occurred_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the dead letter.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Get the DLQ topic for this dead letter.
    pub fn topic(&self) -> String {
        dlq_topic_for_saga_type(&self.saga_type)
    }
}

/// Trait for publishing dead letters.
///
/// Implementations handle the transport (log, in-memory channel, broker).
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publish a dead letter.
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError>;
}

/// Publisher that writes dead letters to the log at error level.
///
/// Default for the binary: operators pick them up from log aggregation.
pub struct LoggingDeadLetterPublisher;

#[async_trait]
impl DeadLetterPublisher for LoggingDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        let body = serde_json::to_string(&dead_letter)?;
        error!(
            topic = %dead_letter.topic(),
            saga_id = %dead_letter.saga_id,
            step = %dead_letter.failed_step,
            reason = %dead_letter.reason,
            dead_letter = %body,
            "Saga requires manual intervention"
        );
        Ok(())
    }
}

/// In-memory DLQ publisher using a channel.
///
/// Used when embedding the orchestrator and in tests.
pub struct ChannelDeadLetterPublisher {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterPublisher {
    /// Create a new channel-based DLQ publisher.
    ///
    /// Returns the publisher and a receiver for consuming dead letters.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterPublisher for ChannelDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        info!(
            topic = %dead_letter.topic(),
            saga_id = %dead_letter.saga_id,
            reason = %dead_letter.reason,
            "Publishing to channel DLQ"
        );
        self.sender
            .send(dead_letter)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}

/// Default publisher for the binary.
pub fn default_publisher() -> Arc<dyn DeadLetterPublisher> {
    Arc::new(LoggingDeadLetterPublisher)
}
