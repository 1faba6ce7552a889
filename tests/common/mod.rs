//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use saga_orchestrator::config::Config;
use saga_orchestrator::dlq::{ChannelDeadLetterPublisher, DeadLetter};
use saga_orchestrator::interfaces::participant::{
    CompensationRequest, Participant, ParticipantError, Result, StepReply, StepRequest,
};
use saga_orchestrator::interfaces::StatusStore;
use saga_orchestrator::model::StepDefinition;
use saga_orchestrator::orchestration::SagaCoordinator;
use saga_orchestrator::participants::{ParticipantRegistry, SagaDefinitions};

pub const WAIT: Duration = Duration::from_secs(10);

/// Participant that records idempotency keys and rejects on demand.
pub struct Recorder {
    name: String,
    reject: bool,
    keys: Mutex<Vec<String>>,
    pub executions: AtomicU32,
}

impl Recorder {
    pub fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, false))
    }

    pub fn rejecting(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, true))
    }

    fn build(name: &str, reject: bool) -> Self {
        Self {
            name: name.to_string(),
            reject,
            keys: Mutex::new(Vec::new()),
            executions: AtomicU32::new(0),
        }
    }

    /// Idempotency keys seen, in call order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    pub fn execution_count(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Participant for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepReply> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(request.idempotency_key.clone());
        if self.reject {
            return Err(ParticipantError::Rejected(format!("{} says no", self.name)));
        }
        Ok(StepReply::new(json!({ "by": self.name })))
    }

    async fn compensate(&self, request: &CompensationRequest) -> Result<()> {
        self.keys.lock().unwrap().push(request.idempotency_key.clone());
        Ok(())
    }
}

pub fn step(name: &str, participant: &str) -> StepDefinition {
    StepDefinition::new(name, participant)
}

/// Coordinator with fast retries over the given store and registry.
pub fn coordinator(
    store: Arc<dyn StatusStore>,
    registry: ParticipantRegistry,
) -> (
    SagaCoordinator,
    tokio::sync::mpsc::UnboundedReceiver<DeadLetter>,
) {
    let (publisher, receiver) = ChannelDeadLetterPublisher::new();
    let coordinator = SagaCoordinator::new(
        &Config::for_test(),
        store,
        registry,
        SagaDefinitions::builtin(),
        Arc::new(publisher),
    );
    (coordinator, receiver)
}
