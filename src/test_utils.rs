//! Test utilities and mock implementations.
//!
//! `ScriptedParticipant` lets tests decide, per call, whether a step or its
//! inverse action succeeds, and records every call in a shared log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::dlq::{ChannelDeadLetterPublisher, DeadLetter};
use crate::interfaces::participant::{
    CompensationRequest, Participant, ParticipantError, Result, StepReply, StepRequest,
};
use crate::interfaces::status_store::{self, StatusStore, StoreError};
use crate::model::{SagaInstance, SagaStatus};
use crate::orchestration::SagaCoordinator;
use crate::participants::{ParticipantRegistry, SagaDefinitions};
use crate::storage::InMemoryStatusStore;

/// Ordered log of participant calls, e.g. `execute:reserve`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a call log.
pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().map(|calls| calls.clone()).unwrap_or_default()
}

/// Participant whose responses are scripted up front.
///
/// Queued responses are consumed first; once a queue is empty the
/// participant falls back to its default (success, unless configured
/// otherwise).
pub struct ScriptedParticipant {
    name: String,
    log: CallLog,
    execute_script: Mutex<VecDeque<Result<()>>>,
    compensate_script: Mutex<VecDeque<Result<()>>>,
    execute_default: Result<()>,
    compensate_default: Result<()>,
    delay: Option<Duration>,
}

impl ScriptedParticipant {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            execute_script: Mutex::new(VecDeque::new()),
            compensate_script: Mutex::new(VecDeque::new()),
            execute_default: Ok(()),
            compensate_default: Ok(()),
            delay: None,
        }
    }

    /// Every forward call is rejected with `reason`.
    pub fn rejecting(mut self, reason: &str) -> Self {
        self.execute_default = Err(ParticipantError::Rejected(reason.to_string()));
        self
    }

    /// The first `times` forward calls fail with a transient error.
    pub fn flaky(self, times: usize) -> Self {
        if let Ok(mut script) = self.execute_script.lock() {
            for _ in 0..times {
                script.push_back(Err(ParticipantError::Transient("connection reset".into())));
            }
        }
        self
    }

    /// Every inverse action fails with a transient error.
    pub fn failing_compensation(mut self) -> Self {
        self.compensate_default = Err(ParticipantError::Transient("refund gateway down".into()));
        self
    }

    /// The first `times` inverse actions fail, later ones succeed.
    pub fn flaky_compensation(self, times: usize) -> Self {
        if let Ok(mut script) = self.compensate_script.lock() {
            for _ in 0..times {
                script.push_back(Err(ParticipantError::Transient("timeout".into())));
            }
        }
        self
    }

    /// Sleep before answering each forward call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn record(&self, entry: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }

    fn next(script: &Mutex<VecDeque<Result<()>>>, default: &Result<()>) -> Result<()> {
        script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| default.clone())
    }
}

#[async_trait]
impl Participant for ScriptedParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepReply> {
        self.record(format!("execute:{}", request.step));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Self::next(&self.execute_script, &self.execute_default)?;
        Ok(StepReply::new(json!({ "step": request.step, "key": request.idempotency_key }))
            .with_token(json!({ "undo": request.step })))
    }

    async fn compensate(&self, request: &CompensationRequest) -> Result<()> {
        self.record(format!("compensate:{}", request.step));
        Self::next(&self.compensate_script, &self.compensate_default)
    }
}

/// Coordinator over an in-memory store with fast retries, plus the store and
/// the dead letter receiver for assertions.
pub fn test_coordinator(
    participants: Vec<ScriptedParticipant>,
) -> (
    SagaCoordinator,
    Arc<InMemoryStatusStore>,
    tokio::sync::mpsc::UnboundedReceiver<DeadLetter>,
) {
    test_coordinator_with(Config::for_test(), participants)
}

pub fn test_coordinator_with(
    config: Config,
    participants: Vec<ScriptedParticipant>,
) -> (
    SagaCoordinator,
    Arc<InMemoryStatusStore>,
    tokio::sync::mpsc::UnboundedReceiver<DeadLetter>,
) {
    let store = Arc::new(InMemoryStatusStore::new());
    let (coordinator, receiver) =
        coordinator_over(config, store.clone() as Arc<dyn StatusStore>, participants);
    (coordinator, store, receiver)
}

/// Coordinator over any store.
pub fn coordinator_over(
    config: Config,
    store: Arc<dyn StatusStore>,
    participants: Vec<ScriptedParticipant>,
) -> (
    SagaCoordinator,
    tokio::sync::mpsc::UnboundedReceiver<DeadLetter>,
) {
    let mut registry = ParticipantRegistry::new();
    for participant in participants {
        registry.register(Arc::new(participant));
    }
    let (publisher, receiver) = ChannelDeadLetterPublisher::new();

    let coordinator = SagaCoordinator::new(
        &config,
        store,
        registry,
        SagaDefinitions::builtin(),
        Arc::new(publisher),
    );
    (coordinator, receiver)
}

/// In-memory store whose `n`-th update (1-based) fails with a backend error.
pub struct FailingUpdateStore {
    inner: InMemoryStatusStore,
    updates: AtomicU32,
    fail_on: u32,
}

impl FailingUpdateStore {
    pub fn failing_update(fail_on: u32) -> Self {
        Self {
            inner: InMemoryStatusStore::new(),
            updates: AtomicU32::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl StatusStore for FailingUpdateStore {
    async fn insert(&self, saga: &SagaInstance) -> status_store::Result<()> {
        self.inner.insert(saga).await
    }

    async fn get(&self, id: Uuid) -> status_store::Result<Option<SagaInstance>> {
        self.inner.get(id).await
    }

    async fn update(&self, saga: &mut SagaInstance) -> status_store::Result<()> {
        if self.updates.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(StoreError::Backend("database is locked".to_string()));
        }
        self.inner.update(saga).await
    }

    async fn list(&self, status: Option<SagaStatus>) -> status_store::Result<Vec<SagaInstance>> {
        self.inner.list(status).await
    }
}
