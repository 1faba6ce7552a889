//! Participant registry and saga definitions.
//!
//! The registry maps participant names to implementations; saga definitions
//! map saga types to their ordered steps. Both are built once at startup and
//! shared read-only afterwards.

pub mod checkout;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{ParticipantEndpoint, SagaDefinitionConfig};
use crate::interfaces::participant::Participant;
use crate::model::StepDefinition;

pub use checkout::{CheckoutLedger, CheckoutRequest, CHECKOUT_SAGA_TYPE};
pub use http::HttpParticipant;

/// Errors raised while building the registry from configuration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid URL for participant {name}: {reason}")]
    InvalidUrl { name: String, reason: String },

    #[error("HTTP client for participant {name}: {source}")]
    Client {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Named participants available to saga steps.
#[derive(Default, Clone)]
pub struct ParticipantRegistry {
    participants: HashMap<String, Arc<dyn Participant>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the checkout participants over `ledger`.
    pub fn with_checkout(ledger: Arc<CheckoutLedger>) -> Self {
        let mut registry = Self::new();
        for participant in checkout::checkout_participants(ledger) {
            registry.register(participant);
        }
        registry
    }

    /// Add or replace a participant under its own name.
    pub fn register(&mut self, participant: Arc<dyn Participant>) {
        let name = participant.name().to_string();
        if self.participants.insert(name.clone(), participant).is_some() {
            info!(participant = %name, "Replaced participant");
        }
    }

    /// Register an `HttpParticipant` per configured endpoint.
    pub fn register_http(
        &mut self,
        endpoints: &[ParticipantEndpoint],
    ) -> Result<(), RegistryError> {
        for endpoint in endpoints {
            info!(participant = %endpoint.name, url = %endpoint.url, "Registering HTTP participant");
            self.register(Arc::new(HttpParticipant::new(
                endpoint.name.clone(),
                endpoint.url.clone(),
            )?));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Participant>> {
        self.participants.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.participants.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.participants.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Saga type -> ordered steps.
#[derive(Debug, Default, Clone)]
pub struct SagaDefinitions {
    definitions: HashMap<String, Vec<StepDefinition>>,
}

impl SagaDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in definitions (`checkout`).
    pub fn builtin() -> Self {
        let mut definitions = Self::new();
        definitions.register(CHECKOUT_SAGA_TYPE, checkout::checkout_steps());
        definitions
    }

    /// Built-in definitions plus the configured ones. Configured definitions
    /// win on name clashes.
    pub fn from_config(configs: &[SagaDefinitionConfig]) -> Self {
        let mut definitions = Self::builtin();
        for config in configs {
            definitions.register(config.name.clone(), config.steps.clone());
        }
        definitions
    }

    pub fn register(&mut self, saga_type: impl Into<String>, steps: Vec<StepDefinition>) {
        self.definitions.insert(saga_type.into(), steps);
    }

    pub fn get(&self, saga_type: &str) -> Option<&[StepDefinition]> {
        self.definitions.get(saga_type).map(Vec::as_slice)
    }

    /// Registered saga types, sorted.
    pub fn saga_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.definitions.keys().cloned().collect();
        types.sort();
        types
    }
}
