//! saga-orchestrator: saga coordinator with a REST front end
//!
//! ## Architecture
//! ```text
//! [HTTP client] -> [REST API] -> [SagaCoordinator] -> [participants]
//!                                       |                (in-process checkout,
//!                                       v                 remote over HTTP)
//!                                 [status store]
//!                                 (memory/SQLite)
//! ```
//!
//! ## Configuration
//! - `config.yaml` in the working directory, the first argument, or SAGA_CONFIG
//! - `SAGA__`-prefixed environment overrides, e.g. SAGA__SERVER__PORT=9000
//! - SAGA_LOG: tracing filter (default: info)

use std::sync::Arc;

use tracing::{error, info};

use saga_orchestrator::config::Config;
use saga_orchestrator::dlq::default_publisher;
use saga_orchestrator::handlers;
use saga_orchestrator::orchestration::SagaCoordinator;
use saga_orchestrator::participants::{CheckoutLedger, ParticipantRegistry, SagaDefinitions};
use saga_orchestrator::storage::init_storage;
use saga_orchestrator::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let store = init_storage(&config.storage).await?;

    let ledger = Arc::new(CheckoutLedger::demo().await);
    let mut registry = ParticipantRegistry::with_checkout(ledger);
    registry.register_http(&config.participants)?;
    info!(participants = ?registry.names(), "Participants registered");

    let definitions = SagaDefinitions::from_config(&config.sagas);
    info!(saga_types = ?definitions.saga_types(), "Saga definitions loaded");

    let coordinator = SagaCoordinator::new(
        &config,
        store,
        registry,
        definitions,
        default_publisher(),
    );

    let recovered = coordinator.recover().await?;
    if recovered > 0 {
        info!(recovered, "Resumed unfinished sagas");
    }

    let address = config.server.bind_address();
    if let Err(e) = handlers::serve(coordinator, &address).await {
        error!(error = %e, "REST server failed");
        return Err(e.to_string().into());
    }
    Ok(())
}
