//! HTTP participant for remote services.
//!
//! Contract:
//! - `POST {url}/execute` with a `StepRequest` body, replying with a `StepReply`
//! - `POST {url}/compensate` with a `CompensationRequest` body
//!
//! Both carry the idempotency key in the `Idempotency-Key` header as well.
//! 2xx is success, 429 and 5xx are transient, any other 4xx is a rejection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tracing::{debug, warn};

use super::RegistryError;
use crate::interfaces::participant::{
    CompensationRequest, Participant, ParticipantError, Result, StepReply, StepRequest,
};

/// Header carrying the idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Transport timeout. Step deadlines are enforced by the executor.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Participant reached over HTTP.
pub struct HttpParticipant {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpParticipant {
    /// Create a participant for the service at `base_url`.
    ///
    /// The URL must be absolute `http` or `https`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> std::result::Result<Self, RegistryError> {
        let name = name.into();
        let base_url = base_url.into();

        let invalid = |reason: String| RegistryError::InvalidUrl {
            name: name.clone(),
            reason,
        };
        let parsed = Url::parse(&base_url).map_err(|e| invalid(format!("{base_url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "{base_url:?}: unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| RegistryError::Client {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Determine if an HTTP status code is retryable.
    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &T,
    ) -> Result<String> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ParticipantError::Transient(format!("{url}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ParticipantError::Transient(format!("{url}: reading body: {e}")))?;

        if status.is_success() {
            debug!(participant = %self.name, url = %url, "Participant call succeeded");
            return Ok(text);
        }

        let detail = format!(
            "HTTP {} - {}",
            status,
            text.chars().take(200).collect::<String>()
        );
        if Self::is_retryable_status(status) {
            warn!(participant = %self.name, url = %url, status = %status, "Retryable participant status");
            Err(ParticipantError::Transient(detail))
        } else {
            Err(ParticipantError::Rejected(detail))
        }
    }
}

#[async_trait]
impl Participant for HttpParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepReply> {
        let body = self
            .post("execute", &request.idempotency_key, request)
            .await?;
        if body.trim().is_empty() {
            return Ok(StepReply::default());
        }
        serde_json::from_str(&body)
            .map_err(|e| ParticipantError::Rejected(format!("malformed step reply: {e}")))
    }

    async fn compensate(&self, request: &CompensationRequest) -> Result<()> {
        self.post("compensate", &request.idempotency_key, request)
            .await
            .map(|_| ())
    }
}
