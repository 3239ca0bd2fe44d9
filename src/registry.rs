//! Backend sensor registration.
//!
//! The backend exchanges `{account, place, device uuid, kind}` for a newly
//! issued sensor id. From the provisioning core's point of view this is a
//! single fallible call; credential renewal happens in here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::BackendError;
use crate::identity::Identity;
use crate::model::{IssuedSensorIdentity, SensorRegistration};

pub const POST_SENSOR_PATH: &str = "/api/v0/post_sensor";

#[async_trait]
pub trait SensorRegistry: Send + Sync {
    async fn register_sensor(
        &self,
        registration: &SensorRegistration,
    ) -> Result<IssuedSensorIdentity, BackendError>;
}

/// Supplies the session token sent with registrations.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;

    /// Obtains a fresh token after the backend refused the current one.
    async fn renew(&self) -> Result<(), BackendError>;
}

/// A fixed token that cannot be renewed
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

#[async_trait]
impl CredentialSource for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }

    async fn renew(&self) -> Result<(), BackendError> {
        Err(BackendError::Unauthorized)
    }
}

#[derive(Deserialize)]
struct PostSensorEnvelope {
    body: PostSensorResponseBody,
}

#[derive(Deserialize)]
struct PostSensorResponseBody {
    sensor_api_id: String,
}

/// Registry talking JSON over HTTP to the sensor backend.
pub struct HttpSensorRegistry<C> {
    client: reqwest::Client,
    endpoint: String,
    credentials: C,
}

impl<C: CredentialSource> HttpSensorRegistry<C> {
    pub fn new(base_url: &str, timeout: Duration, credentials: C) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint_url(base_url),
            credentials,
        })
    }

    async fn post(&self, registration: &SensorRegistration) -> Result<reqwest::Response, BackendError> {
        let mut request = self.client.post(&self.endpoint).json(registration);
        if let Some(token) = self.credentials.access_token().await {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))
    }
}

#[async_trait]
impl<C: CredentialSource> SensorRegistry for HttpSensorRegistry<C> {
    async fn register_sensor(
        &self,
        registration: &SensorRegistration,
    ) -> Result<IssuedSensorIdentity, BackendError> {
        log::info!(
            "Registering device {} at place {} ({})",
            registration.device,
            registration.place,
            registration.sensor_kind
        );

        let mut renewed = false;
        loop {
            let response = self.post(registration).await?;
            let status = response.status();

            if status.is_success() {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| BackendError::Transport(e.to_string()))?;
                return parse_response(&body);
            }

            if status == StatusCode::UNAUTHORIZED && !renewed {
                log::info!("Backend refused credentials, renewing once");
                self.credentials.renew().await?;
                renewed = true;
                continue;
            }

            let error = classify_status(status.as_u16());
            log::error!("Registration rejected: {}", error);
            return Err(error);
        }
    }
}

fn endpoint_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), POST_SENSOR_PATH)
}

fn classify_status(status: u16) -> BackendError {
    match status {
        400 | 413 => BackendError::Validation { status },
        401 => BackendError::Unauthorized,
        500..=599 => BackendError::Server { status },
        other => BackendError::UnexpectedStatus(other),
    }
}

fn parse_response(body: &[u8]) -> Result<IssuedSensorIdentity, BackendError> {
    let envelope: PostSensorEnvelope =
        serde_json::from_slice(body).map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
    let identity: Identity = envelope
        .body
        .sensor_api_id
        .parse()
        .map_err(|e: crate::error::IdentityError| BackendError::InvalidResponse(e.to_string()))?;
    Ok(IssuedSensorIdentity::from_backend(identity))
}
