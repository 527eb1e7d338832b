//! HTTP deploy target.
//!
//! Posts a JSON manifest to `<base_url>/deployments/<environment>`; artifact
//! payloads travel base64-encoded.

use super::{DeployArtifact, DeployReceipt, DeployTarget};
use crate::errors::DeployError;
use crate::utils::{generate_uuid, now_utc};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    environment: &'a str,
    artifacts: Vec<ArtifactPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct ArtifactPayload<'a> {
    name: &'a str,
    key: &'a str,
    #[serde(with = "base64_bytes")]
    content: &'a [u8],
}

#[derive(Debug, Default, Deserialize)]
struct DeployResponse {
    #[serde(default)]
    deployment_id: Option<String>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }
}

/// Deploys by POSTing to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpDeployTarget {
    base_url: String,
    client: Client,
}

impl HttpDeployTarget {
    /// Creates a target for `base_url` (e.g. "https://hosting.internal").
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Creates a target with a configured reqwest client.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl DeployTarget for HttpDeployTarget {
    async fn deploy(&self, environment: &str, artifacts: &[DeployArtifact]) -> Result<DeployReceipt, DeployError> {
        let url = format!("{}/deployments/{}", self.base_url, environment);
        let body = DeployRequest {
            environment,
            artifacts: artifacts
                .iter()
                .map(|a| ArtifactPayload {
                    name: &a.name,
                    key: &a.key,
                    content: &a.bytes,
                })
                .collect(),
        };

        debug!(url = %url, artifacts = artifacts.len(), "Posting deployment");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeployError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(environment, status, message));
        }

        let parsed: DeployResponse = response.json().await.unwrap_or_default();
        let receipt = DeployReceipt {
            environment: environment.to_string(),
            deployment_id: parsed
                .deployment_id
                .unwrap_or_else(|| generate_uuid().to_string()),
            artifacts: artifacts.iter().map(|a| a.key.clone()).collect(),
            deployed_at: now_utc(),
        };
        info!(environment = %environment, deployment_id = %receipt.deployment_id, "Deployed over HTTP");
        Ok(receipt)
    }
}

fn classify_status(environment: &str, status: StatusCode, message: String) -> DeployError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        DeployError::Unavailable(format!("status {}: {message}", status.as_u16()))
    } else if status.is_client_error() {
        DeployError::Rejected {
            environment: environment.to_string(),
            message: format!("status {}: {message}", status.as_u16()),
        }
    } else {
        DeployError::Failed(format!("unexpected status {}", status.as_u16()))
    }
}
