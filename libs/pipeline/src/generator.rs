//! Seam to the external response-generation collaborator.
//!
//! The retrieval and ranking machinery that produces reply text is a black
//! box behind [`ResponseGenerator`]; this crate only cares about the
//! contract and about whether a tenant is provisioned to use it.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Reply text plus usage metadata kept for cost accounting.
#[derive(Debug, Clone)]
pub struct GeneratedReply {
    pub text: String,
    pub usage: Value,
}

pub type SharedGenerator = Arc<dyn ResponseGenerator>;

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        tenant: &str,
        conversation_id: Uuid,
    ) -> Result<GeneratedReply>;
}

pub type SharedCredentials = Arc<dyn CredentialResolver>;

/// Read-only view of which tenants hold a response-generation credential.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn has_generator_credential(&self, tenant: &str) -> bool;
}

/// Fixed tenant set, built from configuration at startup.
#[derive(Default)]
pub struct StaticCredentials {
    tenants: HashSet<String>,
}

impl StaticCredentials {
    pub fn new(tenants: impl IntoIterator<Item = String>) -> Self {
        Self {
            tenants: tenants.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn has_generator_credential(&self, tenant: &str) -> bool {
        self.tenants.contains(tenant)
    }
}

/// Stands in when no generator endpoint is configured; the credential
/// gate keeps provisioned tenants from ever reaching it.
pub struct UnconfiguredGenerator;

#[async_trait]
impl ResponseGenerator for UnconfiguredGenerator {
    async fn generate(
        &self,
        _text: &str,
        _tenant: &str,
        _conversation_id: Uuid,
    ) -> Result<GeneratedReply> {
        anyhow::bail!("response generator endpoint is not configured")
    }
}

/// HTTP client for a deployed generator service.
pub struct HttpResponseGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpResponseGenerator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response_text: String,
    #[serde(default)]
    usage: Value,
}

#[async_trait]
impl ResponseGenerator for HttpResponseGenerator {
    async fn generate(
        &self,
        text: &str,
        tenant: &str,
        conversation_id: Uuid,
    ) -> Result<GeneratedReply> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "text": text,
                "tenant_id": tenant,
                "conversation_id": conversation_id,
            }))
            .send()
            .await
            .context("call response generator")?
            .error_for_status()
            .context("response generator status")?;
        let body: GenerateResponse = response
            .json()
            .await
            .context("decode response generator body")?;
        Ok(GeneratedReply {
            text: body.response_text,
            usage: body.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_gate_by_tenant() {
        let creds = StaticCredentials::new(["acme".to_string()]);
        assert!(creds.has_generator_credential("acme").await);
        assert!(!creds.has_generator_credential("globex").await);
    }
}
