//! Instagram DM adapter. Same Meta webhook family as Messenger, but the
//! business-account id reported on webhooks is the one that drifts from
//! the OAuth-issued id, and the attachment policy is image-only.

use std::collections::HashMap;

use async_trait::async_trait;
use http::HeaderMap;
use odm_core::{Connection, InboundEvent, OutboundMessage, Platform, SendReceipt};

use crate::constraints::enforce_attachment_limits;
use crate::errors::{ParseError, SendError};
use crate::messenger::meta_challenge;
use crate::meta;
use crate::signature::verify_meta_signature;
use crate::traits::{ChallengeOutcome, PlatformAdapter, PlatformSecrets};

const ALLOWED_ATTACHMENTS: &[&str] = &["jpg", "jpeg", "png", "gif"];
const MAX_ATTACHMENT_BYTES: u64 = 8 * 1024 * 1024;

pub struct InstagramAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl InstagramAdapter {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

impl Default for InstagramAdapter {
    fn default() -> Self {
        Self::new(meta::GRAPH_API_BASE)
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn challenge(
        &self,
        secrets: &PlatformSecrets,
        query: &HashMap<String, String>,
    ) -> ChallengeOutcome {
        meta_challenge(secrets, query)
    }

    fn verify(&self, secrets: &PlatformSecrets, headers: &HeaderMap, body: &[u8]) -> bool {
        secrets
            .app_secret
            .as_deref()
            .is_some_and(|secret| verify_meta_signature(secret, headers, body))
    }

    fn parse(&self, tenant: &str, body: &[u8]) -> Result<Vec<InboundEvent>, ParseError> {
        meta::parse_events(Platform::Instagram, tenant, body, "instagram")
    }

    async fn send(
        &self,
        connection: &Connection,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError> {
        if let Some(url) = message.attachment_url.as_deref() {
            enforce_attachment_limits(&self.client, url, ALLOWED_ATTACHMENTS, MAX_ATTACHMENT_BYTES)
                .await?;
        }
        meta::send_graph_message(
            &self.client,
            &self.api_base,
            "instagram",
            connection,
            message,
        )
        .await
    }
}
