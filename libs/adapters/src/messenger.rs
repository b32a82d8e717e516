//! Messenger platform adapter: Meta page webhooks in, Graph send out.

use std::collections::HashMap;

use async_trait::async_trait;
use http::HeaderMap;
use odm_core::{Connection, InboundEvent, OutboundMessage, Platform, SendReceipt};

use crate::constraints::enforce_attachment_limits;
use crate::errors::{ParseError, SendError};
use crate::meta;
use crate::signature::verify_meta_signature;
use crate::traits::{ChallengeOutcome, PlatformAdapter, PlatformSecrets};

const ALLOWED_ATTACHMENTS: &[&str] = &["jpg", "jpeg", "png", "gif", "mp4", "mp3", "wav", "pdf"];
const MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;

pub struct MessengerAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl MessengerAdapter {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

impl Default for MessengerAdapter {
    fn default() -> Self {
        Self::new(meta::GRAPH_API_BASE)
    }
}

#[async_trait]
impl PlatformAdapter for MessengerAdapter {
    fn platform(&self) -> Platform {
        Platform::Messenger
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
        meta::parse_events(Platform::Messenger, tenant, body, "page")
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
            "messenger",
            connection,
            message,
        )
        .await
    }
}

/// `hub.mode=subscribe` + matching `hub.verify_token` echoes `hub.challenge`.
pub(crate) fn meta_challenge(
    secrets: &PlatformSecrets,
    query: &HashMap<String, String>,
) -> ChallengeOutcome {
    let expected = match secrets.verify_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return ChallengeOutcome::Rejected,
    };
    let mode_ok = query.get("hub.mode").map(String::as_str) == Some("subscribe");
    let token_ok = query.get("hub.verify_token").map(String::as_str) == Some(expected);
    match (mode_ok && token_ok, query.get("hub.challenge")) {
        (true, Some(challenge)) => ChallengeOutcome::Accepted(challenge.clone()),
        _ => ChallengeOutcome::Rejected,
    }
}
