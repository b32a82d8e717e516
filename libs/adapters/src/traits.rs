use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use odm_core::{Connection, InboundEvent, OutboundMessage, Platform, SendReceipt};

use crate::errors::{ParseError, SendError};

/// Per-platform webhook secrets, supplied by deployment configuration.
/// These are app-level values, independent of any tenant.
#[derive(Debug, Clone, Default)]
pub struct PlatformSecrets {
    /// HMAC key for body signatures (Meta app secret, widget signing key).
    pub app_secret: Option<String>,
    /// Shared token compared on the GET challenge handshake, or carried as a
    /// header on platforms without one.
    pub verify_token: Option<String>,
}

/// Result of the GET challenge handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Token matched; echo this challenge string back.
    Accepted(String),
    /// Token missing or mismatched; reject with an auth error.
    Rejected,
    /// The platform has no GET handshake.
    Unsupported,
}

pub type SharedAdapter = Arc<dyn PlatformAdapter>;

/// One external messaging platform, polymorphic over verify/parse/send.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Handles the subscription challenge a platform issues on webhook setup.
    fn challenge(
        &self,
        secrets: &PlatformSecrets,
        query: &HashMap<String, String>,
    ) -> ChallengeOutcome {
        let _ = (secrets, query);
        ChallengeOutcome::Unsupported
    }

    /// Verifies the webhook call against the raw body. Fails closed: a
    /// missing secret rejects the call.
    fn verify(&self, secrets: &PlatformSecrets, headers: &HeaderMap, body: &[u8]) -> bool;

    /// Normalizes a webhook body into zero or more events. Echo events
    /// (our own outbound messages reflected back) are discarded here and
    /// never surface downstream.
    fn parse(&self, tenant: &str, body: &[u8]) -> Result<Vec<InboundEvent>, ParseError>;

    /// Delivers one outbound message, enforcing platform constraints before
    /// transmission. No database access; the connection carries the
    /// decrypted credential.
    async fn send(
        &self,
        connection: &Connection,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SendError>;
}
