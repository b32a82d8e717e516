use odm_core::Platform;

/// Failures the pipeline surfaces to its callers.
///
/// Only `Persistence` affects the webhook's HTTP status (verification is
/// rejected before the pipeline is reached); identity failures are logged
/// diagnostics and the webhook still acknowledges, because the platform
/// has no use for knowledge of downstream issues. Send and generator
/// failures never propagate at all — the responder handles them in place
/// per their documented semantics.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "{candidates} active connections match {platform} account `{observed}`; refusing to guess"
    )]
    AmbiguousIdentity {
        platform: Platform,
        observed: String,
        candidates: usize,
    },
    #[error("no connection for {platform} account `{observed}` under tenant `{tenant}`")]
    UnknownConnection {
        platform: Platform,
        observed: String,
        tenant: String,
    },
    #[error("persistence failure")]
    Persistence(#[source] anyhow::Error),
}

impl PipelineError {
    /// Whether a queue worker should redeliver the event.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Persistence(_))
    }
}
