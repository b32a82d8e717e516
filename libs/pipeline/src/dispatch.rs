//! Queue-or-direct dispatch of normalized events.
//!
//! One state machine with two named routes: `Queued` hands the event to
//! the durable queue for a worker, `Direct` runs the shared processor
//! inline when the queue refuses the event. Both converge on
//! [`MessageProcessor::process`], so behavior cannot drift between them.

use std::sync::Arc;

use odm_core::InboundEvent;
use odm_idempotency::{EventKey, IdempotencyGuard};
use odm_queue::SharedQueue;
use tracing::warn;

use crate::error::PipelineError;
use crate::processor::{MessageProcessor, ProcessingOutcome};

pub struct DispatchGateway {
    queue: SharedQueue,
    guard: IdempotencyGuard,
    processor: Arc<MessageProcessor>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The idempotency guard had already seen this platform message id.
    Duplicate,
    /// Accepted by the durable queue; a worker finishes the job.
    Queued,
    /// Queue was unavailable; processed inline before acknowledging.
    Processed(ProcessingOutcome),
}

impl DispatchOutcome {
    /// Compact label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Duplicate => "duplicate",
            DispatchOutcome::Queued => "queued",
            DispatchOutcome::Processed(_) => "direct",
        }
    }
}

impl DispatchGateway {
    pub fn new(queue: SharedQueue, guard: IdempotencyGuard, processor: Arc<MessageProcessor>) -> Self {
        Self {
            queue,
            guard,
            processor,
        }
    }

    pub async fn dispatch(&self, event: InboundEvent) -> Result<DispatchOutcome, PipelineError> {
        // events without a platform message id (some widget messages)
        // cannot be keyed and always proceed
        if let Some(mid) = event.platform_message_id.as_deref() {
            let key = EventKey::new(&event.tenant, event.platform, mid);
            match self.guard.should_process(&key).await {
                Ok(true) => {}
                Ok(false) => return Ok(DispatchOutcome::Duplicate),
                Err(err) => {
                    warn!(error = %err, %key, "idempotency check failed; continuing");
                }
            }
        }

        match self.queue.enqueue(&event).await {
            Ok(()) => Ok(DispatchOutcome::Queued),
            Err(err) => {
                warn!(
                    error = %err,
                    tenant = %event.tenant,
                    platform = %event.platform,
                    "durable queue unavailable; processing inline"
                );
                odm_telemetry::record_direct_fallback(&event.tenant);
                let outcome = self.processor.process(&event).await?;
                Ok(DispatchOutcome::Processed(outcome))
            }
        }
    }
}
