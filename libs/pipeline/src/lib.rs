//! The Omnidesk processing pipeline.
//!
//! Normalized events flow through one shared path regardless of how they
//! arrive: the [`DispatchGateway`] hands them to the durable queue when it
//! is healthy and processes them inline when it is not, and the
//! [`MessageProcessor`] is the single unit of work both routes converge on.

mod dispatch;
mod error;
mod generator;
mod identity;
mod processor;
mod responder;

pub use dispatch::{DispatchGateway, DispatchOutcome};
pub use error::PipelineError;
pub use generator::{
    CredentialResolver, GeneratedReply, HttpResponseGenerator, ResponseGenerator,
    SharedCredentials, SharedGenerator, StaticCredentials, UnconfiguredGenerator,
};
pub use identity::{ConsolidationReport, IdentityResolver, Resolution};
pub use processor::{MessageProcessor, ProcessingOutcome};
pub use responder::ResponseOrchestrator;
