//! Platform adapters for the Omnidesk ingestion pipeline.
//!
//! One adapter per external platform, polymorphic over webhook
//! verification, payload normalization, and outbound send. The gateway
//! selects adapters through [`AdapterRegistry`]; nothing in this crate
//! touches storage.

mod constraints;
mod errors;
mod instagram;
mod messenger;
mod meta;
mod registry;
mod signature;
mod telegram;
mod traits;
mod webchat;

pub use errors::{ParseError, SendError};
pub use instagram::InstagramAdapter;
pub use messenger::MessengerAdapter;
pub use registry::{AdapterRegistry, default_registry};
pub use telegram::TelegramAdapter;
pub use traits::{ChallengeOutcome, PlatformAdapter, PlatformSecrets, SharedAdapter};
pub use webchat::WebChatAdapter;
