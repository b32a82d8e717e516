//! Core vocabulary of the Omnidesk messaging pipeline.
//!
//! Everything that crosses a crate boundary lives here: the supported
//! [`Platform`]s, the normalized [`InboundEvent`] produced by platform
//! adapters, the [`OutboundMessage`] consumed by their send path, and the
//! persisted records ([`Connection`], [`Conversation`], [`Message`]).

mod event;
mod model;
mod subjects;

pub use event::{EventKind, InboundEvent, OutboundMessage, SendReceipt};
pub use model::{
    Connection, Conversation, ConversationStatus, CustomerProfile, Message, MessageRole,
};
pub use subjects::{queue_subject, realtime_conversation_subject, realtime_tenant_subject};

use serde::{Deserialize, Serialize};

/// Supported messaging platforms (kept small and stable).
///
/// ```
/// use odm_core::Platform;
///
/// let p = Platform::Telegram;
/// assert_eq!(p.as_str(), "telegram");
/// assert_eq!("telegram".parse::<Platform>().unwrap(), p);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Messenger,
    Instagram,
    Telegram,
    WebChat,
}

impl Platform {
    /// Returns the lowercase identifier used in routes, bus subjects, and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Messenger => "messenger",
            Platform::Instagram => "instagram",
            Platform::Telegram => "telegram",
            Platform::WebChat => "webchat",
        }
    }

    pub const ALL: [Platform; 4] = [
        Platform::Messenger,
        Platform::Instagram,
        Platform::Telegram,
        Platform::WebChat,
    ];
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown platform `{0}`")]
pub struct UnknownPlatform(String);

impl std::str::FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "messenger" => Ok(Platform::Messenger),
            "instagram" => Ok(Platform::Instagram),
            "telegram" => Ok(Platform::Telegram),
            "webchat" => Ok(Platform::WebChat),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("smoke-signals".parse::<Platform>().is_err());
    }

    #[test]
    fn platform_serializes_lowercase() {
        let json = serde_json::to_string(&Platform::WebChat).unwrap();
        assert_eq!(json, "\"webchat\"");
    }
}
