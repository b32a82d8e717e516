use std::collections::HashMap;
use std::sync::Arc;

use odm_core::Platform;

use crate::instagram::InstagramAdapter;
use crate::messenger::MessengerAdapter;
use crate::telegram::TelegramAdapter;
use crate::traits::{PlatformAdapter, SharedAdapter};
use crate::webchat::WebChatAdapter;

/// Adapters keyed by platform kind, assembled once at startup.
#[derive(Default)]
pub struct AdapterRegistry {
    entries: HashMap<Platform, SharedAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own platform; the last registration
    /// for a platform wins.
    pub fn register(&mut self, adapter: SharedAdapter) {
        self.entries.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<SharedAdapter> {
        self.entries.get(&platform).cloned()
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.entries.keys().copied()
    }
}

/// Registry with every production adapter on its default endpoint.
pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(MessengerAdapter::default()) as Arc<dyn PlatformAdapter>);
    registry.register(Arc::new(InstagramAdapter::default()));
    registry.register(Arc::new(TelegramAdapter::default()));
    registry.register(Arc::new(WebChatAdapter::new()));
    registry
}
