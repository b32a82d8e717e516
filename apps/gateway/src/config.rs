use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use odm_adapters::PlatformSecrets;
use odm_core::Platform;

/// Gateway configuration assembled from the environment.
#[derive(Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub nats_url: String,
    /// Development override: accept webhooks whose signature does not
    /// verify. Opt-in via `ODM_ALLOW_UNVERIFIED=true`; never the default.
    pub allow_unverified: bool,
    pub secrets: HashMap<Platform, PlatformSecrets>,
    pub generator_url: Option<String>,
    pub generator_timeout_secs: u64,
    pub send_timeout_secs: u64,
    /// Tenants holding a response-generation credential.
    pub generator_tenants: Vec<String>,
    /// Optional JSON file seeding the connection table at startup.
    pub connections_file: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8090".parse().expect("static bind addr"),
            nats_url: "nats://127.0.0.1:4222".into(),
            allow_unverified: false,
            secrets: HashMap::new(),
            generator_url: None,
            generator_timeout_secs: 30,
            send_timeout_secs: 10,
            generator_tenants: Vec::new(),
            connections_file: None,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(bind) = std::env::var("ODM_BIND")
            && let Ok(parsed) = bind.parse()
        {
            cfg.bind = parsed;
        }
        if let Ok(url) = std::env::var("ODM_NATS_URL") {
            cfg.nats_url = url;
        }
        cfg.allow_unverified = std::env::var("ODM_ALLOW_UNVERIFIED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        cfg.secrets.insert(
            Platform::Messenger,
            PlatformSecrets {
                app_secret: std::env::var("ODM_MESSENGER_APP_SECRET").ok(),
                verify_token: std::env::var("ODM_MESSENGER_VERIFY_TOKEN").ok(),
            },
        );
        cfg.secrets.insert(
            Platform::Instagram,
            PlatformSecrets {
                app_secret: std::env::var("ODM_INSTAGRAM_APP_SECRET").ok(),
                verify_token: std::env::var("ODM_INSTAGRAM_VERIFY_TOKEN").ok(),
            },
        );
        cfg.secrets.insert(
            Platform::Telegram,
            PlatformSecrets {
                app_secret: None,
                verify_token: std::env::var("ODM_TELEGRAM_WEBHOOK_SECRET").ok(),
            },
        );
        cfg.secrets.insert(
            Platform::WebChat,
            PlatformSecrets {
                app_secret: std::env::var("ODM_WEBCHAT_SIGNING_SECRET").ok(),
                verify_token: None,
            },
        );

        cfg.generator_url = std::env::var("ODM_GENERATOR_URL").ok().filter(|u| !u.is_empty());
        if let Ok(raw) = std::env::var("ODM_GENERATOR_TIMEOUT_SECS")
            && let Ok(parsed) = raw.parse()
        {
            cfg.generator_timeout_secs = parsed;
        }
        if let Ok(raw) = std::env::var("ODM_SEND_TIMEOUT_SECS")
            && let Ok(parsed) = raw.parse()
        {
            cfg.send_timeout_secs = parsed;
        }
        if let Ok(raw) = std::env::var("ODM_GENERATOR_TENANTS") {
            cfg.generator_tenants = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        cfg.connections_file = std::env::var("ODM_CONNECTIONS_FILE").ok().map(PathBuf::from);
        cfg
    }
}
