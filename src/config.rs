//! C11 (ambient): connection configuration.
//!
//! Grounded on `client-rs/src/config.rs`'s `Config`/`SwarmConfig` split — a
//! plain struct with a builder and sensible defaults — narrowed to exactly
//! the fields spec §6 names (`host`, `port`, `application`, an opaque
//! `token`, keepalive, backoff bounds, `http_proxy`). Unlike the teacher's
//! `Config`, this one is never read from or written to disk (spec §1: "no
//! persistent on-disk cache" extends to configuration — the caller
//! constructs it in-process).

use std::time::Duration;

use crate::connection::{BackoffPolicy, KEEPALIVE_INTERVAL};

/// Connection options for [`crate::context::Context::connect`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub host: String,
    pub port: u16,
    pub application: String,
    /// Opaque auth token passed through to the handshake (spec §1: "no
    /// authentication flows beyond passing an opaque token").
    pub token: Option<String>,
    pub keepalive: Duration,
    pub backoff: BackoffPolicy,
    /// `scheme://host:port`, used only for the initial HTTP CONNECT (spec §6).
    pub http_proxy: Option<String>,
}

impl ContextConfig {
    pub fn new(host: impl Into<String>, port: u16, application: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            application: application.into(),
            token: None,
            keepalive: KEEPALIVE_INTERVAL,
            backoff: BackoffPolicy::default(),
            http_proxy: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Reads `http_proxy`/`HTTP_PROXY` from the environment, matching the
    /// `HTTP(S)_PROXY`-equivalent setting spec §6 recognizes.
    pub fn with_proxy_from_env(mut self) -> Self {
        self.http_proxy = std::env::var("http_proxy")
            .or_else(|_| std::env::var("HTTP_PROXY"))
            .ok();
        self
    }

    pub fn endpoint_url(&self) -> String {
        crate::transport::endpoint_url(&self.host, self.port, &self.application)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_targets() {
        let cfg = ContextConfig::new("io.datasync.example.com", 443, "legorange");
        assert_eq!(cfg.keepalive, Duration::from_secs(45));
        assert_eq!(cfg.backoff.cap, Duration::from_secs(30));
        assert!(cfg.token.is_none());
    }

    #[test]
    fn builder_sets_token_and_endpoint() {
        let cfg = ContextConfig::new("h", 443, "app").with_token("tok-123");
        assert_eq!(cfg.token.as_deref(), Some("tok-123"));
        assert_eq!(cfg.endpoint_url(), "wss://h:443/.ws?v=5&ns=app");
    }
}
