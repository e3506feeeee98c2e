//! Client-wide configuration.
//!
//! # Design
//! Nothing here reads global state on its own. Values come from a
//! `ConfigProvider` handed in by the caller (a map, the environment, or a
//! deserialized file) and the resulting `ClientConfig` is injected into
//! `HttpClient` at construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const PROXY_HOST_KEY: &str = "http_proxy.host";
pub const PROXY_PORT_KEY: &str = "http_proxy.port";
pub const APP_NAME_KEY: &str = "app.name";

/// Header carrying the real target URL of shadow traffic.
pub const DEFAULT_REAL_URL_HEADER: &str = "x-real-url";
/// Header carrying the calling application's name on shadow traffic.
pub const DEFAULT_APP_HEADER: &str = "app";

/// Source of string configuration values keyed by dotted names.
pub trait ConfigProvider {
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigProvider for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Reads keys from environment variables: `http_proxy.host` is looked up as
/// `HTTP_PROXY_HOST`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl EnvConfig {
    pub fn var_name(key: &str) -> String {
        key.replace('.', "_").to_ascii_uppercase()
    }
}

impl ConfigProvider for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key)).ok()
    }
}

/// Where proxied requests actually connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

fn default_proxy_port() -> u16 {
    80
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// A missing or empty host is an error; the port defaults to 80.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let host = provider
            .get(PROXY_HOST_KEY)
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingProxyConfig)?;
        let port = match provider.get(PROXY_PORT_KEY) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidProxyPort(raw.clone()))?,
            None => default_proxy_port(),
        };
        Ok(Self { host, port })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Identity of the calling application, sent with shadow traffic.
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default = "default_real_url_header")]
    pub real_url_header: String,
    #[serde(default = "default_app_header")]
    pub app_header: String,
}

fn default_real_url_header() -> String {
    DEFAULT_REAL_URL_HEADER.to_string()
}

fn default_app_header() -> String {
    DEFAULT_APP_HEADER.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            app_name: None,
            real_url_header: default_real_url_header(),
            app_header: default_app_header(),
        }
    }
}

impl ClientConfig {
    /// The proxy is optional here; only proxied requests require it.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let proxy = match ProxyConfig::from_provider(provider) {
            Ok(proxy) => Some(proxy),
            Err(ConfigError::MissingProxyConfig) => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            proxy,
            app_name: provider.get(APP_NAME_KEY),
            ..Self::default()
        })
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}
