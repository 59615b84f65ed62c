//! Process configuration, loaded from a `config.toml` on disk. Structure and
//! loading style mirror the teacher's `Config`/`read_config` pair in
//! `main.rs`: a plain `serde::Deserialize` struct, `toml::from_str`, wrapped
//! in `anyhow::Context`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

fn default_bind_address() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_base_path() -> String {
    "/api".to_string()
}

fn default_body_limit_bytes() -> u64 {
    2 * 1024 * 1024
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: u64,
    #[serde(default)]
    pub tls_cert_file: String,
    #[serde(default)]
    pub tls_key_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: default_bind_address(),
            base_path: default_base_path(),
            body_limit_bytes: default_body_limit_bytes(),
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default)]
    pub allow_methods: Vec<String>,
    #[serde(default)]
    pub allow_headers: Vec<String>,
    #[serde(default)]
    pub expose_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub max_age_secs: u64,
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    #[serde(default = "default_call_timeout_ms")]
    pub default_call_timeout_ms: u64,
    #[serde(default)]
    pub forwarded_headers: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            default_call_timeout_ms: default_call_timeout_ms(),
            forwarded_headers: Vec::new(),
        }
    }
}

fn default_request_topic() -> String {
    "post-api.request".to_string()
}

fn default_response_topic() -> String {
    "post-api.response".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    #[serde(default)]
    pub enable_request_topic: bool,
    #[serde(default)]
    pub enable_response_topic: bool,
    #[serde(default = "default_request_topic")]
    pub request_topic: String,
    #[serde(default = "default_response_topic")]
    pub response_topic: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            enable_request_topic: false,
            enable_response_topic: false,
            request_topic: default_request_topic(),
            response_topic: default_response_topic(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub namespace: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Fixed headers applied to every response, regardless of outcome.
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
}

pub fn read_config(path: impl AsRef<Path>) -> Result<Config, Error> {
    let toml_content = std::fs::read_to_string(path.as_ref())
        .context("Error reading config file contents")?;
    toml::from_str(&toml_content).context("Error parsing config into TOML format")
}
