use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{MistralOcrError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";

fn parse_env_or<T: FromStr>(var: &str, default: T) -> T
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

/// Reads a variable, treating blank values as unset.
fn env_non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub mistral: MistralConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub mcp_path: String,
    /// Bearer tokens accepted by the HTTP transport. Empty disables auth.
    pub auth_tokens: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MistralConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    /// Root under which extracted images may be written.
    pub allowed_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "http" | "streamable-http" => Ok(Transport::Http),
            other => Err(format!("unknown transport '{other}', expected stdio or http")),
        }
    }
}

/// Mistral API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            host: "127.0.0.1".to_string(),
            port: 3000,
            mcp_path: "/mcp".to_string(),
            auth_tokens: Vec::new(),
        }
    }
}

impl MistralConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: ApiKey::new(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_OCR_MODEL.to_string(),
            timeout_secs: 120,
            max_retries: 0,
        }
    }
}

impl Config {
    /// Builds the process configuration from the environment.
    ///
    /// A missing `MISTRAL_API_KEY` is fatal. A missing
    /// `MISTRAL_OCR_ALLOWED_DIR` only disables image extraction.
    pub fn from_env() -> Result<Self> {
        let api_key = env_non_empty("MISTRAL_API_KEY").ok_or_else(|| {
            MistralOcrError::Configuration(
                "MISTRAL_API_KEY environment variable is required".to_string(),
            )
        })?;

        let defaults = ServerConfig::default();
        let server = ServerConfig {
            transport: parse_env_or("MISTRAL_OCR_TRANSPORT", defaults.transport),
            host: env_non_empty("MISTRAL_OCR_HOST").unwrap_or(defaults.host),
            port: parse_env_or("MISTRAL_OCR_PORT", defaults.port),
            mcp_path: env_non_empty("MISTRAL_OCR_MCP_PATH")
                .map(normalize_mcp_path)
                .unwrap_or(defaults.mcp_path),
            auth_tokens: env_non_empty("MISTRAL_OCR_AUTH_TOKENS")
                .map(|tokens| {
                    tokens
                        .split(',')
                        .map(str::trim)
                        .filter(|token| !token.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let mut mistral = MistralConfig::new(api_key);
        if let Some(base_url) = env_non_empty("MISTRAL_BASE_URL") {
            mistral.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = env_non_empty("MISTRAL_OCR_MODEL") {
            mistral.model = model;
        }
        mistral.timeout_secs = parse_env_or("MISTRAL_OCR_TIMEOUT", mistral.timeout_secs);
        mistral.max_retries = parse_env_or("MISTRAL_OCR_MAX_RETRIES", mistral.max_retries);

        let sandbox = SandboxConfig {
            allowed_dir: env_non_empty("MISTRAL_OCR_ALLOWED_DIR").map(PathBuf::from),
        };

        Ok(Self {
            server,
            mistral,
            sandbox,
        })
    }
}

fn normalize_mcp_path(path: String) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
