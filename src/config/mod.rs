//! Configuration module for the CallBridge Gateway server
//!
//! Configuration comes from three layers, lowest priority first: built-in
//! defaults, environment variables (including values loaded from a `.env`
//! file by the binary), and an optional YAML file. `from_env` reads the
//! first two layers; `from_file` applies the YAML layer on top.
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallback
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::relay::{
    AudioFormat, BackendConfig, DEFAULT_BACKEND_MODEL, DEFAULT_BACKEND_URL, SessionOptions,
    StreamRestartPolicy,
};

mod yaml;

pub use yaml::YamlConfig;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration is inconsistent or incomplete
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Server configuration
///
/// Contains everything needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - AI backend settings (endpoint, API key, model, voice, instructions)
/// - Relay session behavior (greeting, stream-restart policy)
/// - Authentication settings
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // AI backend settings
    pub backend_url: String,
    /// API key for the AI backend; `BACKEND_API_KEY` with `OPENAI_API_KEY`
    /// accepted as a fallback
    pub backend_api_key: Option<String>,
    pub backend_model: String,
    pub backend_voice: Option<String>,
    pub backend_instructions: Option<String>,
    pub backend_modalities: Option<Vec<String>>,
    pub backend_temperature: Option<f32>,
    /// Audio format shared by the phone leg and the backend
    pub audio_format: AudioFormat,

    // Relay session behavior
    /// Opening line the assistant is asked to speak once the backend is ready
    pub greeting: Option<String>,
    pub stream_restart_policy: StreamRestartPolicy,

    // Authentication
    pub auth_required: bool,
    pub auth_api_secrets: Vec<AuthApiSecret>,

    // Security
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_env_raw()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment layer without final validation; `from_file` applies the
    /// YAML layer before validating.
    fn from_env_raw() -> Result<Self, ConfigError> {
        let tls = match (env_var("TLS_CERT_PATH"), env_var("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                ));
            }
        };

        let config = Self {
            host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_env("PORT")?.unwrap_or(3001),
            tls,
            backend_url: env_var("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            backend_api_key: env_var("BACKEND_API_KEY").or_else(|| env_var("OPENAI_API_KEY")),
            backend_model: env_var("BACKEND_MODEL")
                .unwrap_or_else(|| DEFAULT_BACKEND_MODEL.to_string()),
            backend_voice: env_var("BACKEND_VOICE"),
            backend_instructions: env_var("BACKEND_INSTRUCTIONS"),
            backend_modalities: env_var("BACKEND_MODALITIES").map(parse_list),
            backend_temperature: parse_env("BACKEND_TEMPERATURE")?,
            audio_format: env_var("AUDIO_FORMAT")
                .map(|s| AudioFormat::from_str_or_default(&s))
                .unwrap_or_default(),
            greeting: env_var("GREETING"),
            stream_restart_policy: env_var("STREAM_RESTART_POLICY")
                .map(|s| StreamRestartPolicy::from_str_or_default(&s))
                .unwrap_or_default(),
            auth_required: parse_env("AUTH_REQUIRED")?.unwrap_or(false),
            auth_api_secrets: env_var("AUTH_API_SECRETS")
                .map(parse_api_secrets)
                .unwrap_or_default(),
            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: parse_env("RATE_LIMIT_REQUESTS_PER_SECOND")?
                .unwrap_or(60),
            rate_limit_burst_size: parse_env("RATE_LIMIT_BURST_SIZE")?.unwrap_or(10),
            max_websocket_connections: parse_env("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: parse_env("MAX_CONNECTIONS_PER_IP")?.unwrap_or(10),
        };

        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as
    /// the fallback layer.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let yaml: YamlConfig = serde_yaml::from_str(&contents)?;
        Self::from_layers(yaml)
    }

    /// Merge a YAML layer over the environment layer.
    fn from_layers(yaml: YamlConfig) -> Result<Self, ConfigError> {
        let mut config = Self::from_env_raw()?;

        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            match (server.tls_cert_path, server.tls_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    config.tls = Some(TlsConfig {
                        cert_path,
                        key_path,
                    });
                }
                (None, None) => {}
                _ => {
                    return Err(ConfigError::Invalid(
                        "tls_cert_path and tls_key_path must be set together".to_string(),
                    ));
                }
            }
        }

        if let Some(backend) = yaml.backend {
            if let Some(url) = backend.url {
                config.backend_url = url;
            }
            if let Some(api_key) = backend.api_key {
                config.backend_api_key = Some(api_key);
            }
            if let Some(model) = backend.model {
                config.backend_model = model;
            }
            if let Some(voice) = backend.voice {
                config.backend_voice = Some(voice);
            }
            if let Some(instructions) = backend.instructions {
                config.backend_instructions = Some(instructions);
            }
            if let Some(modalities) = backend.modalities {
                config.backend_modalities = Some(modalities);
            }
            if let Some(format) = backend.audio_format {
                config.audio_format = AudioFormat::from_str_or_default(&format);
            }
            if let Some(temperature) = backend.temperature {
                config.backend_temperature = Some(temperature);
            }
        }

        if let Some(relay) = yaml.relay {
            if let Some(greeting) = relay.greeting {
                config.greeting = Some(greeting);
            }
            if let Some(policy) = relay.stream_restart_policy {
                config.stream_restart_policy = StreamRestartPolicy::from_str_or_default(&policy);
            }
        }

        if let Some(auth) = yaml.auth {
            if let Some(required) = auth.required {
                config.auth_required = required;
            }
            if let Some(secrets) = auth.api_secrets {
                config.auth_api_secrets = secrets
                    .into_iter()
                    .filter_map(|s| match (s.id, s.secret) {
                        (Some(id), Some(secret)) => Some(AuthApiSecret { id, secret }),
                        _ => None,
                    })
                    .collect();
            }
        }

        if let Some(security) = yaml.security {
            if let Some(origins) = security.cors_allowed_origins {
                config.cors_allowed_origins = Some(origins);
            }
            if let Some(rps) = security.rate_limit_requests_per_second {
                config.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = security.rate_limit_burst_size {
                config.rate_limit_burst_size = burst;
            }
            if let Some(max) = security.max_websocket_connections {
                config.max_websocket_connections = Some(max);
            }
            if let Some(max) = security.max_connections_per_ip {
                config.max_connections_per_ip = max;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults, used as the base of the layering.
    #[cfg(test)]
    fn defaults() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_api_key: None,
            backend_model: DEFAULT_BACKEND_MODEL.to_string(),
            backend_voice: None,
            backend_instructions: None,
            backend_modalities: None,
            backend_temperature: None,
            audio_format: AudioFormat::default(),
            greeting: None,
            stream_restart_policy: StreamRestartPolicy::default(),
            auth_required: false,
            auth_api_secrets: Vec::new(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 10,
        }
    }

    /// Check the assembled configuration for inconsistencies.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_api_key.is_none() {
            return Err(ConfigError::Invalid(
                "Backend API key not set (BACKEND_API_KEY or backend.api_key)".to_string(),
            ));
        }
        if self.auth_required && self.auth_api_secrets.is_empty() {
            return Err(ConfigError::Invalid(
                "AUTH_REQUIRED is set but no API secrets are configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    ///
    /// Returns true if TLS configuration is present
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if API secret authentication is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Find the API secret identifier that matches a bearer token
    ///
    /// Returns the configured id when the token matches a known secret.
    pub fn find_api_secret_id(&self, token: &str) -> Option<&str> {
        self.auth_api_secrets
            .iter()
            .find(|entry| entry.secret == token)
            .map(|entry| entry.id.as_str())
    }

    /// Build the AI backend connection settings.
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            url: self.backend_url.clone(),
            api_key: self.backend_api_key.clone().unwrap_or_default(),
            model: self.backend_model.clone(),
            voice: self.backend_voice.clone(),
            instructions: self.backend_instructions.clone(),
            modalities: self.backend_modalities.clone(),
            audio_format: self.audio_format,
            temperature: self.backend_temperature,
        }
    }

    /// Build the per-session behavior options.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            restart_policy: self.stream_restart_policy,
            greeting: self.greeting.clone(),
        }
    }
}

/// Read an environment variable, treating empty values as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Read and parse an environment variable.
fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("{name}: {e}"))),
        None => Ok(None),
    }
}

/// Split a comma-separated list, trimming whitespace.
fn parse_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `id:secret` pairs from a comma-separated list.
fn parse_api_secrets(raw: String) -> Vec<AuthApiSecret> {
    raw.split(',')
        .filter_map(|entry| {
            let (id, secret) = entry.trim().split_once(':')?;
            if id.is_empty() || secret.is_empty() {
                return None;
            }
            Some(AuthApiSecret {
                id: id.to_string(),
                secret: secret.to_string(),
            })
        })
        .collect()
}
