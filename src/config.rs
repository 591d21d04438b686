//! Configuration manager for clinica.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_RESET_TTL_MINUTES: i64 = 30;
const DEFAULT_AUDIT_PAGE_SIZE: i64 = 20;
const MAX_AUDIT_PAGE_SIZE: i64 = 200;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance.
    pub url: String,
    support: Option<String>,
    favicon: Option<String>,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to bearer token signing.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to password-reset token policy.
    #[serde(skip_serializing, default)]
    pub reset: Reset,
    /// Seed account created at startup when no account exists yet.
    #[serde(skip_serializing)]
    pub bootstrap: Option<Bootstrap>,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
    tls: bool,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Mail queue configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
    /// Encryption layer.
    pub tls: Option<bool>,
}

/// Password-reset token policy.
///
/// A hardened deployment keeps a short `token_ttl_minutes` (the original
/// runs 10 minutes in production, 30 in development) and leaves
/// `reveal_token` off so a mail-delivery failure revokes the issued token.
/// A permissive deployment turns `reveal_token` on to surface the token
/// directly in the response when mail cannot be sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reset {
    /// Reset token lifetime, in minutes.
    pub token_ttl_minutes: i64,
    /// Return the plaintext token to the caller when mail delivery fails.
    pub reveal_token: bool,
    /// Base URL used to build the reset link sent by mail.
    pub frontend_url: Option<String>,
}

impl Default for Reset {
    fn default() -> Self {
        Self {
            token_ttl_minutes: DEFAULT_RESET_TTL_MINUTES,
            reveal_token: false,
            frontend_url: None,
        }
    }
}

/// System administrator seeded at startup when the store is empty.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Bearer token configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// HMAC signing secret. Refused when empty or left at the shipped
    /// placeholder.
    pub secret: String,
    /// Token lifetime in seconds.
    pub lifetime_secs: Option<u64>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Audit listing page size, clamped to the hard cap.
    pub fn audit_page_size(&self, requested: Option<i64>) -> i64 {
        requested
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_AUDIT_PAGE_SIZE)
            .min(MAX_AUDIT_PAGE_SIZE)
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                config.url = self.normalize_url(&config.url)?;
                config.favicon = config
                    .favicon
                    .map(|f| self.normalize_url(&f))
                    .transpose()?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_page_size_defaults_and_caps() {
        let config = Configuration::default();
        assert_eq!(config.audit_page_size(None), 20);
        assert_eq!(config.audit_page_size(Some(0)), 20);
        assert_eq!(config.audit_page_size(Some(50)), 50);
        assert_eq!(config.audit_page_size(Some(10_000)), 200);
    }
}
