//! Credential capability for store and transport collaborators.
//!
//! # Responsibility
//! - Supply named secrets (store location, bot token, chat id) to adapters.
//! - Keep secret values out of logs and `Debug` output.
//!
//! # Invariants
//! - Core logic never queries identity APIs directly; it only asks a
//!   `SecretSource` passed in by the caller.
//! - Empty secrets are treated as missing.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use thiserror::Error;

/// Prefix applied when mapping secret names to environment variables.
pub const ENV_PREFIX: &str = "BIRTHDAY_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("secret `{0}` is not configured")]
    Missing(String),
    #[error("secret `{0}` is empty")]
    Empty(String),
}

/// Opaque secret value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Source of named secrets.
pub trait SecretSource {
    fn secret(&self, name: &str) -> Result<Secret, CredentialError>;
}

/// Reads secrets from process environment variables.
///
/// `tg-bot-token` maps to `BIRTHDAY_TG_BOT_TOKEN`. A `.env` file in the working
/// directory is loaded once on construction when present.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretSource {
    _private: (),
}

impl EnvSecretSource {
    pub fn new() -> Self {
        // Missing `.env` is the normal production case.
        let _ = dotenvy::dotenv();
        Self { _private: () }
    }
}

impl SecretSource for EnvSecretSource {
    fn secret(&self, name: &str) -> Result<Secret, CredentialError> {
        let variable = env_variable_name(name);
        let value = std::env::var(&variable).map_err(|_| CredentialError::Missing(variable.clone()))?;
        non_empty(name, value)
    }
}

/// In-memory secret map for tests and embedding callers.
#[derive(Clone, Default)]
pub struct StaticSecretSource {
    secrets: BTreeMap<String, Secret>,
}

impl StaticSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), Secret::new(value));
        self
    }
}

impl Debug for StaticSecretSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecretSource")
            .field("names", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretSource for StaticSecretSource {
    fn secret(&self, name: &str) -> Result<Secret, CredentialError> {
        let secret = self
            .secrets
            .get(name)
            .ok_or_else(|| CredentialError::Missing(name.to_string()))?;
        non_empty(name, secret.0.clone())
    }
}

/// Maps a secret name to its environment variable.
pub fn env_variable_name(name: &str) -> String {
    let suffix = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect::<String>();
    format!("{ENV_PREFIX}{suffix}")
}

fn non_empty(name: &str, value: String) -> Result<Secret, CredentialError> {
    if value.trim().is_empty() {
        return Err(CredentialError::Empty(name.to_string()));
    }
    Ok(Secret(value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::{env_variable_name, CredentialError, Secret, SecretSource, StaticSecretSource};

    #[test]
    fn env_variable_name_uppercases_and_replaces_separators() {
        assert_eq!(env_variable_name("tg-bot-token"), "BIRTHDAY_TG_BOT_TOKEN");
        assert_eq!(env_variable_name("chat-id"), "BIRTHDAY_CHAT_ID");
    }

    #[test]
    fn secret_debug_hides_value() {
        let secret = Secret::new("123:abc");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
    }

    #[test]
    fn static_source_reports_missing_and_empty() {
        let source = StaticSecretSource::new().with("chat-id", "   ");
        assert_eq!(
            source.secret("tg-bot-token").unwrap_err(),
            CredentialError::Missing("tg-bot-token".to_string())
        );
        assert_eq!(
            source.secret("chat-id").unwrap_err(),
            CredentialError::Empty("chat-id".to_string())
        );
    }
}
