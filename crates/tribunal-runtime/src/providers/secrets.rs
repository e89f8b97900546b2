//! Provider credentials.
//!
//! A credential is wrapped in [`SecretString`] the moment it is read and is
//! only exposed where a request header is built. `Debug` and `Display` print
//! `[REDACTED]`, so a provider config can be logged as a whole.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
            CredentialSource::Programmatic => "programmatic",
        })
    }
}

/// An API key that never prints itself.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        match std::env::var(env_var) {
            Ok(value) if !value.is_empty() => Ok(Self::new(value, CredentialSource::Environment, name)),
            _ => Err(ProviderError::NotConfigured(format!(
                "{} not set: configure '{}' environment variable",
                name, env_var
            ))),
        }
    }

    /// Read `config_key` from the provider config, else `env_var`.
    ///
    /// Empty strings count as absent in both places.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str().filter(|v| !v.is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        Self::from_env(env_var, name).map_err(|_| {
            ProviderError::NotConfigured(format!(
                "{} required: set '{}' in provider_config or the {} environment variable",
                name, config_key, env_var
            ))
        })
    }

    /// Whether [`from_config_or_env`](Self::from_config_or_env) would succeed.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some_and(|v| !v.is_empty())
            || std::env::var(env_var).is_ok_and(|v| !v.is_empty())
    }

    /// The raw value. Call only where the header is set; never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-tribunal-secret-0001";

    #[test]
    fn test_credential_never_printed() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Config, "Anthropic API key");

        let debug = format!("{:?}", cred);
        let display = format!("{}", cred);
        assert!(!debug.contains(SECRET), "secret in Debug");
        assert!(!display.contains(SECRET), "secret in Display");
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(display, "Anthropic API key from config [REDACTED]");
        assert_eq!(cred.expose(), SECRET);
    }

    #[test]
    fn test_config_wins_over_environment() {
        std::env::set_var("TRIBUNAL_TEST_KEY_PRIORITY", "env-key");
        let config = serde_json::json!({ "api_key": "config-key" });

        let cred = ApiCredential::from_config_or_env(&config, "api_key", "TRIBUNAL_TEST_KEY_PRIORITY", "Test key")
            .unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);

        std::env::remove_var("TRIBUNAL_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_empty_config_value_falls_back_to_environment() {
        std::env::set_var("TRIBUNAL_TEST_KEY_FALLBACK", "env-key");
        let config = serde_json::json!({ "api_key": "" });

        let cred = ApiCredential::from_config_or_env(&config, "api_key", "TRIBUNAL_TEST_KEY_FALLBACK", "Test key")
            .unwrap();
        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);

        std::env::remove_var("TRIBUNAL_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_missing_credential_names_both_sources() {
        let err = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "TRIBUNAL_TEST_KEY_ABSENT",
            "Test key",
        )
        .unwrap_err()
        .to_string();

        assert!(err.contains("api_key"));
        assert!(err.contains("TRIBUNAL_TEST_KEY_ABSENT"));
        assert!(!ApiCredential::is_available(&serde_json::json!({}), "api_key", "TRIBUNAL_TEST_KEY_ABSENT"));
    }
}
