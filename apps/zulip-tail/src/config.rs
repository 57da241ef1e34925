//! Environment-backed runtime configuration for `zulip-tail`.

use std::{env, error::Error, fmt, time::Duration};

use zulip_client::{ClientOptions, Connection};
use zulip_core::SubscriptionMode;

const API_PATH_SUFFIX: &str = "/api/v1";

/// Runtime configuration used by the tail binary.
#[derive(Debug, Clone, PartialEq)]
pub struct TailConfig {
    /// Account email used for basic auth.
    pub email: String,
    /// API key paired with `email`.
    pub api_key: String,
    /// API base URL, always ending in `/api/v1`.
    pub api_url: String,
    /// Event types to register for; empty means every type.
    pub event_types: Vec<String>,
    pub mode: SubscriptionMode,
    pub apply_markdown: bool,
    /// Optional per-request deadline override.
    pub request_timeout: Option<Duration>,
}

impl TailConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let email = required_trimmed_env("ZULIP_EMAIL", &mut lookup)?;
        let api_key = required_trimmed_env("ZULIP_API_KEY", &mut lookup)?;
        let site = required_trimmed_env("ZULIP_SITE", &mut lookup)?;

        let event_types = optional_trimmed_env("ZULIP_EVENT_TYPES", &mut lookup)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|kind| !kind.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let durable = parse_optional_bool("ZULIP_DURABLE", true, &mut lookup)?;
        let apply_markdown = parse_optional_bool("ZULIP_APPLY_MARKDOWN", false, &mut lookup)?;
        let request_timeout =
            parse_optional_u64("ZULIP_REQUEST_TIMEOUT_SECS", &mut lookup)?.map(Duration::from_secs);

        if request_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                key: "ZULIP_REQUEST_TIMEOUT_SECS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            email,
            api_key,
            api_url: api_url_for_site(&site),
            event_types,
            mode: if durable {
                SubscriptionMode::Durable
            } else {
                SubscriptionMode::NonDurable
            },
            apply_markdown,
            request_timeout,
        })
    }

    pub fn connection(&self) -> Connection {
        Connection::new(&self.email, &self.api_key, &self.api_url)
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default();
        if let Some(timeout) = self.request_timeout {
            options.request_timeout = timeout;
        }
        options
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or blank.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "{key} must be set"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn api_url_for_site(site: &str) -> String {
    let site = site.trim_end_matches('/');
    if site.ends_with(API_PATH_SUFFIX) {
        site.to_owned()
    } else {
        format!("{site}{API_PATH_SUFFIX}")
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_optional_bool<F>(
    key: &'static str,
    default: bool,
    lookup: &mut F,
) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true or false".to_owned(),
        }),
    }
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CREDENTIALS: [(&str, &str); 3] = [
        ("ZULIP_EMAIL", "bot@example.com"),
        ("ZULIP_API_KEY", "abc123"),
        ("ZULIP_SITE", "https://chat.example.com"),
    ];

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<TailConfig, ConfigError> {
        let map = CREDENTIALS
            .iter()
            .chain(pairs.iter())
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        TailConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn parses_credentials_and_defaults() {
        let cfg = config_from_pairs(&[]).expect("config should parse");

        assert_eq!(cfg.email, "bot@example.com");
        assert_eq!(cfg.api_url, "https://chat.example.com/api/v1");
        assert!(cfg.event_types.is_empty());
        assert_eq!(cfg.mode, SubscriptionMode::Durable);
        assert!(!cfg.apply_markdown);
        assert_eq!(cfg.client_options(), ClientOptions::default());
    }

    #[test]
    fn keeps_existing_api_suffix() {
        let cfg = config_from_pairs(&[("ZULIP_SITE", "https://chat.example.com/api/v1/")])
            .expect("config should parse");
        assert_eq!(cfg.api_url, "https://chat.example.com/api/v1");
    }

    #[test]
    fn parses_event_types_and_switches() {
        let cfg = config_from_pairs(&[
            ("ZULIP_EVENT_TYPES", "message, reaction,,typing"),
            ("ZULIP_DURABLE", "false"),
            ("ZULIP_APPLY_MARKDOWN", "yes"),
            ("ZULIP_REQUEST_TIMEOUT_SECS", "120"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.event_types, vec!["message", "reaction", "typing"]);
        assert_eq!(cfg.mode, SubscriptionMode::NonDurable);
        assert!(cfg.apply_markdown);
        assert_eq!(
            cfg.client_options().request_timeout,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn requires_credentials() {
        let err = TailConfig::from_lookup(|_| None).expect_err("credentials are required");
        assert_eq!(err, ConfigError::Missing { key: "ZULIP_EMAIL" });
        assert_eq!(err.to_string(), "ZULIP_EMAIL must be set");
    }

    #[test]
    fn rejects_invalid_values() {
        let err = config_from_pairs(&[("ZULIP_DURABLE", "maybe")])
            .expect_err("invalid boolean should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ZULIP_DURABLE",
                ..
            }
        ));

        let err = config_from_pairs(&[("ZULIP_REQUEST_TIMEOUT_SECS", "0")])
            .expect_err("zero timeout should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ZULIP_REQUEST_TIMEOUT_SECS",
                ..
            }
        ));
    }
}
