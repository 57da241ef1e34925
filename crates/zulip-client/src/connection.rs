use std::{fmt, time::Duration};

use zulip_core::ReconnectPolicy;

/// Per-call deadline; exceeds the server's ~60s heartbeat interval on `events`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Immutable credentials and base URL shared by every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Connection {
    username: String,
    api_key: String,
    base_url: String,
}

impl Connection {
    /// Trailing slashes on `base_url` are dropped.
    pub fn new(
        username: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            username: username.into(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an endpoint relative to the base URL.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Tunables with production defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline applied to every HTTP call.
    pub request_timeout: Duration,
    /// Delay between queue re-registration attempts in durable mode.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
