//! Broker configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Configuration for the credential broker.
///
/// Loaded from environment variables such as `BROKER__FALLBACK_ROLE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Region of the federation service.
    /// Default: "us-east-1"
    #[serde(default = "default_region")]
    region: String,
    /// Overrides the regional federation endpoint, e.g. for a local emulator.
    #[serde(default)]
    endpoint: Option<String>,
    /// Role assumed when the token names none.
    #[serde(default)]
    fallback_role: Option<String>,
    /// Prefix of the federation session name.
    /// Default: "user-session"
    #[serde(default = "default_session_name_prefix")]
    session_name_prefix: String,
    /// Lifetime requested for issued credentials, in seconds.
    /// Default: 3600
    #[serde(default = "default_duration_seconds")]
    duration_seconds: u32,
    /// Cached credentials closer than this to expiry are refreshed, in seconds.
    /// Default: 300
    #[serde(default = "default_safety_buffer_seconds")]
    safety_buffer_seconds: u32,
    /// Timeout for federation requests, in seconds.
    /// Default: 10
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_session_name_prefix() -> String {
    "user-session".to_string()
}

fn default_duration_seconds() -> u32 {
    3600
}

fn default_safety_buffer_seconds() -> u32 {
    300
}

fn default_request_timeout_seconds() -> u64 {
    10
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            fallback_role: None,
            session_name_prefix: default_session_name_prefix(),
            duration_seconds: default_duration_seconds(),
            safety_buffer_seconds: default_safety_buffer_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn with_region(mut self, region: String) -> Self {
        self.region = region;
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn with_fallback_role(mut self, role: String) -> Self {
        self.fallback_role = Some(role);
        self
    }

    #[must_use]
    pub fn with_session_name_prefix(mut self, prefix: String) -> Self {
        self.session_name_prefix = prefix;
        self
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The federation endpoint override. `None` means the SDK resolves the
    /// regional endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    #[must_use]
    pub fn fallback_role(&self) -> Option<&str> {
        self.fallback_role.as_deref()
    }

    /// Session-name prefix; blank configuration yields the default.
    #[must_use]
    pub fn session_name_prefix(&self) -> &str {
        if self.session_name_prefix.trim().is_empty() {
            "user-session"
        } else {
            &self.session_name_prefix
        }
    }

    #[must_use]
    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    #[must_use]
    pub fn safety_buffer(&self) -> Duration {
        Duration::seconds(i64::from(self.safety_buffer_seconds))
    }

    #[must_use]
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_seconds)
    }
}
