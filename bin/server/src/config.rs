//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating sections: `IDENTITY__CLIENT_ID`, `STATE__ENCRYPTION_KEY`,
//! `BROKER__FALLBACK_ROLE`, `COOKIE__DOMAIN` and so on.

use keyward_broker::BrokerConfig;
use keyward_identity::IdentityConfig;
use keyward_state::StateConfig;
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    /// Default: "0.0.0.0:3000"
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Identity provider and login flow configuration.
    pub identity: IdentityConfig,

    /// State token configuration.
    #[serde(default)]
    pub state: StateConfig,

    /// Credential broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Identity cookie configuration.
    #[serde(default)]
    pub cookie: CookieConfig,
}

/// Settings for the `jwt` identity cookie.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Domain attribute. Host-only when unset.
    #[serde(default)]
    pub domain: Option<String>,

    /// Whether to set the Secure flag (requires HTTPS).
    /// Defaults to true; browsers drop `SameSite=None` cookies without it.
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_secure() -> bool {
    true
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            domain: None,
            secure: default_secure(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}
