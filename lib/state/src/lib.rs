//! Stateless, tamper-evident OAuth2 `state` tokens.
//!
//! The login flow needs to remember two things across the round trip to the
//! identity provider: where the user wanted to go, and the nonce bound into
//! the ID token. Instead of a server-side store, both are sealed into the
//! `state` parameter itself with AES-256-GCM under a server-held key.
//!
//! # Example
//!
//! ```
//! use keyward_state::{StateCodec, StateKey};
//!
//! let codec = StateCodec::new(&StateKey::derive(Some("operator secret")));
//! let token = codec.issue("nonce-123", "/dashboard").expect("issue state");
//!
//! assert_eq!(codec.validate(&token).as_deref(), Some("/dashboard"));
//! assert_eq!(codec.validate("garbage"), None);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod key;

pub use codec::{MAX_CLOCK_SKEW_SECONDS, MAX_STATE_AGE_SECONDS, StateCodec, StatePayload};
pub use config::StateConfig;
pub use error::StateError;
pub use key::{DEFAULT_STATE_SECRET, StateKey};
