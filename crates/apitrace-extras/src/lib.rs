//! # apitrace-extras
//!
//! Optional features built on top of `apitrace-core`.
//!
//! ## Features
//!
//! - `magic-link` - signed passwordless-login redirect URLs
//! - `config` - capture settings from `APITRACE_*` environment variables
//!   and `.env` files
//!
//! Both are enabled by default.
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! apitrace-extras = { version = "0.1", default-features = false, features = ["config"] }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Magic link issuance
#[cfg(feature = "magic-link")]
pub mod magic_link;

// Environment configuration
#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "magic-link")]
pub use magic_link::{
    AccountSecret, HttpSecretSource, MagicLinkError, MagicLinkIssuer, SecretSource, StaticSecret,
};

#[cfg(feature = "config")]
pub use config::{env_or, load_dotenv, load_dotenv_from, require_env, ConfigError, Settings};
