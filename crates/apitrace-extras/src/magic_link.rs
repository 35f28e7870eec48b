//! Passwordless login links.
//!
//! A [`MagicLinkIssuer`] fetches the account's base URL and signing secret,
//! signs the user's identity into an HS256 token with a fresh `jti`, and
//! returns the redirect target with the token appended as `auth_token`.
//!
//! # Example
//!
//! ```ignore
//! use apitrace_extras::magic_link::MagicLinkIssuer;
//! use serde_json::json;
//!
//! let issuer = MagicLinkIssuer::http("https://dash.example.com/api/v1/magic-link", api_key)?;
//! let url = issuer
//!     .issue(&json!({"email": "ada@example.com", "name": "Ada"}), "/docs")
//!     .await?;
//! ```

use apitrace_core::Credential;
use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Query parameter carrying the signed token.
pub const AUTH_TOKEN_PARAM: &str = "auth_token";

/// Errors raised while issuing a magic link.
#[derive(Debug, thiserror::Error)]
pub enum MagicLinkError {
    /// No API key was supplied.
    #[error("an API key is required to issue magic links")]
    MissingApiKey,

    /// No user identity was supplied, or it had no fields.
    #[error("a user identity is required to issue a magic link")]
    MissingIdentity,

    /// The secret request never completed.
    #[error("failed to fetch signing secret: {0}")]
    Http(#[from] reqwest::Error),

    /// The secret endpoint answered with a non-success status.
    #[error("secret endpoint returned status {0}")]
    Status(u16),

    /// The token could not be signed.
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// The base URL or redirect target is not a valid URL.
    #[error("invalid redirect URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The identity could not be serialized.
    #[error("invalid identity: {0}")]
    Identity(#[from] serde_json::Error),
}

/// Per-account values needed to sign a link.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSecret {
    /// Where relative redirect paths are resolved.
    pub base_url: String,
    /// HS256 signing secret.
    pub jwt_secret: String,
}

impl fmt::Debug for AccountSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSecret")
            .field("base_url", &self.base_url)
            .field("jwt_secret", &"[REDACTED]")
            .finish()
    }
}

/// Where the [`AccountSecret`] comes from.
#[async_trait]
pub trait SecretSource: Send + Sync + 'static {
    /// Fetch the current secret.
    async fn fetch(&self) -> Result<AccountSecret, MagicLinkError>;
}

/// Fetches the secret over HTTP with the account's Basic credential.
#[derive(Debug, Clone)]
pub struct HttpSecretSource {
    url: String,
    credential: Credential,
    client: reqwest::Client,
}

impl HttpSecretSource {
    /// Create a source reading from `url`.
    pub fn new(url: impl Into<String>, api_key: &str) -> Result<Self, MagicLinkError> {
        if api_key.trim().is_empty() {
            return Err(MagicLinkError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(apitrace_core::config::DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            url: url.into(),
            credential: Credential::from_api_key(api_key),
            client,
        })
    }
}

#[async_trait]
impl SecretSource for HttpSecretSource {
    async fn fetch(&self) -> Result<AccountSecret, MagicLinkError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::AUTHORIZATION, self.credential.header_value())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MagicLinkError::Status(response.status().as_u16()));
        }
        Ok(response.json::<AccountSecret>().await?)
    }
}

/// A fixed secret, for offline use and tests.
#[derive(Debug, Clone)]
pub struct StaticSecret(pub AccountSecret);

#[async_trait]
impl SecretSource for StaticSecret {
    async fn fetch(&self) -> Result<AccountSecret, MagicLinkError> {
        Ok(self.0.clone())
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    #[serde(flatten)]
    identity: &'a Map<String, Value>,
    jti: String,
    iat: i64,
}

/// Issues signed redirect URLs.
#[derive(Clone)]
pub struct MagicLinkIssuer {
    source: Arc<dyn SecretSource>,
}

impl MagicLinkIssuer {
    /// Issue links signed with secrets from `source`.
    pub fn new<S: SecretSource>(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Issue links with secrets fetched from `url`.
    pub fn http(url: impl Into<String>, api_key: &str) -> Result<Self, MagicLinkError> {
        Ok(Self::new(HttpSecretSource::new(url, api_key)?))
    }

    /// Build the signed redirect URL for `identity`.
    ///
    /// `redirect` is used as-is when it is an absolute URL and is appended
    /// to the account's base URL otherwise.
    pub async fn issue<T: Serialize>(
        &self,
        identity: &T,
        redirect: &str,
    ) -> Result<String, MagicLinkError> {
        let identity = match serde_json::to_value(identity)? {
            Value::Object(map) if !map.is_empty() => map,
            _ => return Err(MagicLinkError::MissingIdentity),
        };

        let secret = self.source.fetch().await?;
        let mut target = resolve_target(&secret.base_url, redirect)?;

        let claims = Claims {
            identity: &identity,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: chrono::Utc::now().timestamp(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.jwt_secret.as_bytes()),
        )?;

        target
            .query_pairs_mut()
            .append_pair(AUTH_TOKEN_PARAM, &token);

        tracing::debug!(jti = %claims.jti, target = %target.path(), "Issued magic link");
        Ok(target.into())
    }
}

impl fmt::Debug for MagicLinkIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MagicLinkIssuer").finish_non_exhaustive()
    }
}

fn resolve_target(base_url: &str, redirect: &str) -> Result<Url, url::ParseError> {
    if let Ok(absolute) = Url::parse(redirect) {
        return Ok(absolute);
    }
    Url::parse(&format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        redirect.trim_start_matches('/')
    ))
}
