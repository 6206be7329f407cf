//! Service-account authentication for the Firestore REST API.
//!
//! A signed JWT assertion is exchanged at the key's token endpoint for a
//! short-lived OAuth access token, which is cached until shortly before it
//! expires.

use crate::error::{ConfigError, ConnectionError};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The subset of a Google service-account key file we need.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parses a key from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let key: ServiceAccountKey = serde_json::from_str(json)?;
        if key.project_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "firestore.credentials",
                reason: "project_id is empty".to_string(),
            });
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Produces bearer tokens for store requests.
pub enum TokenSource {
    /// Signs and exchanges assertions, caching the resulting token.
    ServiceAccount {
        key: ServiceAccountKey,
        cached: Option<(String, Instant)>,
    },
    /// A fixed token, as accepted by the Firestore emulator.
    Static(String),
}

impl TokenSource {
    pub fn service_account(key: ServiceAccountKey) -> Self {
        TokenSource::ServiceAccount { key, cached: None }
    }

    pub fn emulator() -> Self {
        TokenSource::Static("owner".to_string())
    }

    /// Returns a valid access token, refreshing it when close to expiry.
    pub fn token(&mut self, client: &reqwest::blocking::Client) -> Result<String, ConnectionError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount { key, cached } => {
                if let Some((token, expires_at)) = cached {
                    if Instant::now() + REFRESH_MARGIN < *expires_at {
                        return Ok(token.clone());
                    }
                }
                let (token, lifetime) = exchange(client, key)?;
                *cached = Some((token.clone(), Instant::now() + lifetime));
                Ok(token)
            }
        }
    }
}

/// Builds the signed JWT assertion for `key`.
pub fn sign_assertion(key: &ServiceAccountKey) -> Result<String, ConnectionError> {
    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: DATASTORE_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| ConnectionError::InvalidCredential(e.to_string()))?;
    encode(&header, &claims, &encoding_key)
        .map_err(|e| ConnectionError::InvalidCredential(e.to_string()))
}

fn exchange(
    client: &reqwest::blocking::Client,
    key: &ServiceAccountKey,
) -> Result<(String, Duration), ConnectionError> {
    let assertion = sign_assertion(key)?;
    debug!(token_uri = %key.token_uri, "Requesting store access token");

    let response = client
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ConnectionError::Authentication(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = response
        .json()
        .map_err(|e| ConnectionError::Authentication(e.to_string()))?;
    let lifetime = Duration::from_secs(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS as u64));
    Ok((token.access_token, lifetime))
}
