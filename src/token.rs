//! Manage bearer tokens.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

const DEFAULT_LIFETIME_SECS: u64 = 60 * 15; // 15 minutes.

/// Shipped sample secret; refusing it forces operators to pick their own.
const PLACEHOLDER_SECRET: &str = "change_this_in_production";

/// Pieces of information asserted on a token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Identifies the expiration time on or after which the token must not
    /// be accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the token was issued.
    pub iat: u64,
    /// Identifies the instance that issued the token.
    pub iss: String,
    /// Account ID.
    pub sub: String,
}

/// Issues and verifies signed bearer tokens bound to an account identity.
///
/// Tokens carry no liveness: suspension or deletion takes effect when the
/// auth middleware re-fetches the account, not on already-issued tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    lifetime_secs: u64,
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance.
    ///
    /// Fails with a configuration error when the signing secret is unset or
    /// left at the insecure placeholder value.
    pub fn new(
        issuer: &str,
        secret: &str,
        lifetime_secs: Option<u64>,
    ) -> Result<Self> {
        if secret.is_empty() || secret == PLACEHOLDER_SECRET {
            return Err(ServerError::Configuration(
                "token signing secret is unset or left at its placeholder"
                    .to_owned(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            lifetime_secs: lifetime_secs.unwrap_or(DEFAULT_LIFETIME_SECS),
        })
    }

    /// Seconds a fresh token stays valid.
    pub fn lifetime_secs(&self) -> u64 {
        self.lifetime_secs
    }

    /// Create a new signed token for an account.
    pub fn create(&self, account_id: &str) -> Result<String> {
        let now = Utc::now().timestamp() as u64;
        let header = Header::new(Algorithm::HS256);
        let claims = Claims {
            exp: now + self.lifetime_secs,
            iat: now,
            iss: self.issuer.clone(),
            sub: account_id.to_owned(),
        };

        encode(&header, &claims, &self.encoding_key).map_err(|err| {
            ServerError::Internal {
                details: "failed to sign bearer token".to_owned(),
                source: Some(Box::new(err)),
            }
        })
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ServerError::Unauthorized)
    }
}
