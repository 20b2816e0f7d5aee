//! Callback Signing
//!
//! The dispatch service signs every callback with an HS256 JWT carried in the
//! `Upstash-Signature` header. Its claims bind the token to the raw request
//! body through `body = base64url(sha256(body))`.
//!
//! Two keys are accepted at once (current and next) so the signing key can be
//! rotated without dropping in-flight callbacks.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Header carrying the callback signature.
pub const SIGNATURE_HEADER: &str = "Upstash-Signature";

/// Issuer claim of dispatch-service tokens.
const ISSUER: &str = "Upstash";

/// Lifetime of tokens minted by [`CallbackSigner`].
const TOKEN_TTL_SECS: i64 = 300;

/// JWT claims of a callback signature.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackClaims {
    /// Issuer (always "Upstash").
    pub iss: String,
    /// Destination URL the callback was sent to.
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Not valid before (Unix timestamp).
    pub nbf: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Unique token ID.
    pub jti: String,
    /// base64url SHA-256 of the raw body.
    pub body: String,
}

/// base64url (unpadded) SHA-256 of a request body.
pub fn body_hash(body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(body))
}

/// Compare two strings without short-circuiting on the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.as_bytes()
            .iter()
            .zip(b.as_bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Validates callback signatures against the current and next signing keys.
#[derive(Clone)]
pub struct SignatureVerifier {
    current: DecodingKey,
    next: Option<DecodingKey>,
    validation: Validation,
}

impl SignatureVerifier {
    pub fn new(current_key: &str, next_key: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            current: DecodingKey::from_secret(current_key.as_bytes()),
            next: next_key.map(|k| DecodingKey::from_secret(k.as_bytes())),
            validation,
        }
    }

    /// Tolerate clock skew of `secs` on `exp`/`nbf`.
    #[must_use]
    pub const fn with_leeway(mut self, secs: u64) -> Self {
        self.validation.leeway = secs;
        self
    }

    /// Also require the token subject to equal `url`.
    #[must_use]
    pub fn with_expected_url(mut self, url: &str) -> Self {
        self.validation.sub = Some(url.to_string());
        self
    }

    /// Check that `signature` was issued by a trusted key for exactly `body`.
    ///
    /// Pure: no I/O, no state. Failure reasons are logged at debug level and
    /// never returned.
    pub fn verify(&self, signature: &str, body: &[u8]) -> bool {
        let claims = match self.decode_with(&self.current, signature) {
            Some(claims) => claims,
            None => match self
                .next
                .as_ref()
                .and_then(|key| self.decode_with(key, signature))
            {
                Some(claims) => claims,
                None => return false,
            },
        };

        let expected = body_hash(body);
        let matches = constant_time_eq(claims.body.trim_end_matches('='), &expected);
        if !matches {
            debug!(jti = %claims.jti, "Callback body does not match signed hash");
        }
        matches
    }

    fn decode_with(&self, key: &DecodingKey, token: &str) -> Option<CallbackClaims> {
        match decode::<CallbackClaims>(token, key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "Callback signature rejected by key");
                None
            }
        }
    }
}

/// Mints callback signatures (self-hosted dispatcher and tests).
#[derive(Clone)]
pub struct CallbackSigner {
    key: EncodingKey,
}

impl CallbackSigner {
    pub fn new(signing_key: &str) -> Self {
        Self {
            key: EncodingKey::from_secret(signing_key.as_bytes()),
        }
    }

    /// Sign `body` for delivery to `url`.
    pub fn sign(&self, url: &str, body: &[u8]) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = CallbackClaims {
            iss: ISSUER.to_string(),
            sub: url.to_string(),
            exp: now + TOKEN_TTL_SECS,
            nbf: now,
            iat: now,
            jti: format!("jwt_{}", Uuid::now_v7().simple()),
            body: body_hash(body),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
    }
}
