//! Bearer Token Authenticator
//!
//! HS256 tokens carrying `sub`, `scopes`, `iat` and `exp`. The signature is
//! checked by `jsonwebtoken`; expiry is checked here against the injected
//! clock so time-dependent behaviour is deterministic under test.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{millis_to_datetime, SharedClock};
use crate::error::{Error, Result};

// == Claims ==
/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

// == Credential ==
/// A verified identity. Valid while `now < expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credential {
    pub subject: String,
    pub scopes: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    fn from_claims(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            scopes: claims.scopes.into_iter().collect(),
            issued_at: secs_to_datetime(claims.iat),
            expires_at: secs_to_datetime(claims.exp),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// A freshly signed token together with what it asserts.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub credential: Credential,
}

impl IssuedToken {
    /// Seconds from issue to expiry.
    pub fn expires_in(&self) -> i64 {
        (self.credential.expires_at - self.credential.issued_at).num_seconds()
    }
}

fn secs_to_datetime(secs: i64) -> DateTime<Utc> {
    millis_to_datetime(secs.max(0) as u64 * 1000)
}

// == Authenticator ==
/// Issues and verifies bearer tokens signed with the shared secret.
#[derive(Clone)]
pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    default_ttl: Duration,
    clock: SharedClock,
}

impl Authenticator {
    /// Creates an authenticator signing with `secret`.
    pub fn new(secret: &SecretString, default_ttl: Duration, clock: SharedClock) -> Self {
        let secret = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.required_spec_claims =
            HashSet::from(["exp".to_string(), "sub".to_string()]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            default_ttl,
            clock,
        }
    }

    /// Lifetime applied by [`Authenticator::issue_default`].
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Signs a token for `subject` valid for `ttl` from now.
    ///
    /// # Errors
    /// Returns `Error::Internal` if signing fails.
    pub fn issue(&self, subject: &str, scopes: &[String], ttl: Duration) -> Result<IssuedToken> {
        let iat = self.clock.now_secs();
        let claims = Claims {
            sub: subject.to_string(),
            scopes: scopes.to_vec(),
            iat,
            exp: iat + ttl.as_secs() as i64,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))?;

        debug!(subject = %subject, exp = claims.exp, "Issued access token");
        Ok(IssuedToken {
            token,
            credential: Credential::from_claims(claims),
        })
    }

    /// Signs a token with the configured lifetime.
    pub fn issue_default(&self, subject: &str, scopes: &[String]) -> Result<IssuedToken> {
        self.issue(subject, scopes, self.default_ttl)
    }

    /// Verifies signature and expiry.
    ///
    /// Every failure is reported as `Error::AuthInvalid`; the reason is only
    /// logged.
    pub fn verify(&self, token: &str) -> Result<Credential> {
        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                match e.kind() {
                    ErrorKind::InvalidSignature => debug!("Rejected token: bad signature"),
                    ErrorKind::MissingRequiredClaim(claim) => {
                        debug!(claim = %claim, "Rejected token: missing claim")
                    }
                    _ => debug!(error = %e, "Rejected token: malformed"),
                }
                return Err(Error::AuthInvalid);
            }
        };

        let now = self.clock.now_secs();
        if now >= claims.exp {
            debug!(subject = %claims.sub, exp = claims.exp, now, "Rejected token: expired");
            return Err(Error::AuthInvalid);
        }
        if claims.sub.is_empty() {
            debug!("Rejected token: empty subject");
            return Err(Error::AuthInvalid);
        }

        Ok(Credential::from_claims(claims))
    }

    /// Resolves the credential carried by an `Authorization: Bearer` header.
    ///
    /// A missing header, another scheme or an invalid token yields `None`.
    pub fn authenticate(&self, headers: &HeaderMap) -> Option<Credential> {
        let token = bearer_token(headers)?;
        self.verify(token).ok()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::http::HeaderValue;
    use std::sync::Arc;

    const T0: u64 = 1_700_000_000_000;

    fn authenticator(secret: &str) -> (Authenticator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let auth = Authenticator::new(
            &SecretString::from(secret.to_string()),
            Duration::from_secs(30 * 60),
            clock.clone(),
        );
        (auth, clock)
    }

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_issue_and_verify() {
        let (auth, _) = authenticator("test-secret");
        let issued = auth.issue_default("alice", &scopes(&["read", "write"])).unwrap();

        let credential = auth.verify(&issued.token).unwrap();
        assert_eq!(credential.subject, "alice");
        assert!(credential.has_scope("write"));
        assert_eq!(credential, issued.credential);
        assert_eq!(issued.expires_in(), 1800);
    }

    #[test]
    fn test_token_valid_until_expiry() {
        let (auth, clock) = authenticator("test-secret");
        let issued = auth.issue_default("alice", &[]).unwrap();

        clock.advance(Duration::from_secs(29 * 60));
        assert!(auth.verify(&issued.token).is_ok());

        clock.advance(Duration::from_secs(2 * 60));
        assert!(matches!(auth.verify(&issued.token), Err(Error::AuthInvalid)));
    }

    #[test]
    fn test_expiry_instant_is_exclusive() {
        let (auth, clock) = authenticator("test-secret");
        let issued = auth.issue("bob", &[], Duration::from_secs(60)).unwrap();

        clock.advance(Duration::from_millis(59_999));
        assert!(auth.verify(&issued.token).is_ok());
        clock.advance(Duration::from_millis(1));
        assert!(auth.verify(&issued.token).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (issuer, _) = authenticator("secret-a");
        let (verifier, _) = authenticator("secret-b");
        let issued = issuer.issue_default("alice", &[]).unwrap();

        assert!(matches!(verifier.verify(&issued.token), Err(Error::AuthInvalid)));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let (auth, _) = authenticator("test-secret");
        assert!(matches!(auth.verify("not.a.jwt"), Err(Error::AuthInvalid)));
        assert!(matches!(auth.verify(""), Err(Error::AuthInvalid)));
    }

    #[test]
    fn test_authenticate_headers() {
        let (auth, _) = authenticator("test-secret");
        let issued = auth.issue_default("alice", &[]).unwrap();

        let mut headers = HeaderMap::new();
        assert!(auth.authenticate(&headers).is_none());

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", issued.token)).unwrap(),
        );
        assert_eq!(auth.authenticate(&headers).unwrap().subject, "alice");

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", issued.token)).unwrap(),
        );
        assert!(auth.authenticate(&headers).is_none());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(bearer_token(&headers), None);
    }
}
