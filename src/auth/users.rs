//! User Directory
//!
//! Login principals with Argon2id password hashes, loaded from
//! configuration at startup.

use std::collections::HashMap;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{debug, warn};

use crate::auth::{Authenticator, IssuedToken};
use crate::config::UserSpec;
use crate::error::{Error, Result};

/// Hashes a password into a PHC string using Argon2id defaults.
///
/// # Errors
/// Returns `Error::Internal` if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Password hashing failed: {}", e)))
}

/// Checks `password` against a PHC string. A malformed hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash is not a valid PHC string");
            false
        }
    }
}

// == User Directory ==
/// Configured principals keyed by username.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserSpec>,
    // Verified against for unknown usernames so both failures cost the same.
    decoy_hash: Option<String>,
}

impl UserDirectory {
    pub fn new(specs: &[UserSpec]) -> Self {
        let users = specs
            .iter()
            .map(|spec| (spec.username.clone(), spec.clone()))
            .collect();
        Self {
            users,
            decoy_hash: hash_password("decoy-password").ok(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Returns the principal if `password` matches.
    pub fn check(&self, username: &str, password: &str) -> Option<&UserSpec> {
        match self.users.get(username) {
            Some(user) if verify_password(password, &user.password_hash) => Some(user),
            Some(_) => None,
            None => {
                if let Some(decoy) = &self.decoy_hash {
                    verify_password(password, decoy);
                }
                None
            }
        }
    }

    /// Verifies the password and issues a token with the default lifetime.
    ///
    /// # Errors
    /// Unknown user and wrong password both return `Error::AuthInvalid`.
    pub fn login(
        &self,
        authenticator: &Authenticator,
        username: &str,
        password: &str,
    ) -> Result<IssuedToken> {
        let Some(user) = self.check(username, password) else {
            debug!(username = %username, "Login rejected");
            return Err(Error::AuthInvalid);
        };
        authenticator.issue_default(&user.username, &user.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use secrecy::SecretString;
    use std::sync::Arc;
    use std::time::Duration;

    fn directory() -> UserDirectory {
        UserDirectory::new(&[UserSpec {
            username: "alice".to_string(),
            scopes: vec!["read".to_string()],
            password_hash: hash_password("correct horse").unwrap(),
        }])
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("other", &hash));
        assert!(!verify_password("s3cret", "not-a-hash"));
    }

    #[test]
    fn test_login_issues_token_with_scopes() {
        let auth = Authenticator::new(
            &SecretString::from("k".to_string()),
            Duration::from_secs(600),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        );
        let issued = directory().login(&auth, "alice", "correct horse").unwrap();

        let credential = auth.verify(&issued.token).unwrap();
        assert_eq!(credential.subject, "alice");
        assert!(credential.has_scope("read"));
        assert_eq!(issued.expires_in(), 600);
    }

    #[test]
    fn test_unknown_user_and_wrong_password_look_alike() {
        let auth = Authenticator::new(
            &SecretString::from("k".to_string()),
            Duration::from_secs(600),
            Arc::new(ManualClock::new(0)),
        );
        let users = directory();

        assert!(matches!(
            users.login(&auth, "alice", "wrong"),
            Err(Error::AuthInvalid)
        ));
        assert!(matches!(
            users.login(&auth, "mallory", "correct horse"),
            Err(Error::AuthInvalid)
        ));
    }
}
