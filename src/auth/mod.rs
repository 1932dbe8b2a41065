//! Authentication Module
//!
//! Bearer token issue/verify and the login principal directory.

mod token;
mod users;

pub use token::{bearer_token, Authenticator, Claims, Credential, IssuedToken};
pub use users::{hash_password, verify_password, UserDirectory};
