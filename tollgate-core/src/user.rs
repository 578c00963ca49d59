//! Users as seen by the lockout engine
//!
//! Tollgate does not own user accounts; it only needs enough of a user to match a login
//! identifier, verify a password and key the per-user failure counter:
//!
//! | Field           | Type     | Description                                             |
//! | --------------- | -------- | ------------------------------------------------------- |
//! | `id`            | `UserId` | Integer identifier, the key of the user failure counter |
//! | `login`         | `String` | The login identifier supplied by callers                |
//! | `password_hash` | `String` | Hex SHA-256 of `"{password}:{salt}"`                    |
//! | `salt`          | `String` | Per-user salt                                           |
use serde::{Deserialize, Serialize};

use crate::{
    crypto::{calculate_password_hash, generate_salt, verify_password},
    error::{AuthError, ValidationError, utilities::RequiredFieldExt},
};

/// Identifier of a user in the credential store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Self {
        UserId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(UserId)
    }
}

/// A user row from the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub salt: String,
}

impl User {
    /// Check a candidate password against the stored salted hash.
    pub fn verify_password(&self, candidate: &str) -> bool {
        verify_password(candidate, &self.salt, &self.password_hash)
    }

    /// Like [`User::verify_password`], but rejects stored hashes that no password could match.
    pub fn check_password(&self, candidate: &str) -> Result<bool, AuthError> {
        let well_formed = self.password_hash.len() == 64
            && self.password_hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !well_formed {
            return Err(AuthError::UnusableCredential {
                user_id: self.id.as_i64(),
                reason: "password hash is not a hex SHA-256 digest".to_string(),
            });
        }
        Ok(self.verify_password(candidate))
    }
}

/// A user to be inserted into the credential store, password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub password_hash: String,
    pub salt: String,
}

impl NewUser {
    pub fn builder() -> NewUserBuilder {
        NewUserBuilder::default()
    }
}

#[derive(Default)]
pub struct NewUserBuilder {
    login: Option<String>,
    password: Option<String>,
    salt: Option<String>,
}

impl NewUserBuilder {
    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Use a fixed salt instead of a random one.
    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn build(self) -> Result<NewUser, ValidationError> {
        let login = self.login.require_field("Login")?;
        if login.trim().is_empty() {
            return Err(ValidationError::InvalidLogin(
                "login must not be empty".to_string(),
            ));
        }
        let password = self.password.require_field("Password")?;
        let salt = self.salt.unwrap_or_else(generate_salt);

        Ok(NewUser {
            password_hash: calculate_password_hash(&password, &salt),
            login,
            salt,
        })
    }
}
