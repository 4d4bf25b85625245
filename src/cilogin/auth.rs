//! Credentials and the authenticator seam.

use anyhow::{bail, Result};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Email used when the request does not carry one.
pub const DEFAULT_EMAIL: &str = "ciuser@example.com";

/// Password sent to the authenticator for every login attempt. The request's
/// own password field is never read.
pub const FIXED_PASSWORD: &str = "password";

/// Credential pair handed to an [`Authenticator`]. Built per request and
/// dropped once the attempt returns.
#[derive(Debug)]
pub struct Credentials {
    email: String,
    password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Credentials for a login request: the requested email or
    /// [`DEFAULT_EMAIL`], always paired with [`FIXED_PASSWORD`].
    #[must_use]
    pub fn for_login(email: Option<String>) -> Self {
        Self::new(
            email.unwrap_or_else(|| DEFAULT_EMAIL.to_string()),
            FIXED_PASSWORD,
        )
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub const fn password(&self) -> &SecretString {
        &self.password
    }
}

/// Verifies a credential pair against some user store.
pub trait Authenticator: Send + Sync {
    /// Returns `Ok(true)` when the credentials match a known user.
    ///
    /// # Errors
    /// Returns an error when the backing store cannot be consulted.
    fn attempt(&self, credentials: &Credentials) -> Result<bool>;
}

/// In-memory user table keyed by email.
#[derive(Debug)]
pub struct UserDirectory {
    users: HashMap<String, SecretString>,
}

impl UserDirectory {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    /// Build a directory from `email:password` specs.
    ///
    /// # Errors
    /// Returns an error if any spec is malformed.
    pub fn from_specs<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut directory = Self::empty();
        for spec in specs {
            let (email, password) = parse_user_spec(spec.as_ref())?;
            directory.users.insert(email, password);
        }
        Ok(directory)
    }

    #[must_use]
    pub fn with_user(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.users
            .insert(email.into(), SecretString::from(password.into()));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::empty().with_user(DEFAULT_EMAIL, FIXED_PASSWORD)
    }
}

impl Authenticator for UserDirectory {
    fn attempt(&self, credentials: &Credentials) -> Result<bool> {
        let Some(stored) = self.users.get(credentials.email()) else {
            debug!("User not found");
            return Ok(false);
        };

        Ok(passwords_match(stored, credentials.password()))
    }
}

/// Compare SHA-256 digests of both sides without an early exit.
fn passwords_match(stored: &SecretString, candidate: &SecretString) -> bool {
    let stored = Sha256::digest(stored.expose_secret().as_bytes());
    let candidate = Sha256::digest(candidate.expose_secret().as_bytes());
    stored
        .iter()
        .zip(candidate.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Split `email:password` on the first colon. Passwords may contain colons.
fn parse_user_spec(spec: &str) -> Result<(String, SecretString)> {
    let Some((email, password)) = spec.split_once(':') else {
        bail!("invalid user spec, expected email:password");
    };

    let email = email.trim();
    if email.is_empty() {
        bail!("invalid user spec, email is empty");
    }

    if password.is_empty() {
        bail!("invalid user spec for {email}, password is empty");
    }

    Ok((email.to_string(), SecretString::from(password.to_string())))
}
