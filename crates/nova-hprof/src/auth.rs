//! Password gate for explicit redaction requests.

use sha2::{Digest, Sha256};

use crate::error::AuthorizationError;

/// Minimum salt length, in bytes.
pub const MIN_SALT_LEN: usize = 8;

/// A `password,salt` pair supplied with a dump request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    password: String,
    salt: Vec<u8>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("password", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

impl Credential {
    pub fn new(
        password: impl Into<String>,
        salt: impl Into<Vec<u8>>,
    ) -> Result<Self, AuthorizationError> {
        let salt = salt.into();
        if salt.len() < MIN_SALT_LEN {
            return Err(AuthorizationError::SaltTooShort { len: salt.len() });
        }
        Ok(Self {
            password: password.into(),
            salt,
        })
    }

    /// Parses `password,salt`. Exactly one separator is allowed.
    pub fn parse(raw: &str) -> Result<Self, AuthorizationError> {
        let mut parts = raw.split(',');
        let (Some(password), Some(salt), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AuthorizationError::Malformed);
        };
        Self::new(password, salt.as_bytes())
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    fn digest_with(&self, password: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(password.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }

    /// Compares salted digests so the comparison time does not depend on where the
    /// passwords first differ.
    pub fn matches(&self, configured_secret: &str) -> bool {
        let supplied = self.digest_with(&self.password);
        let expected = self.digest_with(configured_secret);
        supplied
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    /// No explicit redaction was requested, so no check applies.
    NotRequired,
    Granted,
}

/// Checks whether an explicit redaction request may be honored.
pub fn authorize(
    redaction_requested: bool,
    supplied: Option<&str>,
    configured_secret: Option<&str>,
) -> Result<Authorization, AuthorizationError> {
    if !redaction_requested {
        return Ok(Authorization::NotRequired);
    }
    let supplied = supplied
        .filter(|s| !s.trim().is_empty())
        .ok_or(AuthorizationError::MissingCredential)?;
    let credential = Credential::parse(supplied)?;
    let secret = configured_secret
        .filter(|s| !s.is_empty())
        .ok_or(AuthorizationError::NoConfiguredSecret)?;

    if credential.matches(secret) {
        Ok(Authorization::Granted)
    } else {
        Err(AuthorizationError::Mismatch)
    }
}

/// Boolean form of [`authorize`].
pub fn is_authorized(
    redaction_requested: bool,
    supplied: Option<&str>,
    configured_secret: Option<&str>,
) -> bool {
    authorize(redaction_requested, supplied, configured_secret).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_byte_salt_with_matching_password_is_granted() {
        assert_eq!(
            authorize(true, Some("secret,01234567"), Some("secret")),
            Ok(Authorization::Granted)
        );
    }

    #[test]
    fn seven_byte_salt_is_rejected() {
        assert_eq!(
            authorize(true, Some("secret,1234567"), Some("secret")),
            Err(AuthorizationError::SaltTooShort { len: 7 })
        );
        assert!(!is_authorized(true, Some("secret,1234567"), Some("secret")));
    }

    #[test]
    fn not_requested_is_always_allowed() {
        assert_eq!(authorize(false, None, None), Ok(Authorization::NotRequired));
        assert_eq!(
            authorize(false, Some("garbage"), Some("secret")),
            Ok(Authorization::NotRequired)
        );
    }

    #[test]
    fn credential_must_have_exactly_two_parts() {
        assert_eq!(Credential::parse("secret"), Err(AuthorizationError::Malformed));
        assert_eq!(
            Credential::parse("secret,0123,4567"),
            Err(AuthorizationError::Malformed)
        );
        assert!(Credential::parse("secret,01234567").is_ok());
    }

    #[test]
    fn mismatch_and_missing_inputs_are_distinguished() {
        assert_eq!(
            authorize(true, Some("Secret,01234567"), Some("secret")),
            Err(AuthorizationError::Mismatch)
        );
        assert_eq!(
            authorize(true, Some("secret,01234567"), Some("secret2")),
            Err(AuthorizationError::Mismatch)
        );
        assert_eq!(
            authorize(true, None, Some("secret")),
            Err(AuthorizationError::MissingCredential)
        );
        assert_eq!(
            authorize(true, Some("secret,01234567"), None),
            Err(AuthorizationError::NoConfiguredSecret)
        );
    }

    #[test]
    fn password_must_match_byte_for_byte() {
        assert_eq!(
            authorize(true, Some("  secret,01234567"), Some("secret")),
            Err(AuthorizationError::Mismatch)
        );
        assert_eq!(
            authorize(true, Some("secret ,01234567"), Some("secret")),
            Err(AuthorizationError::Mismatch)
        );
        assert_eq!(
            authorize(true, Some("   "), Some("secret")),
            Err(AuthorizationError::MissingCredential)
        );
    }

    #[test]
    fn debug_output_hides_the_password() {
        let credential = Credential::parse("hunter2,01234567").unwrap();
        let debug = format!("{credential:?}");
        assert!(!debug.contains("hunter2"), "{debug}");
    }
}
