//! Sign-in credentials and federated providers.
//!
//! Raw email/password input is validated here before it reaches the identity
//! backend port; passwords are held in zeroizing buffers.

use std::fmt;

use zeroize::Zeroizing;

/// Domain error returned when credential values are invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialValidationError {
    /// Email was missing or blank once trimmed.
    EmptyEmail,
    /// Email had no `@` separating a local part from a domain.
    MalformedEmail,
    /// Password was blank.
    EmptyPassword,
}

impl fmt::Display for CredentialValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyEmail => write!(f, "email must not be empty"),
            Self::MalformedEmail => write!(f, "email must look like local@domain"),
            Self::EmptyPassword => write!(f, "password must not be empty"),
        }
    }
}

impl std::error::Error for CredentialValidationError {}

/// Validated email/password credentials.
///
/// ## Invariants
/// - `email` is trimmed, lower-cased, and contains a non-empty local part and
///   domain around a single `@`.
/// - `password` is non-empty but retains caller-provided whitespace.
///
/// # Examples
/// ```
/// use secure_notes::domain::EmailCredentials;
///
/// let creds = EmailCredentials::try_from_parts(" Alice@Example.com ", "pw").unwrap();
/// assert_eq!(creds.email(), "alice@example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailCredentials {
    email: String,
    password: Zeroizing<String>,
}

impl EmailCredentials {
    /// Construct credentials from raw email/password inputs.
    pub fn try_from_parts(email: &str, password: &str) -> Result<Self, CredentialValidationError> {
        let normalized = email.trim();
        if normalized.is_empty() {
            return Err(CredentialValidationError::EmptyEmail);
        }
        match normalized.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {}
            _ => return Err(CredentialValidationError::MalformedEmail),
        }

        if password.is_empty() {
            return Err(CredentialValidationError::EmptyPassword);
        }

        Ok(Self {
            email: normalized.to_lowercase(),
            password: Zeroizing::new(password.to_owned()),
        })
    }

    /// Normalised email address used for account lookups.
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Password string provided by the caller.
    pub fn password(&self) -> &str {
        self.password.as_str()
    }
}

/// Credential accepted by [`crate::domain::IdentityService::sign_in_with_credential`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Credential {
    /// Email and password account.
    EmailPassword(EmailCredentials),
}

/// Third-party identity providers offered as popup sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FederatedProvider {
    /// Google accounts.
    Google,
    /// GitHub accounts.
    GitHub,
}

impl FederatedProvider {
    /// Stable provider identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google.com",
            Self::GitHub => "github.com",
        }
    }
}

impl fmt::Display for FederatedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
