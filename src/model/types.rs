//! Identifier types shared across the bundle model.
//!
//! Feature keys, story keys and protocol names double as dotted-path segments
//! (`features.FEATURE-001.title`) and as artifact file names
//! (`features/FEATURE-001.yaml`), so they are validated once at the edge and
//! carried around as [`SectionKey`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SectionKey
// ---------------------------------------------------------------------------

/// A validated key for a feature, story or protocol.
///
/// Keys are 1–128 characters of ASCII letters, digits, `_` and `-`.
/// Examples: `FEATURE-001`, `STORY-042`, `checkout_flow`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SectionKey(String);

impl SectionKey {
    /// The maximum length of a key.
    pub const MAX_LEN: usize = 128;

    /// Create a new `SectionKey`, validating format.
    ///
    /// # Errors
    /// Returns an error if the key is empty, too long, or contains characters
    /// that would break dotted paths or file names.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.is_empty() {
            return Err(ValidationError {
                kind: ErrorKind::SectionKey,
                value: s.to_owned(),
                reason: "key must not be empty".to_owned(),
            });
        }
        if s.len() > Self::MAX_LEN {
            return Err(ValidationError {
                kind: ErrorKind::SectionKey,
                value: s.to_owned(),
                reason: format!(
                    "key must be at most {} characters, got {}",
                    Self::MAX_LEN,
                    s.len()
                ),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError {
                kind: ErrorKind::SectionKey,
                value: s.to_owned(),
                reason: "key must contain only ASCII letters, digits, '-' and '_'".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SectionKey {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SectionKey {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<SectionKey> for String {
    fn from(key: SectionKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// PersonaName
// ---------------------------------------------------------------------------

/// A validated persona name (`product-owner`, `architect`, ...).
///
/// Lowercase alphanumeric with hyphens, 1–64 characters.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonaName(String);

impl PersonaName {
    /// The maximum length of a persona name.
    pub const MAX_LEN: usize = 64;

    /// Create a new `PersonaName`, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or not lowercase
    /// alphanumeric with hyphens.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.is_empty() || s.len() > Self::MAX_LEN {
            return Err(ValidationError {
                kind: ErrorKind::PersonaName,
                value: s.to_owned(),
                reason: format!("persona name must be 1-{} characters", Self::MAX_LEN),
            });
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(ValidationError {
                kind: ErrorKind::PersonaName,
                value: s.to_owned(),
                reason: "persona name must not start or end with a hyphen".to_owned(),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError {
                kind: ErrorKind::PersonaName,
                value: s.to_owned(),
                reason: "persona name must contain only lowercase letters (a-z), digits (0-9), and hyphens (-)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for PersonaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PersonaName {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PersonaName {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<PersonaName> for String {
    fn from(name: PersonaName) -> Self {
        name.0
    }
}

impl PartialEq<str> for PersonaName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// The kind of value that failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A [`SectionKey`] validation error.
    SectionKey,
    /// A [`PersonaName`] validation error.
    PersonaName,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectionKey => write!(f, "section key"),
            Self::PersonaName => write!(f, "persona name"),
        }
    }
}

/// A validation error for bundle identifier types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?} ({})", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
