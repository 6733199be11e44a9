//! Session codes
//!
//! A session code is the short identifier students type to join. The
//! backend issues six character codes from `[A-Z0-9]`; the client accepts
//! any code of at least three alphanumeric characters so that older or
//! hand-made codes still work. Codes are compared after trimming and
//! upper-casing.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::constants::session_code::{ISSUED_LENGTH, MAX_LENGTH, MIN_LENGTH};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Errors that can occur parsing a session code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Nothing was entered
    #[error("session code cannot be empty")]
    Empty,
    /// The code is shorter than any issued code
    #[error("session code is too short")]
    TooShort,
    /// The code is longer than any issued code
    #[error("session code is too long")]
    TooLong,
    /// The code contains something other than letters and digits
    #[error("session code may only contain letters and digits")]
    InvalidCharacter,
}

/// Identifier of a live session
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct SessionCode(String);

impl SessionCode {
    /// Creates a new random code in the format the backend issues
    pub fn generate() -> Self {
        Self(
            (0..ISSUED_LENGTH)
                .map(|_| char::from(ALPHABET[fastrand::usize(..ALPHABET.len())]))
                .collect(),
        )
    }

    /// The normalized code
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the code has the exact shape of a backend-issued code
    pub fn is_issued_format(&self) -> bool {
        self.0.len() == ISSUED_LENGTH
    }
}

impl Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionCode {
    type Err = Error;

    /// Parses a code typed by a user
    ///
    /// # Errors
    ///
    /// Returns an error if the code is empty, has the wrong length or
    /// contains anything but ASCII letters and digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();

        if code.is_empty() {
            return Err(Error::Empty);
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidCharacter);
        }
        if code.len() < MIN_LENGTH {
            return Err(Error::TooShort);
        }
        if code.len() > MAX_LENGTH {
            return Err(Error::TooLong);
        }

        Ok(Self(code))
    }
}
