//! Student nickname validation
//!
//! Nicknames key the leaderboard, so they are cleaned once on the way in:
//! whitespace is trimmed, the length is bounded and inappropriate names are
//! refused.

use rustrict::CensorStr;
use serde::Serialize;
use thiserror::Error;

use crate::constants::nickname::{MAX_LENGTH, MIN_LENGTH};

/// Errors that can occur during nickname validation
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The nickname is empty or contains only whitespace
    #[error("nickname cannot be empty")]
    Empty,
    /// The nickname is shorter than the minimum
    #[error("nickname is too short")]
    TooShort,
    /// The nickname exceeds the maximum allowed length
    #[error("nickname is too long")]
    TooLong,
    /// The nickname contains inappropriate content
    #[error("nickname is inappropriate")]
    Sinful,
}

/// Cleans and validates a nickname
///
/// # Arguments
///
/// * `name` - The requested nickname (will be trimmed of whitespace)
///
/// # Returns
///
/// The cleaned nickname
///
/// # Errors
///
/// * `Error::Empty` - Nickname is empty after trimming whitespace
/// * `Error::TooShort` - Nickname has fewer than 2 characters
/// * `Error::TooLong` - Nickname has more than 50 characters
/// * `Error::Sinful` - Nickname contains inappropriate content
pub fn validate_nickname(name: &str) -> Result<String, Error> {
    let name = rustrict::trim_whitespace(name);
    let length = name.chars().count();

    if length == 0 {
        return Err(Error::Empty);
    }
    if length < MIN_LENGTH {
        return Err(Error::TooShort);
    }
    if length > MAX_LENGTH {
        return Err(Error::TooLong);
    }
    if name.is_inappropriate() {
        return Err(Error::Sinful);
    }

    Ok(name.to_owned())
}
