//! Session-scoped context
//!
//! Nothing in the crate is global: a [`SessionContext`] carries the code,
//! the role, the configuration and the [`Bus`] of one session and is handed
//! to whatever runs that session. A student's [`StudentIdentity`] lives in
//! memory only and is dropped when the student leaves.

use thiserror::Error;

use crate::{
    bus::Bus,
    config::SessionConfig,
    names,
    session::Role,
    session_code::{self, SessionCode},
};

/// Everything one session is run with
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Session the context belongs to
    pub code: SessionCode,
    /// Side this client is on
    pub role: Role,
    /// Timings and release mode
    pub config: SessionConfig,
    /// Bus shared by everything observing the session
    pub bus: Bus,
}

impl SessionContext {
    /// Creates a context with the fallback configuration and a fresh bus
    pub fn new(code: SessionCode, role: Role) -> Self {
        Self {
            code,
            role,
            config: SessionConfig::default(),
            bus: Bus::new(),
        }
    }

    /// Replaces the configuration
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the bus, e.g. to share it with another session on the same process
    #[must_use]
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }
}

/// Errors joining a session as a student
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The code cannot name a session
    #[error(transparent)]
    Code(#[from] session_code::Error),
    /// The nickname was refused
    #[error(transparent)]
    Nickname(#[from] names::Error),
}

/// Who a student is in the session they joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentIdentity {
    code: SessionCode,
    nickname: String,
}

impl StudentIdentity {
    /// Validates what a student typed on the join screen
    ///
    /// # Errors
    ///
    /// `Error::Code` or `Error::Nickname` when either input is refused
    pub fn join(code: &str, nickname: &str) -> Result<Self, Error> {
        Ok(Self {
            code: code.parse()?,
            nickname: names::validate_nickname(nickname)?,
        })
    }

    /// Session joined
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    /// Cleaned nickname
    pub fn nickname(&self) -> &str {
        &self.nickname
    }
}
