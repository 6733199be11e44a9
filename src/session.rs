//! Communication session management
//!
//! This module defines the roles a client can take in a session and the
//! trait for tunneling events between the client and the backend. The tunnel
//! abstraction allows for different communication mechanisms while keeping
//! the bus and the drivers independent of the socket.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::event::Event;

/// Side of a session a client is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub enum Role {
    /// Runs rounds and owns the authoritative answer set
    Lecturer,
    /// Observes rounds and submits answers
    Student,
}

impl Role {
    /// Whether this role owns rounds and scores them
    pub fn is_authoritative(self) -> bool {
        matches!(self, Self::Lecturer)
    }

    /// The role as it appears in socket paths
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lecturer => "lecturer",
            Self::Student => "student",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a role string that names no role
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lecturer" => Ok(Self::Lecturer),
            "student" => Ok(Self::Student),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

/// Trait for sending events through a communication tunnel
///
/// Implementations might use WebSockets or an in-memory channel. Sending is
/// best effort: an event sent while the tunnel is not ready is lost.
pub trait Tunnel {
    /// Sends an event to the other side
    ///
    /// # Arguments
    ///
    /// * `event` - The event to send
    ///
    /// # Returns
    ///
    /// `false` when the tunnel is not open and the event was dropped
    fn send(&self, event: &Event) -> bool;

    /// Whether the tunnel is currently open
    fn is_ready(&self) -> bool;

    /// Closes the communication tunnel
    ///
    /// This method should be called when the session is left or the
    /// identity of the connection changes.
    fn close(self)
    where
        Self: Sized;
}
