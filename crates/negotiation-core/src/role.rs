use std::cmp::Ordering;
use std::fmt;

use crate::error::{SessionError, SessionResult};

/// Glare-breaking role. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unassigned,
    /// Yields: rolls back its own pending offer when a remote offer collides.
    Polite,
    /// Wins: ignores remote offers that collide with its own.
    Impolite,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Unassigned => "unassigned",
            Role::Polite => "polite",
            Role::Impolite => "impolite",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers both parties agree on before any signaling message is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Participants {
    pub local: String,
    pub remote: String,
}

impl Participants {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// The participant whose identifier sorts lower (byte-wise) is impolite.
    /// The remote side evaluates the same comparison with the arguments
    /// swapped, so the two roles always differ.
    pub fn role(&self) -> SessionResult<Role> {
        match self.local.as_bytes().cmp(self.remote.as_bytes()) {
            Ordering::Less => Ok(Role::Impolite),
            Ordering::Greater => Ok(Role::Polite),
            Ordering::Equal => Err(SessionError::RoleConflict {
                local: self.local.clone(),
                remote: self.remote.clone(),
            }),
        }
    }

    pub fn swapped(&self) -> Self {
        Self::new(self.remote.clone(), self.local.clone())
    }
}
