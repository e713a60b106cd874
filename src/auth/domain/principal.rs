//! Authenticated caller identity.

use crate::task::domain::{OwnerId, TaskDomainError};
use std::fmt;

/// Identity of a caller as vouched for by the auth gate.
///
/// A principal only exists once validation succeeded; handlers receive it as
/// an argument rather than reading it from request state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(OwnerId);

impl Principal {
    /// Creates a principal from a validated user identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyOwnerId`] when the identifier is blank.
    pub fn new(user_id: impl Into<String>) -> Result<Self, TaskDomainError> {
        OwnerId::new(user_id).map(Self)
    }

    /// Returns the owner identifier tasks are recorded under.
    #[must_use]
    pub const fn owner_id(&self) -> &OwnerId {
        &self.0
    }
}

impl From<OwnerId> for Principal {
    fn from(owner_id: OwnerId) -> Self {
        Self(owner_id)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
