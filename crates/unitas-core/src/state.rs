//! Lifecycle states and legal transitions

use std::fmt;

use crate::errors::UnitasError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Created by the application, not tracked
    New,
    /// Tracked; has, or will get at flush, an identity key
    Managed,
    /// Scheduled for deletion, still tracked until flush
    Removed,
    /// Was managed, now disconnected from the scope
    Detached,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::New => "NEW",
            EntityState::Managed => "MANAGED",
            EntityState::Removed => "REMOVED",
            EntityState::Detached => "DETACHED",
        };
        f.write_str(name)
    }
}

/// Outcome of applying an operation to a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given state
    To(EntityState),
    /// Nothing to do for this instance
    Stay,
}

impl EntityState {
    pub fn is_tracked(&self) -> bool {
        matches!(self, EntityState::Managed | EntityState::Removed)
    }

    /// `persist`: NEW and REMOVED become MANAGED; DETACHED is rejected
    pub fn on_persist(self) -> Result<Transition, &'static str> {
        match self {
            EntityState::New | EntityState::Removed => Ok(Transition::To(EntityState::Managed)),
            EntityState::Managed => Ok(Transition::Stay),
            EntityState::Detached => Err("detached instances must be reattached with merge"),
        }
    }

    /// `remove`: MANAGED becomes REMOVED, NEW is dropped straight to DETACHED
    pub fn on_remove(self) -> Result<Transition, &'static str> {
        match self {
            EntityState::Managed => Ok(Transition::To(EntityState::Removed)),
            EntityState::New => Ok(Transition::To(EntityState::Detached)),
            EntityState::Removed => Ok(Transition::Stay),
            EntityState::Detached => Err("detached instances cannot be removed"),
        }
    }

    /// `detach`: tracked states become DETACHED, others are untouched
    pub fn on_detach(self) -> Transition {
        if self.is_tracked() {
            Transition::To(EntityState::Detached)
        } else {
            Transition::Stay
        }
    }

    /// `refresh` requires a tracked, non-removed instance
    pub fn on_refresh(self) -> Result<(), &'static str> {
        match self {
            EntityState::Managed => Ok(()),
            EntityState::Removed => Err("instance is scheduled for removal"),
            EntityState::New => Err("instance has never been persisted"),
            EntityState::Detached => Err("instance is not managed by this scope"),
        }
    }
}

/// Build the `InvalidState` error for a rejected transition
pub(crate) fn invalid_state(
    op: &str,
    entity: impl fmt::Display,
    state: EntityState,
    reason: impl Into<String>,
) -> UnitasError {
    UnitasError::InvalidState {
        op: op.to_string(),
        entity: entity.to_string(),
        state: state.to_string(),
        reason: reason.into(),
    }
}
