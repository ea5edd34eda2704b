use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SCOPE_TAG: AtomicU32 = AtomicU32::new(1);

/// Allocate the tag that marks handles issued by one scope
pub(crate) fn next_scope_tag() -> u32 {
    NEXT_SCOPE_TAG.fetch_add(1, Ordering::Relaxed)
}

/// Reference to one entity instance inside a Unit-of-Work scope
///
/// Handles are the object identity of the engine: two handles compare equal
/// exactly when they denote the same live instance. A handle is only
/// meaningful to the scope that issued it; other scopes reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle {
    pub(crate) scope: u32,
    pub(crate) slot: u32,
}

impl EntityHandle {
    pub(crate) fn new(scope: u32, slot: usize) -> Self {
        Self {
            scope,
            slot: slot as u32,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.slot as usize
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}", self.scope, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_tags_are_distinct() {
        assert_ne!(next_scope_tag(), next_scope_tag());
    }

    #[test]
    fn test_handle_equality_is_slot_and_scope() {
        let a = EntityHandle::new(1, 3);
        assert_eq!(a, EntityHandle::new(1, 3));
        assert_ne!(a, EntityHandle::new(2, 3));
        assert_eq!(a.index(), 3);
        assert_eq!(a.to_string(), "@1.3");
    }
}
