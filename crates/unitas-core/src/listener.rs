//! Lifecycle callbacks
//!
//! Listeners observe instances at well-defined points. The `pre_*` hooks
//! may veto the operation by returning an error, which aborts it before any
//! state change (persist, remove) or before any write (update at flush).

use crate::errors::Result;
use crate::model::{EntityHandle, EntityType, PrimaryKey, Record};

/// What a listener sees of an instance
#[derive(Debug, Clone, Copy)]
pub struct LifecycleEvent<'a> {
    pub handle: EntityHandle,
    pub entity_type: &'a EntityType,
    pub key: Option<&'a PrimaryKey>,
    pub record: &'a Record,
}

pub trait LifecycleListener: Send + Sync {
    /// Before a NEW instance becomes MANAGED
    ///
    /// # Errors
    ///
    /// Any error aborts the persist.
    fn pre_persist(&self, _event: &LifecycleEvent<'_>) -> Result<()> {
        Ok(())
    }

    /// Before an UPDATE is planned at flush
    ///
    /// # Errors
    ///
    /// Any error aborts the flush before the first write.
    fn pre_update(&self, _event: &LifecycleEvent<'_>) -> Result<()> {
        Ok(())
    }

    /// Before a MANAGED instance becomes REMOVED
    ///
    /// # Errors
    ///
    /// Any error aborts the remove.
    fn pre_remove(&self, _event: &LifecycleEvent<'_>) -> Result<()> {
        Ok(())
    }

    /// After a row has been loaded into an instance
    fn post_load(&self, _event: &LifecycleEvent<'_>) {}
}
