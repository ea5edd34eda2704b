use thiserror::Error;
use unitas_core_types::{RequestId, ScopeId};

use crate::model::IdentityKey;

/// Result type alias using UnitasError
pub type Result<T> = std::result::Result<T, UnitasError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that tests, logs, and callers can
/// match on without depending on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Unit-of-Work taxonomy
    Conflict,
    InvalidState,
    EntityNotFound,
    CommitOrder,
    OptimisticLock,
    ConstraintViolation,

    // Descriptor / configuration
    Mapping,
    Configuration,

    // Integration
    Persistence,
    Serialization,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Conflict => "ERR_CONFLICT",
            ExErrorKind::InvalidState => "ERR_INVALID_STATE",
            ExErrorKind::EntityNotFound => "ERR_ENTITY_NOT_FOUND",
            ExErrorKind::CommitOrder => "ERR_COMMIT_ORDER",
            ExErrorKind::OptimisticLock => "ERR_OPTIMISTIC_LOCK",
            ExErrorKind::ConstraintViolation => "ERR_CONSTRAINT_VIOLATION",
            ExErrorKind::Mapping => "ERR_MAPPING",
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether a caller may retry the same flush after reconciling state
    ///
    /// Lock and constraint failures leave the failed entity scheduled, so a
    /// corrected retry is meaningful. Everything else needs a code change or
    /// a fresh scope.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExErrorKind::OptimisticLock | ExErrorKind::ConstraintViolation
        )
    }
}

/// Canonical structured error type
///
/// Carries the classification plus context for logging and external
/// reporting. Built from a [`UnitasError`] at operation boundaries.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_type: Option<String>,
    entity_key: Option<String>,
    scope_id: Option<ScopeId>,
    request_id: Option<RequestId>,
    message: String,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_type: None,
            entity_key: None,
            scope_id: None,
            request_id: None,
            message: String::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity type context
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Add entity key context
    pub fn with_entity_key(mut self, key: impl Into<String>) -> Self {
        self.entity_key = Some(key.into());
        self
    }

    /// Add scope context
    pub fn with_scope_id(mut self, scope_id: ScopeId) -> Self {
        self.scope_id = Some(scope_id);
        self
    }

    /// Add request context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    pub fn entity_key(&self) -> Option<&str> {
        self.entity_key.as_deref()
    }

    pub fn scope_id(&self) -> Option<&ScopeId> {
        self.scope_id.as_ref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let (Some(ty), Some(key)) = (&self.entity_type, &self.entity_key) {
            write!(f, " (entity: {}#{})", ty, key)?;
        }
        if let Some(scope_id) = &self.scope_id {
            write!(f, " (scope_id: {})", scope_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========

/// Error taxonomy for Unit-of-Work operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitasError {
    // ===== Identity =====
    /// A different live instance is already registered under this key
    #[error("Identity conflict: another instance is already registered as {key}")]
    Conflict { key: IdentityKey },

    /// The requested lifecycle transition is not legal from the current state
    #[error("Cannot {op} entity {entity} in state {state}: {reason}")]
    InvalidState {
        op: String,
        entity: String,
        state: String,
        reason: String,
    },

    /// No row exists for the key (proxy initialisation, find, refresh)
    #[error("Entity not found: {key}")]
    EntityNotFound { key: IdentityKey },

    // ===== Commit =====
    /// New entities reference each other through non-nullable foreign keys
    #[error("Cannot order commit: non-nullable foreign-key cycle through {entities:?}")]
    CommitOrder { entities: Vec<String> },

    /// Version check failed during update or delete
    #[error("Optimistic lock failure on {key}: expected version {expected}")]
    OptimisticLock { key: IdentityKey, expected: String },

    /// Opaque rejection from the backend, passed through unchanged
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    // ===== Descriptor =====
    /// The metadata descriptor does not describe what was asked for
    #[error("Mapping error: {message}")]
    Mapping { message: String },

    /// Invalid Unit-of-Work configuration
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    // ===== Integration =====
    /// Any other backend failure
    #[error("Backend error in {op}: {message}")]
    Backend { op: String, message: String },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl UnitasError {
    /// Shorthand for a mapping error
    pub fn mapping(message: impl Into<String>) -> Self {
        UnitasError::Mapping {
            message: message.into(),
        }
    }

    /// Shorthand for a backend error
    pub fn backend(op: impl Into<String>, message: impl Into<String>) -> Self {
        UnitasError::Backend {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Classification of this error
    pub fn kind(&self) -> ExErrorKind {
        match self {
            UnitasError::Conflict { .. } => ExErrorKind::Conflict,
            UnitasError::InvalidState { .. } => ExErrorKind::InvalidState,
            UnitasError::EntityNotFound { .. } => ExErrorKind::EntityNotFound,
            UnitasError::CommitOrder { .. } => ExErrorKind::CommitOrder,
            UnitasError::OptimisticLock { .. } => ExErrorKind::OptimisticLock,
            UnitasError::ConstraintViolation { .. } => ExErrorKind::ConstraintViolation,
            UnitasError::Mapping { .. } => ExErrorKind::Mapping,
            UnitasError::Configuration { .. } => ExErrorKind::Configuration,
            UnitasError::Backend { .. } => ExErrorKind::Persistence,
            UnitasError::Serialization { .. } => ExErrorKind::Serialization,
        }
    }
}

/// Conversion from UnitasError to the structured ExError
impl From<&UnitasError> for ExError {
    fn from(err: &UnitasError) -> Self {
        let base = ExError::new(err.kind()).with_message(err.to_string());
        match err {
            UnitasError::Conflict { key }
            | UnitasError::EntityNotFound { key }
            | UnitasError::OptimisticLock { key, .. } => base
                .with_entity_type(key.entity_type().as_str())
                .with_entity_key(key.key().to_string()),
            UnitasError::InvalidState { op, .. } => base.with_op(op.clone()),
            UnitasError::Backend { op, .. } => base.with_op(op.clone()),
            _ => base,
        }
    }
}

impl From<UnitasError> for ExError {
    fn from(err: UnitasError) -> Self {
        ExError::from(&err)
    }
}

/// Conversion from serde_json::Error to UnitasError
impl From<serde_json::Error> for UnitasError {
    fn from(err: serde_json::Error) -> Self {
        UnitasError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, PrimaryKey};

    fn key() -> IdentityKey {
        IdentityKey::new(EntityType::new("Product"), PrimaryKey::from(5))
    }

    #[test]
    fn test_kind_codes_are_unique() {
        let kinds = [
            ExErrorKind::Conflict,
            ExErrorKind::InvalidState,
            ExErrorKind::EntityNotFound,
            ExErrorKind::CommitOrder,
            ExErrorKind::OptimisticLock,
            ExErrorKind::ConstraintViolation,
            ExErrorKind::Mapping,
            ExErrorKind::Configuration,
            ExErrorKind::Persistence,
            ExErrorKind::Serialization,
            ExErrorKind::Internal,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_not_found_carries_entity_context() {
        let ex: ExError = UnitasError::EntityNotFound { key: key() }.into();
        assert_eq!(ex.kind(), ExErrorKind::EntityNotFound);
        assert_eq!(ex.code(), "ERR_ENTITY_NOT_FOUND");
        assert_eq!(ex.entity_type(), Some("Product"));
        assert_eq!(ex.entity_key(), Some("5"));
    }

    #[test]
    fn test_backend_maps_to_persistence() {
        let err = UnitasError::backend("execute_insert", "disk full");
        assert_eq!(err.kind(), ExErrorKind::Persistence);
        let ex = ExError::from(&err);
        assert_eq!(ex.op(), Some("execute_insert"));
        assert!(ex.message().contains("disk full"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ExErrorKind::OptimisticLock.is_retryable());
        assert!(ExErrorKind::ConstraintViolation.is_retryable());
        assert!(!ExErrorKind::CommitOrder.is_retryable());
        assert!(!ExErrorKind::InvalidState.is_retryable());
    }

    #[test]
    fn test_display_includes_code_and_entity() {
        let ex = ExError::new(ExErrorKind::Conflict)
            .with_op("persist")
            .with_entity_type("Product")
            .with_entity_key("5")
            .with_message("already registered");
        let text = ex.to_string();
        assert!(text.starts_with("[ERR_CONFLICT]"));
        assert!(text.contains("persist"));
        assert!(text.contains("Product#5"));
    }
}
