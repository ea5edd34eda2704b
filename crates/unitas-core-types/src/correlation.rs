//! Correlation identifiers
//!
//! Every Unit-of-Work scope carries a `ScopeId` that is attached to each log
//! event it emits. Callers that run one scope per request can attach their
//! own `RequestId`/`TraceId` through a `RequestContext`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! correlation_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, time-ordered identifier (UUIDv7)
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Wrap an identifier received from elsewhere
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the string representation
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

correlation_id!(
    /// Identifier of one Unit-of-Work scope
    ScopeId
);

correlation_id!(
    /// Identifier of the logical request a scope serves
    RequestId
);

correlation_id!(
    /// Trace identifier propagated from an outer tracing system
    TraceId
);

/// Correlation context a scope is opened with
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub trace_id: Option<TraceId>,
}

impl RequestContext {
    /// Create a context with a fresh RequestId
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context for an existing RequestId
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            trace_id: None,
        }
    }

    /// Attach a TraceId
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_ids_are_unique() {
        let a = ScopeId::new();
        let b = ScopeId::new();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_display_matches_as_str() {
        let id = RequestId::new();
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn test_from_string_round_trip() {
        let id = TraceId::from_string("trace-1");
        assert_eq!(id.as_str(), "trace-1");
    }

    #[test]
    fn test_context_with_trace() {
        let trace = TraceId::new();
        let ctx = RequestContext::new().with_trace_id(trace.clone());
        assert_eq!(ctx.trace_id, Some(trace));
    }

    #[test]
    fn test_serde_round_trip() {
        let id = ScopeId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ScopeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
