//! Canonical schema constants for structured logging and events
//!
//! These constants keep field keys consistent across the Unit of Work,
//! the backends, and the test capture layer.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_SCOPE_ID: &str = "scope_id";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Entity identifiers
pub const FIELD_ENTITY_TYPE: &str = "entity_type";
pub const FIELD_ENTITY_KEY: &str = "entity_key";
pub const FIELD_TABLE: &str = "table";

// Flush counters
pub const FIELD_INSERTED: &str = "inserted";
pub const FIELD_UPDATED: &str = "updated";
pub const FIELD_DELETED: &str = "deleted";
pub const FIELD_DEFERRED: &str = "deferred";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
