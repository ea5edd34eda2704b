//! Core types shared across unitas facilities
//!
//! This crate provides foundational types used by the error handling,
//! logging, and Unit-of-Work layers:
//!
//! - **Correlation types**: ScopeId, RequestId, TraceId, RequestContext
//! - **Sensitive data**: Sensitive<T> marker for automatic redaction
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{RequestContext, RequestId, ScopeId, TraceId};
pub use sensitive::Sensitive;
