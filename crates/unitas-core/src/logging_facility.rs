//! Structured logging for Unit-of-Work operations
//!
//! Every public scope operation emits a `start` event and exactly one of
//! `end` / `end_error`, all carrying `component`, `op` and `scope_id`. The
//! macros below are the only place these events are shaped; the backends
//! use them too.
//!
//! ```rust
//! use unitas_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, init_with_filter, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
