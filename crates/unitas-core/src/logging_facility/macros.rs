//! Operation boundary macros
//!
//! Field names come from `unitas_core_types::schema` so that the capture
//! layer and log consumers agree on them.

/// Emit the `start` event of an operation
///
/// ```
/// # use unitas_core::log_op_start;
/// log_op_start!("flush");
/// log_op_start!("persist", scope_id = "s-1");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::unitas_core_types::schema::EVENT_START,
        )
    };
    ($op:expr, $($field:tt)*) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::unitas_core_types::schema::EVENT_START,
            $($field)*
        )
    };
}

/// Emit the `end` event of an operation that succeeded
///
/// ```
/// # use unitas_core::log_op_end;
/// log_op_end!("flush", duration_ms = 3);
/// log_op_end!("flush", duration_ms = 3, inserted = 2);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::unitas_core_types::schema::EVENT_END,
            duration_ms = $duration,
        )
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::unitas_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        )
    };
}

/// Emit the `end_error` event of an operation that failed
///
/// `$err` is anything convertible into [`ExError`](crate::errors::ExError),
/// typically `&UnitasError`.
///
/// ```
/// # use unitas_core::{log_op_error, errors::UnitasError};
/// let err = UnitasError::mapping("unknown entity type Widget");
/// log_op_error!("find", &err, duration_ms = 1);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        ::tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::unitas_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            message = ex_err.message(),
        )
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        ::tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::unitas_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            message = ex_err.message(),
            $($field)*
        )
    }};
}
