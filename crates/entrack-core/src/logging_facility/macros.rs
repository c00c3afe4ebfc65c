//! Boundary logging macros
//!
//! Each public tracking-context operation emits exactly one `start` and one
//! `end` or `end_error` event, all carrying `component`, `op` and `event`.

/// Log the start of an operation
///
/// ```
/// # use entrack_core::log_op_start;
/// log_op_start!("detect_changes");
/// log_op_start!("set_entity_state", instance = "#4");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = entrack_core_types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = entrack_core_types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// ```
/// # use entrack_core::log_op_end;
/// log_op_end!("save_changes", duration_ms = 3, entry_count = 2);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = entrack_core_types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = entrack_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log a failed operation with its error kind and stable code
///
/// Accepts anything convertible into `ExError`; its request and trace ids,
/// when set, are logged as `request_id` and `trace_id`.
///
/// ```
/// # use entrack_core::log_op_error;
/// # use entrack_core::errors::TrackerError;
/// let err = TrackerError::Cancelled { op: "save_changes".to_string() };
/// log_op_error!("save_changes", err, duration_ms = 1);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = entrack_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            request_id = ex_err.request_id().map(entrack_core_types::RequestId::as_str),
            trace_id = ex_err.trace_id().map(entrack_core_types::TraceId::as_str),
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = entrack_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            request_id = ex_err.request_id().map(entrack_core_types::RequestId::as_str),
            trace_id = ex_err.trace_id().map(entrack_core_types::TraceId::as_str),
            $($field)*
        );
    }};
}
