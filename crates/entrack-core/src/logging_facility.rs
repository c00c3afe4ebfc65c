//! Structured logging for the tracking core
//!
//! - One initialization point, `init(profile)`
//! - Boundary macros `log_op_start!`, `log_op_end!`, `log_op_error!` used by
//!   the public operations of a tracking context
//! - A capture layer for asserting on emitted events in tests
//!
//! Lower layers (identity maps, fixup, cascades, value generation) log with
//! plain `tracing::debug!`/`tracing::trace!` and never emit start/end pairs.
//!
//! ```rust
//! use entrack_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
