//! Types shared between the tracking core and anything that logs or reports on it
//!
//! - **Correlation**: `RequestId`, `TraceId`, `RequestContext` attached to save attempts
//! - **Sensitive data**: `Sensitive<T>` keeps key values out of logs and messages
//! - **Schema constants**: canonical structured-logging field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{RequestContext, RequestId, TraceId};
pub use sensitive::Sensitive;
