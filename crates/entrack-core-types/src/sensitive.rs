//! Redaction wrapper for values that must not leak into logs
//!
//! Key values identify rows in the backing store. Unless the tracking context
//! was configured with sensitive-data logging, they are rendered as
//! `***REDACTED***` in log fields and error messages.

use std::fmt;

const REDACTED: &str = "***REDACTED***";

/// Wrapper that redacts itself in `Debug` and `Display`
///
/// # Example
///
/// ```
/// use entrack_core_types::Sensitive;
///
/// let key = Sensitive::new("{Id: 42}");
/// assert_eq!(format!("{}", key), "***REDACTED***");
/// assert_eq!(key.render(true), "{Id: 42}");
/// assert_eq!(key.expose(), &"{Id: 42}");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Access the wrapped value
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: fmt::Display> Sensitive<T> {
    /// Render the value, or the redaction marker when `reveal` is false
    pub fn render(&self, reveal: bool) -> String {
        if reveal {
            self.0.to_string()
        } else {
            REDACTED.to_string()
        }
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}
