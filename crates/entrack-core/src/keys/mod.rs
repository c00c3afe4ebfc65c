//! Comparable key values and the factories that extract them

mod factory;

pub use factory::KeyValueFactory;

use std::fmt;

use crate::model::Value;

/// A principal key or foreign-key value
///
/// Equality and hashing are element-wise and by content, so a composite
/// `{1, 'A'}` built from a fresh string matches one built earlier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Simple(Value),
    Composite(Box<[Value]>),
}

impl KeyValue {
    pub fn values(&self) -> &[Value] {
        match self {
            KeyValue::Simple(v) => std::slice::from_ref(v),
            KeyValue::Composite(values) => values,
        }
    }

    /// Build a key from component values; `None` if any component is null
    pub fn try_from_values(values: Vec<Value>) -> Option<Self> {
        if values.is_empty() || values.iter().any(Value::is_null) {
            return None;
        }
        if values.len() == 1 {
            values.into_iter().next().map(KeyValue::Simple)
        } else {
            Some(KeyValue::Composite(values.into_boxed_slice()))
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Simple(v) => write!(f, "{{{}}}", v),
            KeyValue::Composite(values) => {
                f.write_str("{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Specialization of a key-value factory, fixed at model finalization
///
/// Nullability of either side does not change extraction: a single scalar
/// that reads null yields no key whether or not its property is nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// Single scalar, nullable or not
    Simple,
    /// Ordered array of scalars
    Composite,
}
