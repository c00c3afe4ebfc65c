//! Materialized rows handed over by query execution

use crate::model::Value;

/// Ordinal-indexed values of one row; the ordinal is the property index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueBuffer {
    values: Vec<Value>,
}

impl ValueBuffer {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for ValueBuffer {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for ValueBuffer {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
