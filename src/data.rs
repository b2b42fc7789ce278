//! Values and rows: the data that flows along dataflow edges.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A change in count.
pub type Diff = isize;

/// A scalar value in a row.
///
/// Equality, ordering, and hashing are structural, and are implemented
/// explicitly rather than derived: `Number` compares by the total order on
/// floats and hashes by bit pattern, so a `Value` is usable as a map key
/// without the usual floating-point caveats.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    /// An uninterpreted byte string.
    String(Vec<u8>),
    /// A double-precision number.
    Number(f64),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::String(_), Value::Number(_)) => Ordering::Less,
            (Value::Number(_), Value::String(_)) => Ordering::Greater,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::String(bytes) => {
                0u8.hash(state);
                bytes.hash(state);
            }
            Value::Number(number) => {
                1u8.hash(state);
                number.to_bits().hash(state);
            }
        }
    }
}

impl From<&str> for Value {
    fn from(string: &str) -> Self {
        Value::String(string.as_bytes().to_vec())
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Value::Number(number)
    }
}

/// An ordered sequence of values.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Creates a row from its values.
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    /// The values of the row, in order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The first `key_columns` values, used as a join key.
    pub fn key(&self, key_columns: usize) -> &[Value] {
        &self.values[..key_columns]
    }

    /// A new row containing `self`'s values followed by `other`'s.
    pub fn concat(&self, other: &Row) -> Row {
        let mut values = Vec::with_capacity(self.values.len() + other.values.len());
        values.extend(self.values.iter().cloned());
        values.extend(other.values.iter().cloned());
        Row { values }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// A composite trait for types usable as data in the engine.
pub trait Data: Clone + Eq + Ord + Hash + Debug + 'static {
    /// Extracts a `u64` suitable for distributing and sorting the data.
    ///
    /// The default implementation uses `FnvHasher`.
    #[inline]
    fn hashed(&self) -> u64 {
        let mut h: fnv::FnvHasher = Default::default();
        self.hash(&mut h);
        h.finish()
    }
}

impl<T: Clone + Eq + Ord + Hash + Debug + 'static> Data for T {}
