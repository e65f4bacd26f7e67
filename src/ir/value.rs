//! Dataflow values and their arena handles.

use super::node::NodeRef;
use super::tensor::DType;

/// Index of a value in the model arena.
///
/// Index 0 is reserved for the shared null sentinel, which represents an
/// absent optional input or output slot and never receives a value id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(pub(crate) u32);

impl ValueRef {
    /// The shared "absent optional slot" sentinel.
    pub const NULL: ValueRef = ValueRef(0);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

/// Which of the three disjoint graph sets a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Staged into the program with an `In` instruction at first use.
    Input,
    /// Eligible for `Free` at its last use.
    Temp,
    /// Finalized with `Out` after the root graph is walked.
    Output,
    /// Absent optional slot; never receives an id.
    Null,
}

/// A typed dataflow edge.
#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    pub name: String,
    pub dtype: Option<DType>,
    pub shape: Option<Vec<i64>>,
    /// Consuming nodes, one entry per input slot that reads this value. A
    /// node reading the same value twice therefore appears twice.
    pub users: Vec<NodeRef>,
}

impl Value {
    pub(crate) fn new(kind: ValueKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            dtype: None,
            shape: None,
            users: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.kind == ValueKind::Null
    }

    /// Size of this value in bytes, or 0 when the dtype or shape is unknown.
    /// Informational only; used by the value-name dump.
    pub fn nbytes(&self) -> i64 {
        match (&self.dtype, &self.shape) {
            (Some(dtype), Some(shape)) => {
                shape.iter().product::<i64>() * dtype.size() as i64
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nbytes_known_type_and_shape() {
        let mut value = Value::new(ValueKind::Temp, "t");
        value.dtype = Some(DType::F32);
        value.shape = Some(vec![2, 3]);
        assert_eq!(value.nbytes(), 24);
    }

    #[test]
    fn nbytes_unknown_shape_is_zero() {
        let mut value = Value::new(ValueKind::Temp, "t");
        value.dtype = Some(DType::F64);
        assert_eq!(value.nbytes(), 0);
    }

    #[test]
    fn null_sentinel() {
        assert!(ValueRef::NULL.is_null());
        assert!(!ValueRef(3).is_null());
    }
}
