//! Element types and constant tensor payloads.

use serde::{Deserialize, Serialize};

/// Element type of a value or constant tensor.
///
/// The wire codes follow the ONNX `TensorProto.DataType` numbering so the
/// downstream VM can reuse the conventional mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Stable integer code carried in `Cast` and `*Constant` instructions.
    pub fn code(&self) -> i64 {
        match self {
            DType::F32 => 1,
            DType::I8 => 3,
            DType::I16 => 5,
            DType::I32 => 6,
            DType::I64 => 7,
            DType::Bool => 9,
            DType::F64 => 11,
        }
    }

    /// Element width in bytes.
    pub fn size(&self) -> usize {
        match self {
            DType::Bool | DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

/// Constant element payload, already widened by the tensor layer.
///
/// The emitter never dispatches on element width; it only classifies float
/// vs integer and flattens the values into the instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Floats(Vec<f64>),
    Ints(Vec<i64>),
}

impl Data {
    pub fn len(&self) -> usize {
        match self {
            Data::Floats(v) => v.len(),
            Data::Ints(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An immutable tensor attached to a `Constant` node.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    pub dtype: DType,
    pub shape: Vec<i64>,
    pub data: Data,
}

impl TensorData {
    /// Builds a constant payload, validating that the payload class matches
    /// the dtype class and that the element count matches the shape.
    pub fn new(dtype: DType, shape: Vec<i64>, data: Data) -> Self {
        match (&data, dtype.is_float()) {
            (Data::Floats(_), false) => {
                panic!("constant: float payload for integer dtype {dtype:?}")
            }
            (Data::Ints(_), true) => {
                panic!("constant: integer payload for float dtype {dtype:?}")
            }
            _ => {}
        }
        let expected: i64 = shape.iter().product();
        if expected != data.len() as i64 {
            panic!(
                "constant: shape {:?} implies {} elements, payload has {}",
                shape,
                expected,
                data.len()
            );
        }
        Self { dtype, shape, data }
    }

    pub fn scalar_f64(value: f64) -> Self {
        Self::new(DType::F32, vec![], Data::Floats(vec![value]))
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::new(DType::I64, vec![], Data::Ints(vec![value]))
    }

    /// True for rank-0 tensors, which lower to scalar constants.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }
}
