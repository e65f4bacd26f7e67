//! The closed operator enumeration.
//!
//! Each variant carries exactly the attributes that operator needs, so a
//! single exhaustive match in the emitter replaces per-op attribute lookup
//! and most attribute-presence checks.

use super::graph::Graph;
use super::tensor::{DType, TensorData};

/// A graph operator together with its attributes.
#[derive(Debug, Clone)]
pub enum Op {
    // Pure unary elementwise.
    Neg,
    Reciprocal,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
    Relu,
    Floor,
    Ceil,
    Sigmoid,
    Not,
    Identity,

    // Pure binary elementwise.
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Equal,
    Greater,

    // Gradient binaries.
    ReluGrad,
    MaxPoolGrad,
    AveragePoolGrad,
    SelectItem,

    /// Lowered as `Identity`; the optional mask output is not produced.
    Dropout,

    // Activations with scalar attributes.
    Selu {
        alpha: f64,
        gamma: f64,
    },
    LeakyRelu {
        alpha: f64,
    },
    Elu {
        alpha: f64,
    },

    // Convolutions. Dilation other than 1 is rejected at lowering.
    Conv {
        dilations: Vec<i64>,
        strides: Vec<i64>,
        pads: Vec<i64>,
    },
    ConvTranspose {
        dilations: Vec<i64>,
        strides: Vec<i64>,
        pads: Vec<i64>,
        output_shape: Vec<i64>,
    },
    /// `ConvTranspose` whose output shape arrives as a runtime tensor.
    ConvTransposeWithDynamicOutputShape {
        strides: Vec<i64>,
        pads: Vec<i64>,
    },
    ConvGradWeight {
        dilations: Vec<i64>,
        strides: Vec<i64>,
        pads: Vec<i64>,
    },

    // Recurrent cells. Custom activations are rejected at lowering.
    Rnn {
        hidden_size: i64,
        direction: String,
        activations: Vec<String>,
        activation_alpha: Vec<f64>,
        activation_beta: Vec<f64>,
    },
    Gru {
        hidden_size: i64,
        linear_before_reset: i64,
        direction: String,
        activations: Vec<String>,
        activation_alpha: Vec<f64>,
        activation_beta: Vec<f64>,
    },
    Lstm {
        hidden_size: i64,
        direction: String,
        activations: Vec<String>,
        activation_alpha: Vec<f64>,
        activation_beta: Vec<f64>,
    },

    // Shape introspection.
    Shape,
    Size,

    // Reshape family.
    Reshape,
    Expand,
    Squeeze {
        axes: Vec<i64>,
    },
    Unsqueeze {
        axes: Vec<i64>,
    },

    // Linear algebra.
    MatMul,
    Gemm {
        alpha: f64,
        beta: f64,
        trans_a: i64,
        trans_b: i64,
    },

    // Normalization.
    BatchNormalization {
        epsilon: f64,
        momentum: f64,
        spatial: i64,
    },
    BatchNormalizationGrad,
    Lrn {
        alpha: f64,
        beta: f64,
        bias: f64,
        size: i64,
    },
    LrnGrad {
        alpha: f64,
        beta: f64,
        bias: f64,
        size: i64,
    },

    /// Only `mode = "constant"` is supported; `pads` is the raw 2N list.
    Pad {
        mode: String,
        pads: Vec<i64>,
        value: f64,
    },

    // Pooling.
    MaxPool {
        kernel_shape: Vec<i64>,
        strides: Vec<i64>,
        pads: Vec<i64>,
    },
    AveragePool {
        kernel_shape: Vec<i64>,
        strides: Vec<i64>,
        pads: Vec<i64>,
        count_include_pad: i64,
    },

    // Softmax family.
    Softmax {
        axis: i64,
    },
    LogSoftmax {
        axis: i64,
    },
    ArgMax {
        axis: i64,
        keepdims: i64,
    },
    Hardmax {
        axis: i64,
    },

    // Reductions.
    ReduceMax {
        axes: Vec<i64>,
        keepdims: i64,
    },
    ReduceSum {
        axes: Vec<i64>,
        keepdims: i64,
    },
    ReduceSumSquare {
        axes: Vec<i64>,
        keepdims: i64,
    },
    ReduceMean {
        axes: Vec<i64>,
        keepdims: i64,
    },
    /// Takes the target shape as a runtime input.
    ReduceSumTo,

    Cast {
        to: DType,
    },

    ConstantFill {
        input_as_shape: bool,
        dtype: i64,
        extra_shape: Vec<i64>,
        shape: Vec<i64>,
        value: f64,
    },

    // Indexing.
    Slice {
        axes: Vec<i64>,
        starts: Vec<i64>,
        ends: Vec<i64>,
    },
    DynamicSlice,
    Gather {
        axis: i64,
    },

    // Joining and splitting.
    Concat {
        axis: i64,
    },
    Split {
        axis: i64,
        split: Vec<i64>,
    },

    /// Variadic elementwise maximum.
    Max,

    Clip {
        max: f64,
        min: f64,
    },
    Transpose {
        perm: Vec<i64>,
    },
    SelectItemGrad,

    /// Owns an attached immutable tensor.
    Constant {
        value: TensorData,
        host: bool,
    },

    /// Carries the nested body graph; lowered to a linear jump sequence.
    Loop {
        body: Graph,
        stack_axis: i64,
    },

    // Sequence operators.
    SequenceCreate,
    SequenceSize,
    SequenceLengths,
    SequenceAppend,
    SequenceLookup,
    SequenceStack {
        axis: i64,
    },
    SequenceSplit {
        axis: i64,
    },
    SequenceUnpad,
    SequencePad {
        length: i64,
        value: f64,
    },

    // Generic container operators over runtime-typed values.
    GenericLen,
    GenericGetItem,
    GenericGetSlice,
    GenericAdd,
}

impl Op {
    /// Operator kind name, used in debug strings and fatal diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Neg => "Neg",
            Op::Reciprocal => "Reciprocal",
            Op::Exp => "Exp",
            Op::Log => "Log",
            Op::Sqrt => "Sqrt",
            Op::Tanh => "Tanh",
            Op::Abs => "Abs",
            Op::Relu => "Relu",
            Op::Floor => "Floor",
            Op::Ceil => "Ceil",
            Op::Sigmoid => "Sigmoid",
            Op::Not => "Not",
            Op::Identity => "Identity",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::Pow => "Pow",
            Op::Equal => "Equal",
            Op::Greater => "Greater",
            Op::ReluGrad => "ReluGrad",
            Op::MaxPoolGrad => "MaxPoolGrad",
            Op::AveragePoolGrad => "AveragePoolGrad",
            Op::SelectItem => "SelectItem",
            Op::Dropout => "Dropout",
            Op::Selu { .. } => "Selu",
            Op::LeakyRelu { .. } => "LeakyRelu",
            Op::Elu { .. } => "Elu",
            Op::Conv { .. } => "Conv",
            Op::ConvTranspose { .. } => "ConvTranspose",
            Op::ConvTransposeWithDynamicOutputShape { .. } => {
                "ConvTransposeWithDynamicOutputShape"
            }
            Op::ConvGradWeight { .. } => "ConvGradWeight",
            Op::Rnn { .. } => "RNN",
            Op::Gru { .. } => "GRU",
            Op::Lstm { .. } => "LSTM",
            Op::Shape => "Shape",
            Op::Size => "Size",
            Op::Reshape => "Reshape",
            Op::Expand => "Expand",
            Op::Squeeze { .. } => "Squeeze",
            Op::Unsqueeze { .. } => "Unsqueeze",
            Op::MatMul => "MatMul",
            Op::Gemm { .. } => "Gemm",
            Op::BatchNormalization { .. } => "BatchNormalization",
            Op::BatchNormalizationGrad => "BatchNormalizationGrad",
            Op::Lrn { .. } => "LRN",
            Op::LrnGrad { .. } => "LRNGrad",
            Op::Pad { .. } => "Pad",
            Op::MaxPool { .. } => "MaxPool",
            Op::AveragePool { .. } => "AveragePool",
            Op::Softmax { .. } => "Softmax",
            Op::LogSoftmax { .. } => "LogSoftmax",
            Op::ArgMax { .. } => "ArgMax",
            Op::Hardmax { .. } => "Hardmax",
            Op::ReduceMax { .. } => "ReduceMax",
            Op::ReduceSum { .. } => "ReduceSum",
            Op::ReduceSumSquare { .. } => "ReduceSumSquare",
            Op::ReduceMean { .. } => "ReduceMean",
            Op::ReduceSumTo => "ReduceSumTo",
            Op::Cast { .. } => "Cast",
            Op::ConstantFill { .. } => "ConstantFill",
            Op::Slice { .. } => "Slice",
            Op::DynamicSlice => "DynamicSlice",
            Op::Gather { .. } => "Gather",
            Op::Concat { .. } => "Concat",
            Op::Split { .. } => "Split",
            Op::Max => "Max",
            Op::Clip { .. } => "Clip",
            Op::Transpose { .. } => "Transpose",
            Op::SelectItemGrad => "SelectItemGrad",
            Op::Constant { .. } => "Constant",
            Op::Loop { .. } => "Loop",
            Op::SequenceCreate => "SequenceCreate",
            Op::SequenceSize => "SequenceSize",
            Op::SequenceLengths => "SequenceLengths",
            Op::SequenceAppend => "SequenceAppend",
            Op::SequenceLookup => "SequenceLookup",
            Op::SequenceStack { .. } => "SequenceStack",
            Op::SequenceSplit { .. } => "SequenceSplit",
            Op::SequenceUnpad => "SequenceUnpad",
            Op::SequencePad { .. } => "SequencePad",
            Op::GenericLen => "GenericLen",
            Op::GenericGetItem => "GenericGetItem",
            Op::GenericGetSlice => "GenericGetSlice",
            Op::GenericAdd => "GenericAdd",
        }
    }
}
