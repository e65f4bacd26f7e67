//! The emitted VM program: typed instructions in an append-only list.
//!
//! The instruction list index is the jump target space; `JmpTrue`/`JmpFalse`
//! carry 0-based indices into it. The whole program derives serde traits so
//! callers can serialize it to whatever wire format they use; the emitter
//! only guarantees a well-formed message.

use core::fmt;

use serde::{Deserialize, Serialize};

/// VM operation codes, one per instruction form the emitter can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Reciprocal,
    Exp,
    Log,
    Sqrt,
    Abs,
    Tanh,
    Sigmoid,
    Floor,
    Ceil,
    Relu,
    ReluGrad,
    Selu,
    LeakyRelu,
    Elu,
    Not,
    Equal,
    Greater,
    ArgMax,
    Hardmax,
    Clip,
    Max,
    ReduceMax,
    ReduceSum,
    ReduceSumSquare,
    ReduceSumTo,
    ReduceMean,
    Conv,
    ConvTranspose,
    ConvTransposeWithDynamicShape,
    ConvGradWeight,
    Shape,
    Size,
    Reshape,
    Expand,
    Squeeze,
    Unsqueeze,
    Slice,
    DynamicSlice,
    Gather,
    SelectItem,
    SelectItemGrad,
    Concat,
    Split,
    Transpose,
    Softmax,
    LogSoftmax,
    Pad,
    MaxPool,
    AveragePool,
    MaxPoolGrad,
    AveragePoolGrad,
    MatMul,
    Gemm,
    Rnn,
    Gru,
    Lstm,
    BatchNormalization,
    BatchNormalizationGrad,
    Lrn,
    LrnGrad,
    Cast,
    IntScalarConstant,
    FloatScalarConstant,
    IntConstant,
    FloatConstant,
    ConstantFill,
    JmpTrue,
    JmpFalse,
    SequenceCreate,
    SequenceAppend,
    SequenceLookup,
    SequenceStack,
    SequencePad,
    SequenceSplit,
    SequenceUnpad,
    SequenceSize,
    SequenceLengths,
    SequenceCopy,
    SequenceMove,
    Identity,
    Free,
    In,
    Out,
    GenericLen,
    GenericGetItem,
    GenericGetSlice,
    GenericAdd,
}

/// A typed operand.
///
/// `Array` and `Sequence` reference values by id; `-1` encodes an absent
/// optional slot. The remaining variants are immediate payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Array(i64),
    ArrayList(Vec<i64>),
    Sequence(i64),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Longs(Vec<i64>),
    Doubles(Vec<f64>),
    Str(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Array(id) => write!(f, "${id}"),
            Operand::ArrayList(ids) => {
                write!(f, "(")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "${id}")?;
                }
                write!(f, ")")
            }
            Operand::Sequence(id) => write!(f, "@{id}"),
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v}"),
            Operand::Ints(v) | Operand::Longs(v) => write!(f, "{v:?}"),
            Operand::Doubles(v) => write!(f, "{v:?}"),
            Operand::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// One VM instruction: opcode, typed input operands, output value ids, and
/// a debug annotation identifying the source node (and loop phase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct Instruction {
    pub opcode: Opcode,
    pub inputs: Vec<Operand>,
    /// Destination value ids; `-1` marks a skipped optional output.
    pub outputs: Vec<i64>,
    pub debug: String,
}

/// The emitted instruction stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

impl Program {
    /// Appends an instruction and returns its index (the jump target).
    pub fn push(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, inst) in self.instructions.iter().enumerate() {
            write!(f, "{pc:4} ")?;
            for (i, output) in inst.outputs.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "${output}")?;
            }
            if !inst.outputs.is_empty() {
                write!(f, " = ")?;
            }
            write!(f, "{:?}(", inst.opcode)?;
            for (i, input) in inst.inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{input}")?;
            }
            writeln!(f, ")  # {}", inst.debug)?;
        }
        Ok(())
    }
}
