//! Per-node lowering: one match arm per operator kind.
//!
//! Arity violations, unsupported attribute values, and malformed constants
//! are compile-time conditions on a well-formed graph; they abort with the
//! operator context rather than producing a wrong program.

use std::sync::Once;

use crate::ir::{Data, Node, TensorData, ValueRef};
use crate::program::{Instruction, Opcode, Operand, Program};

use super::Emitter;

static DROPOUT_MASK_WARNING: Once = Once::new();

/// Canonicalizes a 2N begin/end padding list to the N-element form the VM
/// expects. Begin and end pads must agree; an empty list means no padding.
fn canonical_pads(op: &'static str, pads: &[i64]) -> Vec<i64> {
    if pads.is_empty() {
        return vec![0, 0];
    }
    if pads.len() % 2 != 0 {
        panic!("{op}: pads must list begin and end pads, got {pads:?}");
    }
    let n = pads.len() / 2;
    for i in 0..n {
        if pads[i] != pads[i + n] {
            panic!("{op}: begin and end pads must be equal, got {pads:?}");
        }
    }
    pads[..n].to_vec()
}

/// Strides default to `[1, 1]` when unset.
fn canonical_strides(strides: &[i64]) -> Vec<i64> {
    if strides.is_empty() {
        vec![1, 1]
    } else {
        strides.to_vec()
    }
}

fn check_dilations(op: &'static str, dilations: &[i64]) {
    for &d in dilations {
        if d != 1 {
            panic!("{op}: dilation {d} is not supported");
        }
    }
}

/// Rejects the recurrent-cell attributes the VM has no lowering for.
fn check_recurrent_attrs(
    op: &'static str,
    direction: &str,
    activations: &[String],
    activation_alpha: &[f64],
    activation_beta: &[f64],
) {
    if direction == "reverse" {
        panic!("{op}: direction \"reverse\" is not supported");
    }
    if !activations.is_empty() {
        panic!("{op}: custom activations are not supported");
    }
    if !activation_alpha.is_empty() {
        panic!("{op}: activation_alpha is not supported");
    }
    if !activation_beta.is_empty() {
        panic!("{op}: activation_beta is not supported");
    }
}

/// Numeric direction code carried by the LSTM instruction.
fn direction_code(op: &'static str, direction: &str) -> i64 {
    match direction {
        "" | "forward" => 0,
        "reversed" => 1,
        "bidirectional" => 2,
        other => panic!("{op}: unknown direction {other:?}"),
    }
}

impl Emitter<'_> {
    pub(super) fn emit_node(&mut self, node: &Node, program: &mut Program) {
        use crate::ir::Op;

        match &node.op {
            Op::Neg => self.unary(node, Opcode::Neg, program),
            Op::Reciprocal => self.unary(node, Opcode::Reciprocal, program),
            Op::Exp => self.unary(node, Opcode::Exp, program),
            Op::Log => self.unary(node, Opcode::Log, program),
            Op::Sqrt => self.unary(node, Opcode::Sqrt, program),
            Op::Tanh => self.unary(node, Opcode::Tanh, program),
            Op::Abs => self.unary(node, Opcode::Abs, program),
            Op::Relu => self.unary(node, Opcode::Relu, program),
            Op::Floor => self.unary(node, Opcode::Floor, program),
            Op::Ceil => self.unary(node, Opcode::Ceil, program),
            Op::Sigmoid => self.unary(node, Opcode::Sigmoid, program),
            Op::Not => self.unary(node, Opcode::Not, program),
            Op::Identity => self.unary(node, Opcode::Identity, program),

            Op::Add => self.binary(node, Opcode::Add, program),
            Op::Sub => self.binary(node, Opcode::Sub, program),
            Op::Mul => self.binary(node, Opcode::Mul, program),
            Op::Div => self.binary(node, Opcode::Div, program),
            Op::Pow => self.binary(node, Opcode::Pow, program),
            Op::Equal => self.binary(node, Opcode::Equal, program),
            Op::Greater => self.binary(node, Opcode::Greater, program),
            Op::ReluGrad => self.binary(node, Opcode::ReluGrad, program),
            Op::MaxPoolGrad => self.binary(node, Opcode::MaxPoolGrad, program),
            Op::AveragePoolGrad => self.binary(node, Opcode::AveragePoolGrad, program),
            Op::SelectItem => self.binary(node, Opcode::SelectItem, program),

            Op::Dropout => {
                self.check_inputs(node, 1);
                if node.outputs.is_empty() || node.outputs.len() > 2 {
                    panic!(
                        "Dropout: expected 1 or 2 outputs, got {}",
                        node.outputs.len()
                    );
                }
                if node.outputs.len() == 2 {
                    DROPOUT_MASK_WARNING.call_once(|| {
                        log::warn!("the second output of Dropout is not handled yet");
                    });
                }
                // Dropout is the identity outside of training.
                self.push(
                    node,
                    program,
                    Opcode::Identity,
                    vec![Operand::Array(self.input_id(node, 0))],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Selu { alpha, gamma } => {
                self.check_inputs(node, 1);
                self.push(
                    node,
                    program,
                    Opcode::Selu,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Float(*alpha),
                        Operand::Float(*gamma),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::LeakyRelu { alpha } => {
                self.check_inputs(node, 1);
                self.push(
                    node,
                    program,
                    Opcode::LeakyRelu,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Float(*alpha),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::Elu { alpha } => {
                self.check_inputs(node, 1);
                self.push(
                    node,
                    program,
                    Opcode::Elu,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Float(*alpha),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Conv {
                dilations,
                strides,
                pads,
            } => {
                self.check_input_range(node, 2, 3);
                self.check_outputs(node, 1);
                check_dilations("Conv", dilations);
                self.push(
                    node,
                    program,
                    Opcode::Conv,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.optional_input_id(node, 2)),
                        Operand::Ints(canonical_strides(strides)),
                        Operand::Ints(canonical_pads("Conv", pads)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::ConvTranspose {
                dilations,
                strides,
                pads,
                output_shape,
            } => {
                self.check_input_range(node, 2, 3);
                self.check_outputs(node, 1);
                check_dilations("ConvTranspose", dilations);
                self.push(
                    node,
                    program,
                    Opcode::ConvTranspose,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.optional_input_id(node, 2)),
                        Operand::Ints(canonical_strides(strides)),
                        Operand::Ints(canonical_pads("ConvTranspose", pads)),
                        Operand::Ints(output_shape.clone()),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::ConvTransposeWithDynamicOutputShape { strides, pads } => {
                self.check_inputs(node, 3);
                self.check_outputs(node, 1);
                self.push(
                    node,
                    program,
                    Opcode::ConvTransposeWithDynamicShape,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Ints(canonical_strides(strides)),
                        Operand::Ints(canonical_pads(
                            "ConvTransposeWithDynamicOutputShape",
                            pads,
                        )),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::ConvGradWeight {
                dilations,
                strides,
                pads,
            } => {
                self.check_inputs(node, 3);
                self.check_outputs(node, 1);
                check_dilations("ConvGradWeight", dilations);
                self.push(
                    node,
                    program,
                    Opcode::ConvGradWeight,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Ints(canonical_strides(strides)),
                        Operand::Ints(canonical_pads("ConvGradWeight", pads)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Rnn {
                hidden_size,
                direction,
                activations,
                activation_alpha,
                activation_beta,
            } => {
                check_recurrent_attrs(
                    "RNN",
                    direction,
                    activations,
                    activation_alpha,
                    activation_beta,
                );
                self.push(
                    node,
                    program,
                    Opcode::Rnn,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Array(self.optional_input_id(node, 3)),
                        Operand::Array(self.optional_input_id(node, 4)),
                        Operand::Array(self.optional_input_id(node, 5)),
                        Operand::Int(*hidden_size),
                    ],
                    vec![
                        self.optional_output_id(node, 0),
                        self.optional_output_id(node, 1),
                    ],
                );
            }
            Op::Gru {
                hidden_size,
                linear_before_reset,
                direction,
                activations,
                activation_alpha,
                activation_beta,
            } => {
                check_recurrent_attrs(
                    "GRU",
                    direction,
                    activations,
                    activation_alpha,
                    activation_beta,
                );
                self.push(
                    node,
                    program,
                    Opcode::Gru,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Array(self.optional_input_id(node, 3)),
                        Operand::Array(self.optional_input_id(node, 4)),
                        Operand::Array(self.optional_input_id(node, 5)),
                        Operand::Int(*hidden_size),
                        Operand::Int(*linear_before_reset),
                    ],
                    vec![
                        self.optional_output_id(node, 0),
                        self.optional_output_id(node, 1),
                    ],
                );
            }
            Op::Lstm {
                hidden_size,
                direction,
                activations,
                activation_alpha,
                activation_beta,
            } => {
                check_recurrent_attrs(
                    "LSTM",
                    direction,
                    activations,
                    activation_alpha,
                    activation_beta,
                );
                if node.inputs.len() < 3 {
                    panic!("LSTM: expected at least 3 inputs, got {}", node.inputs.len());
                }
                if node.outputs.len() > 3 {
                    panic!("LSTM: expected at most 3 outputs, got {}", node.outputs.len());
                }
                self.push(
                    node,
                    program,
                    Opcode::Lstm,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Array(self.optional_input_id(node, 3)),
                        Operand::Array(self.optional_input_id(node, 4)),
                        Operand::Array(self.optional_input_id(node, 5)),
                        Operand::Array(self.optional_input_id(node, 6)),
                        Operand::Array(self.optional_input_id(node, 7)),
                        Operand::Int(*hidden_size),
                        Operand::Int(direction_code("LSTM", direction)),
                    ],
                    vec![
                        self.optional_output_id(node, 0),
                        self.optional_output_id(node, 1),
                        self.optional_output_id(node, 2),
                    ],
                );
            }

            Op::Shape => self.unary(node, Opcode::Shape, program),
            Op::Size => self.unary(node, Opcode::Size, program),

            Op::Reshape => self.binary(node, Opcode::Reshape, program),
            Op::Expand => self.binary(node, Opcode::Expand, program),
            Op::Squeeze { axes } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::Squeeze,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Ints(axes.clone()),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::Unsqueeze { axes } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::Unsqueeze,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Ints(axes.clone()),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::MatMul => self.binary(node, Opcode::MatMul, program),
            Op::Gemm {
                alpha,
                beta,
                trans_a,
                trans_b,
            } => {
                self.check_arity(node, 3, 1);
                self.push(
                    node,
                    program,
                    Opcode::Gemm,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Float(*alpha),
                        Operand::Float(*beta),
                        Operand::Int(*trans_a),
                        Operand::Int(*trans_b),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::BatchNormalization {
                epsilon,
                momentum,
                spatial,
            } => {
                self.check_inputs(node, 5);
                self.push(
                    node,
                    program,
                    Opcode::BatchNormalization,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Array(self.input_id(node, 3)),
                        Operand::Array(self.input_id(node, 4)),
                        Operand::Float(*epsilon),
                        Operand::Float(*momentum),
                        Operand::Int(*spatial),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::BatchNormalizationGrad => {
                self.check_arity(node, 2, 3);
                self.push(
                    node,
                    program,
                    Opcode::BatchNormalizationGrad,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                    ],
                    vec![
                        self.output_id(node, 0),
                        self.output_id(node, 1),
                        self.output_id(node, 2),
                    ],
                );
            }
            Op::Lrn {
                alpha,
                beta,
                bias,
                size,
            } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::Lrn,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Float(*alpha),
                        Operand::Float(*beta),
                        Operand::Float(*bias),
                        Operand::Int(*size),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::LrnGrad {
                alpha,
                beta,
                bias,
                size,
            } => {
                self.check_arity(node, 3, 1);
                self.push(
                    node,
                    program,
                    Opcode::LrnGrad,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Float(*alpha),
                        Operand::Float(*beta),
                        Operand::Float(*bias),
                        Operand::Int(*size),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Pad { mode, pads, value } => {
                self.check_arity(node, 1, 1);
                if mode != "constant" {
                    panic!("Pad: only constant padding is supported, got {mode:?}");
                }
                self.push(
                    node,
                    program,
                    Opcode::Pad,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Ints(pads.clone()),
                        Operand::Float(*value),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::MaxPool {
                kernel_shape,
                strides,
                pads,
            } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::MaxPool,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Ints(kernel_shape.clone()),
                        Operand::Ints(canonical_strides(strides)),
                        Operand::Ints(canonical_pads("MaxPool", pads)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::AveragePool {
                kernel_shape,
                strides,
                pads,
                count_include_pad,
            } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::AveragePool,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Ints(kernel_shape.clone()),
                        Operand::Ints(canonical_strides(strides)),
                        Operand::Ints(canonical_pads("AveragePool", pads)),
                        Operand::Int(*count_include_pad),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Softmax { axis } => {
                self.check_arity(node, 1, 1);
                let axis = if *axis < 0 { 1 } else { *axis };
                self.push(
                    node,
                    program,
                    Opcode::Softmax,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Int(axis),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::LogSoftmax { axis } => {
                self.check_arity(node, 1, 1);
                let axis = if *axis < 0 { 1 } else { *axis };
                self.push(
                    node,
                    program,
                    Opcode::LogSoftmax,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Int(axis),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::ArgMax { axis, keepdims } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::ArgMax,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Int(*axis),
                        Operand::Int(*keepdims),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::Hardmax { axis } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::Hardmax,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Int(*axis),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::ReduceMax { axes, keepdims } => {
                self.reduction(node, Opcode::ReduceMax, axes, *keepdims, program)
            }
            Op::ReduceSum { axes, keepdims } => {
                self.reduction(node, Opcode::ReduceSum, axes, *keepdims, program)
            }
            Op::ReduceSumSquare { axes, keepdims } => {
                self.reduction(node, Opcode::ReduceSumSquare, axes, *keepdims, program)
            }
            Op::ReduceMean { axes, keepdims } => {
                self.reduction(node, Opcode::ReduceMean, axes, *keepdims, program)
            }
            Op::ReduceSumTo => self.binary(node, Opcode::ReduceSumTo, program),

            Op::Cast { to } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::Cast,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Int(to.code()),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::ConstantFill {
                input_as_shape,
                dtype,
                extra_shape,
                shape,
                value,
            } => {
                self.check_inputs(node, usize::from(*input_as_shape));
                self.check_outputs(node, 1);
                self.push(
                    node,
                    program,
                    Opcode::ConstantFill,
                    vec![
                        Operand::Array(self.optional_input_id(node, 0)),
                        Operand::Int(*dtype),
                        Operand::Ints(extra_shape.clone()),
                        Operand::Ints(shape.clone()),
                        Operand::Float(*value),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Slice { axes, starts, ends } => {
                self.check_arity(node, 1, 1);
                if starts.is_empty() || ends.is_empty() {
                    panic!("Slice: starts and ends must be non-empty");
                }
                if starts.len() != ends.len() {
                    panic!(
                        "Slice: starts and ends must be equal length, got {} and {}",
                        starts.len(),
                        ends.len()
                    );
                }
                let axes = if axes.is_empty() {
                    (0..starts.len() as i64).collect()
                } else {
                    if axes.len() != starts.len() {
                        panic!(
                            "Slice: axes and starts must be equal length, got {} and {}",
                            axes.len(),
                            starts.len()
                        );
                    }
                    axes.clone()
                };
                self.push(
                    node,
                    program,
                    Opcode::Slice,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Ints(axes),
                        Operand::Ints(starts.clone()),
                        Operand::Ints(ends.clone()),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::DynamicSlice => {
                self.push(
                    node,
                    program,
                    Opcode::DynamicSlice,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                        Operand::Array(self.optional_input_id(node, 3)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::Gather { axis } => {
                self.check_arity(node, 2, 1);
                self.push(
                    node,
                    program,
                    Opcode::Gather,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Int(*axis),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Concat { axis } => {
                self.check_outputs(node, 1);
                let inputs: Vec<i64> = (0..node.inputs.len())
                    .map(|i| self.input_id(node, i))
                    .collect();
                self.push(
                    node,
                    program,
                    Opcode::Concat,
                    vec![Operand::ArrayList(inputs), Operand::Int(*axis)],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::Split { axis, split } => {
                self.check_inputs(node, 1);
                let outputs: Vec<i64> = (0..node.outputs.len())
                    .map(|i| self.output_id(node, i))
                    .collect();
                self.push(
                    node,
                    program,
                    Opcode::Split,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Int(*axis),
                        Operand::Ints(split.clone()),
                    ],
                    outputs,
                );
            }

            Op::Max => {
                self.check_outputs(node, 1);
                let inputs: Vec<i64> = (0..node.inputs.len())
                    .map(|i| self.input_id(node, i))
                    .collect();
                self.push(
                    node,
                    program,
                    Opcode::Max,
                    vec![Operand::ArrayList(inputs)],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Clip { max, min } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::Clip,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Float(*max),
                        Operand::Float(*min),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::Transpose { perm } => {
                self.check_arity(node, 1, 1);
                self.push(
                    node,
                    program,
                    Opcode::Transpose,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Ints(perm.clone()),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SelectItemGrad => {
                self.check_arity(node, 3, 1);
                self.push(
                    node,
                    program,
                    Opcode::SelectItemGrad,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                        Operand::Array(self.input_id(node, 2)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::Constant { value, host } => self.emit_constant(node, value, *host, program),

            Op::Loop { body, stack_axis } => {
                self.emit_loop(node, body, *stack_axis, program)
            }

            Op::SequenceCreate => {
                self.push(
                    node,
                    program,
                    Opcode::SequenceCreate,
                    vec![],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SequenceSize => {
                self.push(
                    node,
                    program,
                    Opcode::SequenceSize,
                    vec![Operand::Sequence(self.input_id(node, 0))],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SequenceLengths => {
                self.push(
                    node,
                    program,
                    Opcode::SequenceLengths,
                    vec![Operand::Sequence(self.input_id(node, 0))],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SequenceAppend => {
                let seq = self.input_id(node, 0);
                let out = self.output_id(node, 0);
                // A sequence with a single reader can be moved instead of
                // copied, keeping linear accumulation linear.
                let transfer = if self.model.value(node.inputs[0]).users.len() == 1 {
                    Opcode::SequenceMove
                } else {
                    Opcode::SequenceCopy
                };
                self.push(
                    node,
                    program,
                    transfer,
                    vec![Operand::Sequence(seq)],
                    vec![out],
                );
                self.push(
                    node,
                    program,
                    Opcode::SequenceAppend,
                    vec![
                        Operand::Sequence(out),
                        Operand::Array(self.input_id(node, 1)),
                    ],
                    vec![],
                );
            }
            Op::SequenceLookup => {
                self.push(
                    node,
                    program,
                    Opcode::SequenceLookup,
                    vec![
                        Operand::Sequence(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SequenceStack { axis } => {
                self.push(
                    node,
                    program,
                    Opcode::SequenceStack,
                    vec![
                        Operand::Sequence(self.input_id(node, 0)),
                        Operand::Int(*axis),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SequenceSplit { axis } => {
                self.push(
                    node,
                    program,
                    Opcode::SequenceSplit,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Int(*axis),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SequenceUnpad => {
                self.push(
                    node,
                    program,
                    Opcode::SequenceUnpad,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Sequence(self.input_id(node, 1)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::SequencePad { length, value } => {
                self.push(
                    node,
                    program,
                    Opcode::SequencePad,
                    vec![
                        Operand::Sequence(self.input_id(node, 0)),
                        Operand::Int(*length),
                        Operand::Float(*value),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }

            Op::GenericLen => {
                self.push(
                    node,
                    program,
                    Opcode::GenericLen,
                    vec![Operand::Array(self.input_id(node, 0))],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::GenericGetItem => {
                self.push(
                    node,
                    program,
                    Opcode::GenericGetItem,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::GenericGetSlice => {
                self.push(
                    node,
                    program,
                    Opcode::GenericGetSlice,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.optional_input_id(node, 1)),
                        Operand::Array(self.optional_input_id(node, 2)),
                        Operand::Array(self.optional_input_id(node, 3)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
            Op::GenericAdd => {
                self.push(
                    node,
                    program,
                    Opcode::GenericAdd,
                    vec![
                        Operand::Array(self.input_id(node, 0)),
                        Operand::Array(self.input_id(node, 1)),
                    ],
                    vec![self.output_id(node, 0)],
                );
            }
        }
    }

    /// Lowers a `Constant` node's attached tensor: scalar forms for rank-0,
    /// flattened list forms otherwise.
    fn emit_constant(
        &mut self,
        node: &Node,
        value: &TensorData,
        host: bool,
        program: &mut Program,
    ) {
        self.check_outputs(node, 1);
        let out = self.output_id(node, 0);
        let mut shape = Vec::with_capacity(value.shape.len());
        for &dim in &value.shape {
            if dim < 0 {
                panic!("Constant: negative dim {dim}");
            }
            if dim >= (1i64 << 32) {
                panic!("Constant: dim {dim} does not fit in 32 bits");
            }
            shape.push(dim);
        }
        let dtype = Operand::Int(value.dtype.code());
        let host = Operand::Int(i64::from(host));
        match &value.data {
            Data::Floats(values) => {
                if value.is_scalar() {
                    let scalar = *values
                        .first()
                        .unwrap_or_else(|| panic!("Constant: empty scalar payload"));
                    self.push(
                        node,
                        program,
                        Opcode::FloatScalarConstant,
                        vec![Operand::Float(scalar), dtype, host],
                        vec![out],
                    );
                } else {
                    self.push(
                        node,
                        program,
                        Opcode::FloatConstant,
                        vec![
                            Operand::Doubles(values.clone()),
                            dtype,
                            Operand::Ints(shape),
                            host,
                        ],
                        vec![out],
                    );
                }
            }
            Data::Ints(values) => {
                if value.is_scalar() {
                    let scalar = *values
                        .first()
                        .unwrap_or_else(|| panic!("Constant: empty scalar payload"));
                    self.push(
                        node,
                        program,
                        Opcode::IntScalarConstant,
                        vec![Operand::Int(scalar), dtype, host],
                        vec![out],
                    );
                } else {
                    self.push(
                        node,
                        program,
                        Opcode::IntConstant,
                        vec![
                            Operand::Longs(values.clone()),
                            dtype,
                            Operand::Ints(shape),
                            host,
                        ],
                        vec![out],
                    );
                }
            }
        }
    }

    fn unary(&self, node: &Node, opcode: Opcode, program: &mut Program) {
        self.check_arity(node, 1, 1);
        self.push(
            node,
            program,
            opcode,
            vec![Operand::Array(self.input_id(node, 0))],
            vec![self.output_id(node, 0)],
        );
    }

    fn binary(&self, node: &Node, opcode: Opcode, program: &mut Program) {
        self.check_arity(node, 2, 1);
        self.push(
            node,
            program,
            opcode,
            vec![
                Operand::Array(self.input_id(node, 0)),
                Operand::Array(self.input_id(node, 1)),
            ],
            vec![self.output_id(node, 0)],
        );
    }

    fn reduction(
        &self,
        node: &Node,
        opcode: Opcode,
        axes: &[i64],
        keepdims: i64,
        program: &mut Program,
    ) {
        self.check_arity(node, 1, 1);
        self.push(
            node,
            program,
            opcode,
            vec![
                Operand::Array(self.input_id(node, 0)),
                Operand::Ints(axes.to_vec()),
                Operand::Int(keepdims),
            ],
            vec![self.output_id(node, 0)],
        );
    }

    fn push(
        &self,
        node: &Node,
        program: &mut Program,
        opcode: Opcode,
        inputs: Vec<Operand>,
        outputs: Vec<i64>,
    ) {
        program.push(Instruction::new(opcode, inputs, outputs, node.debug_string()));
    }

    fn check_arity(&self, node: &Node, inputs: usize, outputs: usize) {
        self.check_inputs(node, inputs);
        self.check_outputs(node, outputs);
    }

    fn check_inputs(&self, node: &Node, expected: usize) {
        if node.inputs.len() != expected {
            panic!(
                "{}: expected {} inputs, got {}",
                node.op.name(),
                expected,
                node.inputs.len()
            );
        }
    }

    fn check_input_range(&self, node: &Node, min: usize, max: usize) {
        if node.inputs.len() < min || node.inputs.len() > max {
            panic!(
                "{}: expected {} to {} inputs, got {}",
                node.op.name(),
                min,
                max,
                node.inputs.len()
            );
        }
    }

    fn check_outputs(&self, node: &Node, expected: usize) {
        if node.outputs.len() != expected {
            panic!(
                "{}: expected {} outputs, got {}",
                node.op.name(),
                expected,
                node.outputs.len()
            );
        }
    }

    /// Id of a mandatory input slot.
    fn input_id(&self, node: &Node, index: usize) -> i64 {
        let value = self.slot(node, &node.inputs, "input", index);
        self.value_id(value)
    }

    /// Id of an optional input slot; `-1` when absent.
    fn optional_input_id(&self, node: &Node, index: usize) -> i64 {
        match node.inputs.get(index) {
            Some(value) if !value.is_null() => self.value_id(*value),
            _ => -1,
        }
    }

    /// Id of a mandatory output slot.
    fn output_id(&self, node: &Node, index: usize) -> i64 {
        let value = self.slot(node, &node.outputs, "output", index);
        self.value_id(value)
    }

    /// Id of an optional output slot; `-1` when absent.
    fn optional_output_id(&self, node: &Node, index: usize) -> i64 {
        match node.outputs.get(index) {
            Some(value) if !value.is_null() => self.value_id(*value),
            _ => -1,
        }
    }

    fn slot(
        &self,
        node: &Node,
        slots: &[ValueRef],
        role: &str,
        index: usize,
    ) -> ValueRef {
        match slots.get(index) {
            Some(&value) if !value.is_null() => value,
            _ => panic!("{}: {} #{} is mandatory", node.op.name(), role, index),
        }
    }
}
