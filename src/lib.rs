//! Lowers a typed tensor-operator dataflow graph into a flat stream of
//! TensorVM instructions.
//!
//! The input is a [`Model`]: an arena of values and nodes plus a root
//! [`Graph`] whose node order is already topologically sorted by the
//! upstream scheduler. The output is a [`Program`]: an append-only list of
//! typed instructions in which every value has a stable integer id, every
//! temporary is freed at its last use, and `Loop` nodes have been linearized
//! into conditional and unconditional jumps.
//!
//! ```
//! use tensorvm_emitter::{emit, ir::{ModelBuilder, Op}};
//!
//! let mut builder = ModelBuilder::new();
//! let x = builder.input("x");
//! let y = builder.output("y");
//! builder.node("relu0", Op::Relu, &[x], &[y]);
//! let model = builder.finish();
//!
//! let program = emit(&model);
//! assert_eq!(program.len(), 5); // In, Relu, Free x, Out, Free y
//! ```

#[macro_use]
extern crate derive_new;

pub mod ir;
mod program;

mod emitter;

pub use emitter::{emit, emit_with_options, EmitOptions, Emitter};
pub use program::{Instruction, Opcode, Operand, Program};
