//! The dataflow-graph intermediate representation consumed by the emitter.
//!
//! Values and nodes live in arenas owned by a [`Model`]; [`ValueRef`] and
//! [`NodeRef`] are plain index handles, so graphs (including nested loop
//! bodies) never hold owning references to each other. The emitter borrows
//! the model immutably for the duration of an emit call.

mod graph;
mod node;
mod op;
mod tensor;
mod value;

pub use graph::{Graph, Model, ModelBuilder};
pub use node::{Node, NodeRef};
pub use op::Op;
pub use tensor::{DType, Data, TensorData};
pub use value::{Value, ValueKind, ValueRef};
