//! Graphs, the model arena, and the construction surface frontends target.

use super::node::{Node, NodeRef};
use super::op::Op;
use super::tensor::DType;
use super::value::{Value, ValueKind, ValueRef};

/// One dataflow graph: the three disjoint ordered value sets plus the node
/// order. The node order is the computation sequence — a topological order
/// produced by the upstream scheduler that the emitter trusts as-is.
///
/// A graph does not own its values or nodes; they live in the [`Model`]
/// arena, which is shared with every nested loop body graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub input_values: Vec<ValueRef>,
    pub temp_values: Vec<ValueRef>,
    pub output_values: Vec<ValueRef>,
    nodes: Vec<NodeRef>,
}

impl Graph {
    /// Nodes in scheduled order.
    pub fn computation_sequence(&self) -> &[NodeRef] {
        &self.nodes
    }
}

/// Owns the value and node arenas and the root graph.
#[derive(Debug)]
pub struct Model {
    values: Vec<Value>,
    nodes: Vec<Node>,
    graph: Graph,
}

impl Model {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn value(&self, value: ValueRef) -> &Value {
        &self.values[value.0 as usize]
    }

    pub fn node(&self, node: NodeRef) -> &Node {
        &self.nodes[node.0 as usize]
    }
}

#[derive(Debug, Default)]
struct GraphFrame {
    inputs: Vec<ValueRef>,
    temps: Vec<ValueRef>,
    outputs: Vec<ValueRef>,
    nodes: Vec<NodeRef>,
}

impl GraphFrame {
    fn into_graph(self) -> Graph {
        Graph {
            input_values: self.inputs,
            temp_values: self.temps,
            output_values: self.outputs,
            nodes: self.nodes,
        }
    }
}

/// Builds a [`Model`] one value and node at a time.
///
/// Nodes must be added in execution order; the builder records them as the
/// computation sequence without reordering. Loop bodies are built by
/// bracketing their values and nodes between [`ModelBuilder::begin_graph`]
/// and [`ModelBuilder::end_graph`], which returns the body graph to embed in
/// [`Op::Loop`].
#[derive(Debug)]
pub struct ModelBuilder {
    values: Vec<Value>,
    nodes: Vec<Node>,
    frames: Vec<GraphFrame>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            // Arena slot 0 is the shared null sentinel.
            values: vec![Value::new(ValueKind::Null, "")],
            nodes: Vec::new(),
            frames: vec![GraphFrame::default()],
        }
    }

    /// The "absent optional slot" sentinel.
    pub fn null(&self) -> ValueRef {
        ValueRef::NULL
    }

    pub fn input(&mut self, name: &str) -> ValueRef {
        let value = self.value(ValueKind::Input, name);
        self.frame().inputs.push(value);
        value
    }

    pub fn temp(&mut self, name: &str) -> ValueRef {
        let value = self.value(ValueKind::Temp, name);
        self.frame().temps.push(value);
        value
    }

    pub fn output(&mut self, name: &str) -> ValueRef {
        let value = self.value(ValueKind::Output, name);
        self.frame().outputs.push(value);
        value
    }

    /// Attaches type information to a value. Only the diagnostic dump reads
    /// it; emission itself never depends on dtypes or shapes.
    pub fn set_value_type(&mut self, value: ValueRef, dtype: DType, shape: &[i64]) {
        let value = &mut self.values[value.0 as usize];
        value.dtype = Some(dtype);
        value.shape = Some(shape.to_vec());
    }

    /// Appends a node to the current graph's computation sequence and
    /// registers it as a user of each non-null input.
    pub fn node(
        &mut self,
        name: &str,
        op: Op,
        inputs: &[ValueRef],
        outputs: &[ValueRef],
    ) -> NodeRef {
        log::debug!("registering node => '{}' ({})", name, op.name());
        let node = NodeRef(self.nodes.len() as u32);
        for &input in inputs {
            if !input.is_null() {
                self.values[input.0 as usize].users.push(node);
            }
        }
        self.nodes.push(Node {
            op,
            name: name.to_string(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
        self.frame().nodes.push(node);
        node
    }

    /// Opens a nested graph; subsequent values and nodes belong to it until
    /// [`ModelBuilder::end_graph`].
    pub fn begin_graph(&mut self) {
        self.frames.push(GraphFrame::default());
    }

    /// Closes the innermost nested graph and returns it.
    pub fn end_graph(&mut self) -> Graph {
        if self.frames.len() < 2 {
            panic!("end_graph without a matching begin_graph");
        }
        self.frames.pop().unwrap().into_graph()
    }

    pub fn finish(mut self) -> Model {
        if self.frames.len() != 1 {
            panic!("finish with {} unclosed nested graphs", self.frames.len() - 1);
        }
        let graph = self.frames.pop().unwrap().into_graph();
        Model {
            values: self.values,
            nodes: self.nodes,
            graph,
        }
    }

    fn frame(&mut self) -> &mut GraphFrame {
        self.frames.last_mut().unwrap()
    }

    fn value(&mut self, kind: ValueKind, name: &str) -> ValueRef {
        let value_ref = ValueRef(self.values.len() as u32);
        self.values.push(Value::new(kind, name));
        value_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_tracks_users_per_occurrence() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let t = builder.temp("t");
        let y = builder.output("y");
        builder.node("add0", Op::Add, &[x, x], &[t]);
        builder.node("id0", Op::Identity, &[t], &[y]);
        let model = builder.finish();

        // x is read twice by the same node.
        assert_eq!(model.value(x).users.len(), 2);
        assert_eq!(model.value(t).users.len(), 1);
        assert_eq!(model.graph().computation_sequence().len(), 2);
    }

    #[test]
    fn null_inputs_are_not_users() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let w = builder.input("w");
        let y = builder.output("y");
        let null = builder.null();
        builder.node(
            "conv0",
            Op::Conv {
                dilations: vec![],
                strides: vec![],
                pads: vec![],
            },
            &[x, w, null],
            &[y],
        );
        let model = builder.finish();
        assert!(model.value(null).users.is_empty());
        assert!(model.value(null).is_null());
    }

    #[test]
    fn nested_graph_values_stay_out_of_the_root_sets() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");

        builder.begin_graph();
        let iter = builder.input("iter");
        let cond = builder.input("cond");
        let body = builder.end_graph();

        assert_eq!(body.input_values, vec![iter, cond]);
        let model = builder.finish();
        assert_eq!(model.graph().input_values, vec![x]);
    }

    #[test]
    #[should_panic(expected = "end_graph without a matching begin_graph")]
    fn unbalanced_end_graph() {
        let mut builder = ModelBuilder::new();
        builder.end_graph();
    }

    #[test]
    #[should_panic(expected = "finish with 1 unclosed nested graphs")]
    fn unclosed_nested_graph() {
        let mut builder = ModelBuilder::new();
        builder.begin_graph();
        builder.finish();
    }
}
