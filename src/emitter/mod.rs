//! The lowering engine: stable value ids, topological emission, last-use
//! freeing, and output finalization.
//!
//! One [`Emitter`] exists per emit call. It borrows the model immutably,
//! owns the id table and counter, and appends to a [`Program`] handed back
//! to the caller. Emission is single-threaded, synchronous, and
//! deterministic: the same model always produces the same instruction
//! stream.

mod loops;
mod node;

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use crate::ir::{Graph, Model, Op, ValueKind, ValueRef};
use crate::program::{Instruction, Opcode, Operand, Program};

/// Emitter configuration.
#[derive(Debug, Clone, Default, new)]
pub struct EmitOptions {
    /// Dump the id → value-name table to stderr after emission.
    pub dump_value_names: bool,
}

/// Lowers a model into a VM program.
pub fn emit(model: &Model) -> Program {
    emit_with_options(model, &EmitOptions::default())
}

/// Lowers a model into a VM program, honoring [`EmitOptions`].
pub fn emit_with_options(model: &Model, options: &EmitOptions) -> Program {
    let mut emitter = Emitter::new(model);
    let mut program = Program::default();
    emitter.emit(&mut program);
    if options.dump_value_names {
        if let Err(err) = emitter.dump_value_names(&mut io::stderr().lock()) {
            log::warn!("value-name dump failed: {err}");
        }
    }
    program
}

/// Holds the per-emit-session state: the injective value → id table and the
/// monotonic id counter. Ids are dense from 1 so the VM can use them as
/// array indices, and are never reused within a session.
pub struct Emitter<'m> {
    model: &'m Model,
    value_ids: HashMap<ValueRef, i64>,
    next_value_id: i64,
}

impl<'m> Emitter<'m> {
    pub fn new(model: &'m Model) -> Self {
        let mut emitter = Self {
            model,
            value_ids: HashMap::new(),
            next_value_id: 1,
        };
        emitter.assign_value_ids(model.graph());
        emitter
    }

    /// Walks the root graph, then finalizes its outputs.
    pub fn emit(&mut self, program: &mut Program) {
        let graph = self.model.graph();
        self.emit_graph(graph, program, false);
        self.emit_outputs(program);
    }

    /// Assigns ids to every value of a graph in the fixed inputs → temps →
    /// outputs order. Called once for the root graph at construction and
    /// once per `Loop` body at loop lowering.
    fn assign_value_ids(&mut self, graph: &Graph) {
        for &value in graph
            .input_values
            .iter()
            .chain(&graph.temp_values)
            .chain(&graph.output_values)
        {
            let id = self.next_value_id;
            self.next_value_id += 1;
            if self.value_ids.insert(value, id).is_some() {
                panic!(
                    "value '{}' registered twice",
                    self.model.value(value).name
                );
            }
            log::debug!("${id} <- value '{}'", self.model.value(value).name);
        }
    }

    /// Looks up the id of a registered value.
    fn value_id(&self, value: ValueRef) -> i64 {
        match self.value_ids.get(&value) {
            Some(&id) => id,
            None => panic!(
                "value '{}' was never registered",
                self.model.value(value).name
            ),
        }
    }

    /// Mints a fresh id for a value created during lowering.
    fn mint_id(&mut self) -> i64 {
        let id = self.next_value_id;
        self.next_value_id += 1;
        id
    }

    /// Walks a graph in its computation sequence: stages root inputs on
    /// first use, lowers each node, frees dead outputs, and frees each
    /// value after its last use.
    fn emit_graph(&mut self, graph: &Graph, program: &mut Program, in_loop: bool) {
        let model = self.model;

        // Remaining uses per value. Signed so that a count exhausted by an
        // earlier occurrence cannot wrap on the next one.
        let mut num_users: HashMap<ValueRef, i64> = HashMap::new();
        if !in_loop {
            for &value in &graph.input_values {
                num_users.insert(value, model.value(value).users.len() as i64);
            }
        }
        for &value in &graph.temp_values {
            num_users.insert(value, model.value(value).users.len() as i64);
        }

        let mut staged_inputs: HashSet<ValueRef> = HashSet::new();

        for &node_ref in graph.computation_sequence() {
            let node = model.node(node_ref);

            if !in_loop {
                for &input in &node.inputs {
                    let value = model.value(input);
                    if value.kind != ValueKind::Input {
                        continue;
                    }
                    if !staged_inputs.insert(input) {
                        continue;
                    }
                    let id = self.value_id(input);
                    program.push(Instruction::new(
                        Opcode::In,
                        vec![Operand::Str(value.name.clone())],
                        vec![id],
                        value.name.clone(),
                    ));
                }
            }

            log::debug!("emitting node => '{}'", node.debug_string());
            self.emit_node(node, program);

            for &output in &node.outputs {
                let value = model.value(output);
                if value.kind == ValueKind::Temp
                    && value.users.is_empty()
                    // TODO(emitter): teach the emitter about stateful ops so
                    // running statistics survive without an opcode special case.
                    && !matches!(node.op, Op::BatchNormalization { .. })
                {
                    let id = self.value_id(output);
                    self.emit_free(program, id, node.debug_string());
                }
            }

            for &input in &node.inputs {
                if let Some(count) = num_users.get_mut(&input) {
                    *count -= 1;
                    if *count == 0 {
                        let id = self.value_id(input);
                        self.emit_free(program, id, node.debug_string());
                    }
                }
            }
        }
    }

    /// Emits `Out` then `Free` for every root graph output.
    fn emit_outputs(&self, program: &mut Program) {
        for &value_ref in &self.model.graph().output_values {
            let value = self.model.value(value_ref);
            let id = self.value_id(value_ref);
            program.push(Instruction::new(
                Opcode::Out,
                vec![Operand::Str(value.name.clone()), Operand::Array(id)],
                vec![],
                value.name.clone(),
            ));
            self.emit_free(program, id, value.name.clone());
        }
    }

    fn emit_free(&self, program: &mut Program, id: i64, debug: String) {
        program.push(Instruction::new(
            Opcode::Free,
            vec![Operand::Array(id)],
            vec![],
            debug,
        ));
    }

    /// Writes the id → value table: a header, one `$<id>: <name> <nbytes>`
    /// line per value in id order, and the total size in (truncated)
    /// megabytes. Informational only.
    pub fn dump_value_names<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut by_id: Vec<(i64, ValueRef)> =
            self.value_ids.iter().map(|(&v, &id)| (id, v)).collect();
        by_id.sort_unstable();

        writeln!(writer, "=== {} variables ===", by_id.len())?;
        let mut total: i64 = 0;
        for (id, value_ref) in by_id {
            let value = self.model.value(value_ref);
            let size = value.nbytes();
            total += size;
            writeln!(writer, "${}: {} {}", id, value.name, size)?;
        }
        writeln!(writer, "Total size of all values: {}MB", total / 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, ModelBuilder};

    fn opcodes(program: &Program) -> Vec<Opcode> {
        program.instructions.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn single_relu_graph() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let y = builder.output("y");
        builder.node("relu0", Op::Relu, &[x], &[y]);
        let program = emit(&builder.finish());

        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::In,
                Opcode::Relu,
                Opcode::Free,
                Opcode::Out,
                Opcode::Free,
            ],
        );
        // Ids are assigned inputs first, then outputs.
        assert_eq!(program.instructions[0].outputs, vec![1]);
        assert_eq!(
            program.instructions[1].inputs,
            vec![Operand::Array(1)]
        );
        assert_eq!(program.instructions[1].outputs, vec![2]);
        assert_eq!(program.instructions[2].inputs, vec![Operand::Array(1)]);
        assert_eq!(
            program.instructions[3].inputs,
            vec![Operand::Str("y".into()), Operand::Array(2)]
        );
        assert_eq!(program.instructions[4].inputs, vec![Operand::Array(2)]);
    }

    #[test]
    fn dead_temp_is_freed_after_its_last_reader() {
        // y = Identity(Add(x, x)); the Add temp dies at the Identity.
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let t = builder.temp("t");
        let y = builder.output("y");
        builder.node("add0", Op::Add, &[x, x], &[t]);
        builder.node("id0", Op::Identity, &[t], &[y]);
        let program = emit(&builder.finish());

        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::In,       // x
                Opcode::Add,      // t = x + x
                Opcode::Free,     // x: both uses consumed by add0
                Opcode::Identity, // y = t
                Opcode::Free,     // t: last use
                Opcode::Out,      // y
                Opcode::Free,     // y
            ],
        );
        // The Add temp ($2) is freed after Identity, not before.
        assert_eq!(program.instructions[4].inputs, vec![Operand::Array(2)]);
    }

    #[test]
    fn unused_temp_output_is_freed_immediately() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let dead = builder.temp("dead");
        let y = builder.output("y");
        builder.node("sqrt0", Op::Sqrt, &[x], &[dead]);
        builder.node("neg0", Op::Neg, &[x], &[y]);
        let program = emit(&builder.finish());

        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::In,
                Opcode::Sqrt,
                Opcode::Free, // dead output, no users
                Opcode::Neg,
                Opcode::Free, // x after its last reader
                Opcode::Out,
                Opcode::Free,
            ],
        );
        assert_eq!(program.instructions[2].inputs, vec![Operand::Array(2)]);
    }

    #[test]
    fn batch_normalization_dead_outputs_leak() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let s = builder.input("s");
        let b = builder.input("b");
        let mean = builder.input("mean");
        let var = builder.input("var");
        let y = builder.output("y");
        let saved = builder.temp("saved");
        builder.node(
            "bn0",
            Op::BatchNormalization {
                epsilon: 1e-5,
                momentum: 0.9,
                spatial: 1,
            },
            &[x, s, b, mean, var],
            &[y, saved],
        );
        let program = emit(&builder.finish());

        // The dead `saved` temp is never freed; frees cover the five
        // inputs and the graph output only.
        let frees: Vec<&Instruction> = program
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Free)
            .collect();
        assert_eq!(frees.len(), 6);
        let saved_id = 6; // ids: the five inputs, then the temp, then the output
        assert!(frees
            .iter()
            .all(|i| i.inputs != vec![Operand::Array(saved_id)]));
    }

    #[test]
    fn inputs_are_staged_once_in_first_use_order() {
        let mut builder = ModelBuilder::new();
        let a = builder.input("a");
        let b = builder.input("b");
        let t = builder.temp("t");
        let u = builder.temp("u");
        let y = builder.output("y");
        // b is consumed first even though a was declared first, and a is
        // read by two nodes: staged once each, in first-use order.
        builder.node("neg0", Op::Neg, &[b], &[t]);
        builder.node("add0", Op::Add, &[t, a], &[u]);
        builder.node("mul0", Op::Mul, &[u, a], &[y]);
        let program = emit(&builder.finish());

        let ins: Vec<&Instruction> = program
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::In)
            .collect();
        assert_eq!(ins.len(), 2);
        assert_eq!(ins[0].inputs, vec![Operand::Str("b".into())]);
        assert_eq!(ins[1].inputs, vec![Operand::Str("a".into())]);
    }

    #[test]
    fn emission_is_deterministic() {
        let build = || {
            let mut builder = ModelBuilder::new();
            let x = builder.input("x");
            let t = builder.temp("t");
            let y = builder.output("y");
            builder.node("exp0", Op::Exp, &[x], &[t]);
            builder.node("log0", Op::Log, &[t], &[y]);
            builder.finish()
        };
        let first = emit(&build());
        let second = emit(&build());
        assert_eq!(first, second);
    }

    #[test]
    fn every_instruction_is_debug_annotated() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let t = builder.temp("t");
        let y = builder.output("y");
        builder.node("tanh0", Op::Tanh, &[x], &[t]);
        builder.node("abs0", Op::Abs, &[t], &[y]);
        let program = emit(&builder.finish());

        assert!(program.instructions.iter().all(|i| !i.debug.is_empty()));
    }

    #[test]
    #[should_panic(expected = "value 'stray' was never registered")]
    fn unregistered_value_lookup_fails_loudly() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let y = builder.output("y");
        builder.begin_graph();
        let stray = builder.temp("stray");
        let _body = builder.end_graph();
        // A node referencing a value outside every graph set.
        builder.node("neg0", Op::Neg, &[stray], &[y]);
        builder.node("id0", Op::Identity, &[x], &[y]);
        let model = builder.finish();
        emit(&model);
    }

    #[test]
    fn dump_value_names_lists_ids_names_and_sizes() {
        let mut builder = ModelBuilder::new();
        let x = builder.input("x");
        let y = builder.output("y");
        builder.set_value_type(x, DType::F32, &[1000, 1000]);
        builder.set_value_type(y, DType::F32, &[1000, 1000]);
        builder.node("relu0", Op::Relu, &[x], &[y]);
        let model = builder.finish();

        let mut emitter = Emitter::new(&model);
        let mut program = Program::default();
        emitter.emit(&mut program);

        let mut dump = Vec::new();
        emitter.dump_value_names(&mut dump).unwrap();
        let dump = String::from_utf8(dump).unwrap();
        assert_eq!(
            dump,
            "=== 2 variables ===\n\
             $1: x 4000000\n\
             $2: y 4000000\n\
             Total size of all values: 8MB\n"
        );
    }
}
