//! Lowering of the `Loop` operator to a linear instruction sequence.
//!
//! The body graph's inputs are `(iteration_counter, condition, state…)` and
//! its outputs `(condition', state'…, scan…)`. The lowering initializes the
//! counter and condition, walks the body once, and wires a backward
//! `JmpTrue` to re-enter it; an optional forward `JmpFalse` guards the whole
//! loop when a terminal condition is present and is backpatched once the
//! exit address is known. Scan outputs accumulate into freshly minted VM
//! sequences that are stacked after the loop exits.
//!
//! Each scaffolding instruction is tagged with the loop phase that emitted
//! it (`"<node> @loop/<phase>"`), the only trace a misbehaving loop leaves.

use crate::ir::{DType, Graph, Node};
use crate::program::{Instruction, Opcode, Operand, Program};

use super::Emitter;

impl Emitter<'_> {
    pub(super) fn emit_loop(
        &mut self,
        node: &Node,
        body: &Graph,
        stack_axis: i64,
        program: &mut Program,
    ) {
        let num_loop_inputs = node.inputs.len();
        let num_loop_outputs = node.outputs.len();
        let num_body_inputs = body.input_values.len();
        let num_body_outputs = body.output_values.len();

        if num_loop_inputs < 2 {
            panic!(
                "Loop: expected at least 2 inputs (max trip count, condition), got {num_loop_inputs}"
            );
        }
        let num_states = num_loop_inputs - 2;
        if num_body_inputs != num_states + 2 {
            panic!(
                "Loop: body has {num_body_inputs} inputs for {num_states} states"
            );
        }
        if num_body_outputs < num_states + 1 {
            panic!(
                "Loop: body has {num_body_outputs} outputs for {num_states} states"
            );
        }
        let num_scans = num_body_outputs - 1 - num_states;
        if num_loop_outputs != num_states + num_scans {
            panic!(
                "Loop: expected {} outputs for {num_states} states and {num_scans} scans, got {num_loop_outputs}",
                num_states + num_scans
            );
        }

        let max_trip_count = node.inputs[0];
        let terminal_condition = node.inputs[1];
        if max_trip_count.is_null() && terminal_condition.is_null() {
            panic!("Loop: neither a trip count nor a terminal condition; the loop would never exit");
        }

        let debug = node.debug_string();
        let tag = |phase: &str| format!("{debug} @loop/{phase}");

        self.assign_value_ids(body);

        // Initialize the iteration counter and the continuation condition.
        let iter_id = self.value_id(body.input_values[0]);
        program.push(Instruction::new(
            Opcode::IntScalarConstant,
            vec![
                Operand::Int(0),
                Operand::Int(DType::I64.code()),
                Operand::Int(0),
            ],
            vec![iter_id],
            tag("init-iter"),
        ));
        let cond_id = self.value_id(body.input_values[1]);
        program.push(Instruction::new(
            Opcode::IntScalarConstant,
            vec![
                Operand::Int(1),
                Operand::Int(DType::Bool.code()),
                Operand::Int(0),
            ],
            vec![cond_id],
            tag("init-cond"),
        ));

        // Seed the body state slots from the outer state inputs.
        for i in 0..num_states {
            let loop_in = self.value_id(node.inputs[i + 2]);
            let body_in = self.value_id(body.input_values[i + 2]);
            program.push(Instruction::new(
                Opcode::Identity,
                vec![Operand::Array(loop_in)],
                vec![body_in],
                tag("init-state"),
            ));
        }

        // One accumulation sequence per scan output.
        let mut scan_seq_ids = Vec::with_capacity(num_scans);
        for _ in 0..num_scans {
            let id = self.mint_id();
            program.push(Instruction::new(
                Opcode::SequenceCreate,
                vec![],
                vec![id],
                tag("scan-create"),
            ));
            scan_seq_ids.push(id);
        }

        // Guard jump, target backpatched after the loop is closed.
        let skip_loop_jmp = if terminal_condition.is_null() {
            None
        } else {
            let terminal_id = self.value_id(terminal_condition);
            Some(program.push(Instruction::new(
                Opcode::JmpFalse,
                vec![Operand::Array(terminal_id), Operand::Int(-1)],
                vec![],
                tag("guard"),
            )))
        };

        let loop_begin = program.len();
        log::debug!("loop '{}' begins at pc {}", node.name, loop_begin);

        self.emit_graph(body, program, true);

        // Advance the iteration counter.
        let one_id = self.mint_id();
        program.push(Instruction::new(
            Opcode::IntScalarConstant,
            vec![
                Operand::Int(1),
                Operand::Int(DType::I64.code()),
                Operand::Int(0),
            ],
            vec![one_id],
            tag("advance"),
        ));
        let incremented_id = self.mint_id();
        program.push(Instruction::new(
            Opcode::Add,
            vec![Operand::Array(iter_id), Operand::Array(one_id)],
            vec![incremented_id],
            tag("advance"),
        ));
        self.emit_free(program, one_id, tag("advance"));

        // The body input slots are rewritten below for the next iteration.
        for &body_in in &body.input_values {
            let id = self.value_id(body_in);
            self.emit_free(program, id, tag("free-body-inputs"));
        }

        self.emit_move(program, iter_id, incremented_id, tag("move-iter"));
        let body_cond_id = self.value_id(body.output_values[0]);
        self.emit_move(program, cond_id, body_cond_id, tag("move-cond"));

        // Propagate each state output into the body's input slot.
        for i in 0..num_states {
            let body_in = self.value_id(body.input_values[i + 2]);
            let body_out = self.value_id(body.output_values[i + 1]);
            self.emit_move(program, body_in, body_out, tag("propagate"));
        }

        // Push scan outputs onto their accumulation sequences.
        for i in 0..num_scans {
            let body_out = self.value_id(body.output_values[i + num_states + 1]);
            program.push(Instruction::new(
                Opcode::SequenceAppend,
                vec![Operand::Sequence(scan_seq_ids[i]), Operand::Array(body_out)],
                vec![],
                tag("scan-append"),
            ));
            self.emit_free(program, body_out, tag("scan-append"));
        }

        // Fold the trip-count bound into the continuation condition.
        if terminal_condition.is_null() {
            let max_id = self.value_id(max_trip_count);
            self.emit_free(program, cond_id, tag("continue-cond"));
            program.push(Instruction::new(
                Opcode::Greater,
                vec![Operand::Array(max_id), Operand::Array(iter_id)],
                vec![cond_id],
                tag("continue-cond"),
            ));
        } else if !max_trip_count.is_null() {
            let max_id = self.value_id(max_trip_count);
            program.push(Instruction::new(
                Opcode::Greater,
                vec![Operand::Array(max_id), Operand::Array(iter_id)],
                vec![incremented_id],
                tag("continue-cond"),
            ));
            // Bools are 0/1 integers in the VM, so conjunction is a Mul.
            let both_id = self.mint_id();
            program.push(Instruction::new(
                Opcode::Mul,
                vec![Operand::Array(cond_id), Operand::Array(incremented_id)],
                vec![both_id],
                tag("continue-cond"),
            ));
            self.emit_free(program, cond_id, tag("continue-cond"));
            self.emit_move(program, cond_id, both_id, tag("continue-cond"));
            self.emit_free(program, incremented_id, tag("continue-cond"));
        }

        program.push(Instruction::new(
            Opcode::JmpTrue,
            vec![Operand::Array(cond_id), Operand::Int(loop_begin as i64)],
            vec![],
            tag("repeat"),
        ));

        if let Some(guard) = skip_loop_jmp {
            let exit = program.len() as i64;
            program.instructions[guard].inputs[1] = Operand::Int(exit);
            log::debug!("loop '{}' guard backpatched to pc {}", node.name, exit);
        }

        // Final state values live in the body input slots.
        for i in 0..num_states {
            let body_in = self.value_id(body.input_values[i + 2]);
            let loop_out = self.value_id(node.outputs[i]);
            self.emit_move(program, loop_out, body_in, tag("finalize-state"));
        }

        // Stack each scan sequence into its outer output.
        for i in 0..num_scans {
            let loop_out = self.value_id(node.outputs[i + num_states]);
            program.push(Instruction::new(
                Opcode::SequenceStack,
                vec![
                    Operand::Sequence(scan_seq_ids[i]),
                    Operand::Int(stack_axis),
                ],
                vec![loop_out],
                tag("finalize-scan"),
            ));
            self.emit_free(program, scan_seq_ids[i], tag("finalize-scan"));
        }

        self.emit_free(program, iter_id, tag("cleanup"));
        self.emit_free(program, cond_id, tag("cleanup"));
    }

    /// `Identity dst <- src` followed by `Free src`.
    fn emit_move(&self, program: &mut Program, dst: i64, src: i64, debug: String) {
        program.push(Instruction::new(
            Opcode::Identity,
            vec![Operand::Array(src)],
            vec![dst],
            debug.clone(),
        ));
        self.emit_free(program, src, debug);
    }
}
