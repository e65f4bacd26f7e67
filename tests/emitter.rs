//! End-to-end emission scenarios exercised through the public API.

use std::collections::{HashMap, HashSet};

use tensorvm_emitter::ir::{DType, Data, Model, ModelBuilder, Op, TensorData};
use tensorvm_emitter::{emit, Opcode, Operand, Program};

/// Ids referenced by an instruction's inputs (array, sequence, and list
/// operands), skipping the absent-slot sentinel.
fn referenced_ids(inputs: &[Operand]) -> Vec<i64> {
    let mut ids = Vec::new();
    for operand in inputs {
        match operand {
            Operand::Array(id) | Operand::Sequence(id) => {
                if *id >= 0 {
                    ids.push(*id);
                }
            }
            Operand::ArrayList(list) => ids.extend(list.iter().copied()),
            _ => {}
        }
    }
    ids
}

/// Linear-order memory discipline: no id is read or written after its
/// `Free`, and nothing is freed twice. Only meaningful for loop-free
/// programs, where linear order is execution order.
fn check_memory_discipline(program: &Program) {
    let mut freed: HashSet<i64> = HashSet::new();
    for (pc, inst) in program.instructions.iter().enumerate() {
        for id in referenced_ids(&inst.inputs) {
            assert!(
                !freed.contains(&id),
                "pc {pc}: ${id} read after its Free"
            );
        }
        for &id in &inst.outputs {
            assert!(
                !freed.contains(&id),
                "pc {pc}: ${id} written after its Free"
            );
        }
        if inst.opcode == Opcode::Free {
            match inst.inputs.as_slice() {
                [Operand::Array(id)] => {
                    assert!(freed.insert(*id), "pc {pc}: ${id} freed twice")
                }
                other => panic!("pc {pc}: malformed Free operands {other:?}"),
            }
        }
    }
}

/// Every value id referenced by an instruction was produced earlier, either
/// by a defining instruction or by `In` staging.
fn check_defs_before_uses(program: &Program) {
    let mut defined: HashSet<i64> = HashSet::new();
    for (pc, inst) in program.instructions.iter().enumerate() {
        for id in referenced_ids(&inst.inputs) {
            assert!(
                defined.contains(&id),
                "pc {pc}: ${id} read before any definition"
            );
        }
        for &id in &inst.outputs {
            if id >= 0 {
                defined.insert(id);
            }
        }
    }
}

/// Jump targets are valid instruction indices and no `-1` placeholder
/// survives emission.
fn check_jump_soundness(program: &Program) {
    for (pc, inst) in program.instructions.iter().enumerate() {
        if !matches!(inst.opcode, Opcode::JmpTrue | Opcode::JmpFalse) {
            continue;
        }
        match inst.inputs.as_slice() {
            [Operand::Array(_), Operand::Int(target)] => {
                assert!(
                    *target >= 0 && (*target as usize) <= program.len(),
                    "pc {pc}: jump target {target} out of range"
                );
            }
            other => panic!("pc {pc}: malformed jump operands {other:?}"),
        }
    }
}

fn check_debug_coverage(program: &Program) {
    for (pc, inst) in program.instructions.iter().enumerate() {
        assert!(!inst.debug.is_empty(), "pc {pc}: missing debug annotation");
    }
}

/// A small feed-forward model: y = Softmax(Relu(Gemm(x, w, b) + c)).
fn feed_forward() -> Model {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x");
    let w = builder.input("w");
    let b = builder.input("b");
    let c = builder.temp("c");
    let dense = builder.temp("dense");
    let shifted = builder.temp("shifted");
    let act = builder.temp("act");
    let y = builder.output("y");

    builder.node(
        "const_c",
        Op::Constant {
            value: TensorData::scalar_f64(0.5),
            host: false,
        },
        &[],
        &[c],
    );
    builder.node(
        "dense0",
        Op::Gemm {
            alpha: 1.0,
            beta: 1.0,
            trans_a: 0,
            trans_b: 1,
        },
        &[x, w, b],
        &[dense],
    );
    builder.node("shift0", Op::Add, &[dense, c], &[shifted]);
    builder.node("act0", Op::Relu, &[shifted], &[act]);
    builder.node("prob0", Op::Softmax { axis: -1 }, &[act], &[y]);
    builder.finish()
}

/// Loop accumulating one scan output for `max_trip` iterations.
fn scan_loop() -> Model {
    let mut builder = ModelBuilder::new();
    let max_trip = builder.input("max_trip");
    let seed = builder.input("seed");
    let last = builder.output("last");
    let history = builder.output("history");

    builder.begin_graph();
    let _iter = builder.input("iter");
    let cond_in = builder.input("cond");
    let state_in = builder.input("state_in");
    let cond_out = builder.output("cond_out");
    let state_out = builder.output("state_out");
    let scan_out = builder.output("scan_out");
    builder.node("keep_going", Op::Identity, &[cond_in], &[cond_out]);
    builder.node("step", Op::Exp, &[state_in], &[state_out]);
    builder.node("snapshot", Op::Identity, &[state_in], &[scan_out]);
    let body = builder.end_graph();

    let null = builder.null();
    builder.node(
        "scan0",
        Op::Loop {
            body,
            stack_axis: 0,
        },
        &[max_trip, null, seed],
        &[last, history],
    );
    builder.finish()
}

#[test]
fn single_op_graph_lowering() {
    let mut builder = ModelBuilder::new();
    let x = builder.input("x");
    let y = builder.output("y");
    builder.node("relu0", Op::Relu, &[x], &[y]);
    let program = emit(&builder.finish());

    let opcodes: Vec<Opcode> = program.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::In,
            Opcode::Relu,
            Opcode::Free,
            Opcode::Out,
            Opcode::Free,
        ]
    );
    assert_eq!(program.instructions[0].inputs, vec![Operand::Str("x".into())]);
    assert_eq!(program.instructions[0].outputs, vec![1]);
    assert_eq!(
        program.instructions[3].inputs,
        vec![Operand::Str("y".into()), Operand::Array(2)]
    );

    check_defs_before_uses(&program);
    check_memory_discipline(&program);
    check_debug_coverage(&program);
}

#[test]
fn feed_forward_satisfies_the_memory_invariants() {
    let program = emit(&feed_forward());

    check_defs_before_uses(&program);
    check_memory_discipline(&program);
    check_jump_soundness(&program);
    check_debug_coverage(&program);

    // Each of the four temporaries is freed exactly once.
    let frees = program
        .instructions
        .iter()
        .filter(|i| i.opcode == Opcode::Free)
        .count();
    // 3 inputs + 4 temps + 1 output.
    assert_eq!(frees, 8);
}

#[test]
fn feed_forward_frees_follow_last_uses() {
    let program = emit(&feed_forward());

    // Map each id to the pc of its Free and of its last read.
    let mut free_at: HashMap<i64, usize> = HashMap::new();
    let mut last_read: HashMap<i64, usize> = HashMap::new();
    for (pc, inst) in program.instructions.iter().enumerate() {
        if inst.opcode == Opcode::Free {
            if let [Operand::Array(id)] = inst.inputs.as_slice() {
                free_at.insert(*id, pc);
            }
            continue;
        }
        for id in referenced_ids(&inst.inputs) {
            last_read.insert(id, pc);
        }
    }
    for (id, read) in last_read {
        let freed = free_at
            .get(&id)
            .unwrap_or_else(|| panic!("${id} is read but never freed"));
        assert!(freed > &read, "${id} freed at {freed} before last read {read}");
    }
}

#[test]
fn scan_loop_satisfies_the_jump_invariants() {
    let program = emit(&scan_loop());

    check_defs_before_uses(&program);
    check_jump_soundness(&program);
    check_debug_coverage(&program);

    // Exactly one backward jump, targeting the first body instruction.
    let (pc, jmp) = program
        .instructions
        .iter()
        .enumerate()
        .find(|(_, i)| i.opcode == Opcode::JmpTrue)
        .expect("loop emits a backward JmpTrue");
    match jmp.inputs.as_slice() {
        [Operand::Array(_), Operand::Int(target)] => {
            assert!((*target as usize) < pc, "JmpTrue must jump backward");
        }
        other => panic!("malformed JmpTrue operands {other:?}"),
    }

    // The scan history is stacked along the requested axis after the loop.
    let stack = program
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::SequenceStack)
        .expect("scan output is stacked");
    assert_eq!(stack.inputs[1], Operand::Int(0));
}

#[test]
fn emission_is_deterministic_across_processes_worth_of_state() {
    let first = emit(&feed_forward());
    let second = emit(&feed_forward());
    assert_eq!(first, second);

    let first_loop = emit(&scan_loop());
    let second_loop = emit(&scan_loop());
    assert_eq!(first_loop, second_loop);
}

#[test]
fn serialization_round_trip_preserves_the_program() {
    let program = emit(&scan_loop());
    let encoded = serde_json::to_string(&program).expect("program serializes");
    let decoded: Program = serde_json::from_str(&encoded).expect("program deserializes");
    assert_eq!(decoded, program);
}

#[test]
fn rank_two_int_constant_scenario() {
    let mut builder = ModelBuilder::new();
    let y = builder.output("y");
    builder.node(
        "const0",
        Op::Constant {
            value: TensorData::new(
                DType::I64,
                vec![2, 3],
                Data::Ints(vec![1, 2, 3, 4, 5, 6]),
            ),
            host: false,
        },
        &[],
        &[y],
    );
    let program = emit(&builder.finish());

    assert_eq!(program.instructions[0].opcode, Opcode::IntConstant);
    assert_eq!(
        program.instructions[0].inputs,
        vec![
            Operand::Longs(vec![1, 2, 3, 4, 5, 6]),
            Operand::Int(DType::I64.code()),
            Operand::Ints(vec![2, 3]),
            Operand::Int(0),
        ]
    );
}

#[test]
fn program_listing_is_readable() {
    let program = emit(&feed_forward());
    let listing = program.to_string();
    assert!(listing.contains("Gemm("));
    assert!(listing.contains("# Softmax(prob0)"));
}
