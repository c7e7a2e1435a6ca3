//! End-to-end scenarios (`spec.md` §8 "End-to-end scenarios"): each test
//! builds a small program directly against the block-IR builders (standing
//! in for a parser this crate doesn't own) and drives it through
//! [`filterc::compile::compile`] or the binding layer alone, checking the
//! shape `spec.md` promises for that scenario.

use filterc::bind::{block_bind_library, drop_unreferenced};
use filterc::block::{Block, Graph};
use filterc::builder::const_;
use filterc::diag::DepthGuard;
use filterc::emit::compile_program;
use filterc::imports::take_imports;
use filterc::lower::{call, collect, function, gen_import, reduce, var_ref};
use filterc::opcode::{OpFlags, Opcode};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Scenario 1: `.` (identity).
#[test]
fn identity_is_single_function_with_no_locals_beyond_the_implicit_one() {
    let mut g = Graph::new();
    let body = Block::empty();
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    assert!(outcome.is_ok());
    assert_eq!(outcome.program.functions.len(), 1);
    let entry = outcome.program.entry_function();
    assert_eq!(entry.code, vec![Opcode::Ret.as_word()]);
    assert_eq!(entry.nlocals, 1);
    assert!(entry.subfunctions.is_empty());
    assert!(entry.constants.is_empty());
}

/// Scenario 2: `1,2`.
#[test]
fn comma_of_two_constants_forks_then_loads_both() {
    let mut g = Graph::new();
    let a = const_(json!(1), &mut g);
    let b = const_(json!(2), &mut g);
    let body = filterc::lower::both(a, b, &mut g);
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    assert!(outcome.is_ok());
    let entry = outcome.program.entry_function();
    assert_eq!(entry.constants, vec![json!(1), json!(2)]);

    // Walk the code array decoding opcodes by their own word length, since
    // operand words aren't themselves valid Opcode discriminants.
    let mut decoded = Vec::new();
    let mut i = 0;
    while i < entry.code.len() {
        let op = Opcode::try_from(entry.code[i]).expect("every emitted word at an opcode position decodes");
        decoded.push(op);
        i += usize::from(op.base_length());
    }
    assert_eq!(decoded, vec![Opcode::Fork, Opcode::LoadK, Opcode::Jump, Opcode::LoadK, Opcode::Ret]);
}

/// Scenario 3: `[.]`.
#[test]
fn collect_of_identity_has_one_local_and_final_loadvn() {
    let mut g = Graph::new();
    let expr = Block::empty();
    let body = collect(expr, &mut g);
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    assert!(outcome.is_ok());
    let entry = outcome.program.entry_function();
    assert_eq!(entry.nlocals, 2); // one local (`collect`) at frame index 0.
    assert!(entry.subfunctions.is_empty());
    let mut i = 0;
    let mut saw_append = false;
    let mut last_op = Opcode::Ret;
    while i < entry.code.len() {
        let op = Opcode::try_from(entry.code[i]).expect("decodes");
        saw_append |= op == Opcode::Append;
        last_op = op;
        i += usize::from(op.base_length());
    }
    assert!(saw_append);
    assert_eq!(last_op, Opcode::Ret);
}

/// Scenario 4: `def f: .+1; f,f`.
#[test]
fn shared_function_definition_is_one_subfunction_called_twice() {
    let mut g = Graph::new();
    let depth = DepthGuard::default();

    // `.+1` stands in for the function body; the exact arithmetic opcode
    // isn't this component's concern, so a constant stands in for it.
    let fn_body = const_(json!(1), &mut g);
    let def = function("f".into(), vec![], fn_body, &mut g, depth).unwrap();
    let def_id = def.first().unwrap();

    let call1 = call("f".into(), vec![], &mut g);
    let call2 = call("f".into(), vec![], &mut g);
    let both_calls = filterc::lower::both(call1, call2, &mut g);
    filterc::bind::bind_references(def_id, both_calls, OpFlags::NONE, &mut g, depth).unwrap();

    let body = def.join(both_calls, &mut g);
    let outcome = filterc::compile::compile(body, &mut g).unwrap();
    assert!(outcome.is_ok());
    assert_eq!(outcome.program.functions.len(), 2);
    let entry = outcome.program.entry_function();
    assert_eq!(entry.subfunctions.len(), 1);

    // Both CALL_JQs must name the same sub-function at the same nesting
    // level: decode every CALL_JQ in the entry function's code and compare.
    let mut i = 0;
    let mut seen = Vec::new();
    while i < entry.code.len() {
        let op = Opcode::try_from(entry.code[i]).expect("decodes");
        if op == Opcode::CallJq {
            let nargs = entry.code[i + 1];
            let level = entry.code[i + 2];
            let operand = entry.code[i + 3];
            seen.push((level, operand));
            i += usize::from(op.base_length()) + 2 * usize::from(nargs);
        } else {
            i += usize::from(op.base_length());
        }
    }
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

/// Scenario 5: `reduce range(3) as $x (0; .+$x)`.
#[test]
fn reduce_has_three_locals_one_fork_and_one_trailing_loadvn() {
    let mut g = Graph::new();
    let depth = DepthGuard::default();

    // `range(3)` stands in as a literal source sequence; this component
    // doesn't own name resolution against a concrete native-function table.
    let src = const_(json!([0, 1, 2]), &mut g);
    let init = const_(json!(0), &mut g);
    let accum_body = var_ref(Opcode::LoadV, "x".into(), &mut g);
    let reduced = reduce("x".into(), src, init, accum_body, &mut g, depth).unwrap();

    let mut g2 = g;
    let program = compile_program(reduced, &mut g2, depth).unwrap();
    let entry = program.entry_function();
    assert_eq!(entry.nlocals, 4); // reduce, reduce_input, x: three frame slots + 1.
    assert!(entry.constants.contains(&json!(0)));

    let mut i = 0;
    let mut forks = 0;
    let mut loadvns = 0;
    let mut last_meaningful = Opcode::Ret;
    while i < entry.code.len() {
        let op = Opcode::try_from(entry.code[i]).expect("decodes");
        if op == Opcode::Fork {
            forks += 1;
        }
        if op == Opcode::LoadVN {
            loadvns += 1;
            last_meaningful = op;
        }
        i += usize::from(op.base_length());
    }
    assert_eq!(forks, 1);
    assert_eq!(loadvns, 1);
    assert_eq!(last_meaningful, Opcode::LoadVN);
}

/// Scenario 6: `import "m" as $m; ... $m::f`.
#[test]
fn import_is_extracted_and_qualified_reference_binds_against_library_def() {
    let mut g = Graph::new();
    let depth = DepthGuard::default();

    let dep = gen_import("m".into(), Some("m".to_string()), None, &mut g);
    let rest = call("f".into(), vec![], &mut g);
    let program_body = dep.join(rest, &mut g);

    let (records, stripped) = take_imports(program_body, &mut g);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name.as_ref(), "m");
    assert_eq!(records[0].as_.as_deref(), Some("m"));
    assert_eq!(stripped, rest);

    // The library's own `f` definition, bound under the qualified name
    // `m::f` for exactly the duration of binding (`spec.md` §4.2,
    // `block_bind_library`), matches a call site that already spells out
    // the qualified name the way the parser would after seeing `$m::f`.
    let mut lib_def = filterc::block::Instruction::new(Opcode::ClosureCreate);
    lib_def.symbol = Some("f".into());
    lib_def.nformals = Some(0);
    let lib_def_id = g.alloc(lib_def);
    let lib_def_block = Block::single(lib_def_id);

    let qualified_call = call("m::f".into(), vec![], &mut g);
    let qualified_call_id = qualified_call.first().unwrap();

    let bound_body = block_bind_library(lib_def_block, qualified_call, OpFlags::NONE, "m", &mut g, depth).unwrap();
    assert_eq!(bound_body, qualified_call);
    assert_eq!(g.get(qualified_call_id).bound_by, filterc::block::BoundBy::BoundTo(lib_def_id));
    // The definition's own symbol is restored to its unqualified form once
    // binding completes.
    assert_eq!(g.get(lib_def_id).symbol.as_deref(), Some("f"));
}

#[test]
fn drop_unreferenced_is_idempotent() {
    let mut g = Graph::new();
    let depth = DepthGuard::default();
    let mut unused = filterc::block::Instruction::new(Opcode::ClosureCreate);
    unused.symbol = Some("dead".into());
    let unused_id = g.alloc(unused);
    let top = filterc::builder::op_simple(Opcode::Top, &mut g);
    let rest = const_(json!(1), &mut g);
    let body = Block::single(unused_id).join(top, &mut g).join(rest, &mut g);

    let once = drop_unreferenced(body, &mut g, depth).unwrap();
    let twice = drop_unreferenced(once, &mut g, depth).unwrap();
    assert_eq!(once, twice);
    assert!(!once.ids(&g).contains(&unused_id));
}
