//! Code emission (`spec.md` §4.5): assigns bytecode positions, allocates
//! local-variable frame slots, closure-parameter slots and sub-function
//! indices, recursively compiles nested function bodies, and emits opcodes
//! and operands into flat 16-bit arrays.
//!
//! Grounded on `ouros::bytecode::builder::CodeBuilder`'s "emit, then patch
//! what needed patching" shape, adapted from a single flat byte buffer to
//! the tree of per-function word arrays `spec.md` §3's "Bytecode function"
//! describes (`code`, constant pool, sub-function table, parent pointer).

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::block::{Block, BoundBy, ConstValue, FuncId, Graph, Imm, InstrId, NativeFunc};
use crate::diag::{CompileError, DepthGuard, Symbol};
use crate::opcode::{OpFlags, Opcode};
use crate::tracer::{CompileTracer, NoopTracer};

/// Bit set on a `CALL_JQ`/`CALL_REF` operand's binder-index word when that
/// index names a slot in the *sub-function table* (a freshly created
/// closure template) rather than a *local closure-parameter* slot
/// (`spec.md` §4.5: "`binder_index | NEWCLOSURE_FLAG_if_user_fn`"). The
/// concrete bit position is this crate's own encoding choice — `spec.md`
/// names the flag but not its value — recorded in `DESIGN.md`.
pub const NEWCLOSURE_FLAG: u16 = 0x8000;

/// Per-function debug metadata (`spec.md` §3 "Bytecode function": "debug
/// info (function name, parameter names, local names)").
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DebugInfo {
    pub name: Option<Symbol>,
    pub params: Vec<Symbol>,
    pub locals: Vec<Symbol>,
}

/// One compiled function (`spec.md` §3 "Bytecode function", §6 "Bytecode
/// consumer"). `subfunctions`/`parent` are indices into the owning
/// [`CompiledProgram`]'s flat `functions` table rather than owned
/// recursive values or raw pointers, side-stepping the aliasing a literal
/// parent-pointer tree would need in safe Rust; the information content is
/// identical (`DESIGN.md` "Compiled-function representation").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompiledFunction {
    pub parent: Option<FuncId>,
    pub nclosures: u32,
    pub nlocals: u32,
    pub code: Vec<u16>,
    pub constants: Vec<ConstValue>,
    pub subfunctions: Vec<FuncId>,
    pub debug: DebugInfo,
}

/// The shared native-function table (`spec.md` §3 "a pointer to a globals
/// record (native-function table and their names)"). One instance per
/// compiled program; every [`CompiledFunction`] implicitly shares it.
///
/// Keyed by native name so two `CLOSURE_CREATE_C` binders for the same
/// builtin (e.g. the same native reused across two `cbinding` scopes) share
/// one globals-table slot rather than duplicating it; `IndexMap` keeps
/// registration order stable so a slot's position — the `cfunc_index` Pass C
/// writes into `CALL_BUILTIN` — never shifts once assigned. Grounded on
/// `ouros::object`'s use of `indexmap::IndexMap` for its own order-preserving
/// name tables.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Globals {
    pub natives: IndexMap<Symbol, std::rc::Rc<NativeFunc>>,
}

/// The full output of one `compile()` call: a flat table of functions plus
/// the shared globals record and the entry function's index.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompiledProgram {
    pub functions: Vec<CompiledFunction>,
    pub entry: FuncId,
    pub globals: Globals,
}

impl CompiledProgram {
    #[must_use]
    pub fn entry_function(&self) -> &CompiledFunction {
        &self.functions[self.entry.0 as usize]
    }
}

/// Cross-function lookup tables built up as layout proceeds, keyed by the
/// binder instruction's id (unique across the whole graph, so one shared
/// map serves every function without per-function scoping machinery).
#[derive(Debug, Default)]
struct Layout {
    frame_index: AHashMap<InstrId, u32>,
    closure_index: AHashMap<InstrId, u32>,
    subfn_index: AHashMap<InstrId, u32>,
    native_index: AHashMap<InstrId, u32>,
}

/// Compiles `body` (already bound, dead-code-pruned, and call-expanded)
/// into a [`CompiledProgram`] (`spec.md` §4.5, §6 "Compile entry point").
pub fn compile_program(body: Block, g: &mut Graph, depth: DepthGuard) -> Result<CompiledProgram, CompileError> {
    compile_program_with_tracer(body, g, depth, &mut NoopTracer)
}

/// Like [`compile_program`], but reports layout/emission progress through
/// `tracer` (`SPEC_FULL.md` "Instrumentation seam"). With [`NoopTracer`]
/// this monomorphizes to exactly the same code `compile_program` emits.
pub fn compile_program_with_tracer<T: CompileTracer>(
    body: Block,
    g: &mut Graph,
    depth: DepthGuard,
    tracer: &mut T,
) -> Result<CompiledProgram, CompileError> {
    let mut program = CompiledProgram { functions: Vec::new(), entry: FuncId(0), globals: Globals::default() };
    let mut layout = Layout::default();
    let entry = compile_function(body, None, &[], None, g, &mut program, &mut layout, depth, tracer)?;
    program.entry = entry;
    Ok(program)
}

/// Compiles one function body: Pass A (layout), Pass B (recursive compile
/// of nested `CLOSURE_CREATE`s), Pass C (emit). `formals` are this
/// function's own `CLOSURE_PARAM` instructions, already placed in its
/// defining `CLOSURE_CREATE`'s `arglist`.
fn compile_function<T: CompileTracer>(
    body: Block,
    name: Option<Symbol>,
    formals: &[InstrId],
    parent: Option<FuncId>,
    g: &mut Graph,
    program: &mut CompiledProgram,
    layout: &mut Layout,
    depth: DepthGuard,
    tracer: &mut T,
) -> Result<FuncId, CompileError> {
    let depth = depth.enter()?;
    let func_id = FuncId(u32::try_from(program.functions.len()).expect("function table overflow"));
    program.functions.push(CompiledFunction {
        parent,
        nclosures: u32::try_from(formals.len()).unwrap_or(u32::MAX),
        nlocals: 0,
        code: Vec::new(),
        constants: Vec::new(),
        subfunctions: Vec::new(),
        debug: DebugInfo { name, params: Vec::new(), locals: Vec::new() },
    });

    let mut param_names = Vec::with_capacity(formals.len());
    for (i, &param_id) in formals.iter().enumerate() {
        g.get_mut(param_id).compiled = Some(func_id);
        layout.closure_index.insert(param_id, u32::try_from(i).expect("closure arity fits u32"));
        if let Some(sym) = g.get(param_id).symbol.clone() {
            param_names.push(sym);
        }
    }
    program.functions[func_id.index()].debug.params = param_names;

    let full_body = body.join(crate::builder::op_simple(Opcode::Ret, g), g);

    // Pass A: layout.
    let mut pos: u32 = 0;
    let mut next_frame: u32 = 0;
    let mut max_local: i64 = -1;
    let mut local_names: Vec<Symbol> = Vec::new();
    let mut next_subfn: u32 = 0;
    let mut pending_children: Vec<InstrId> = Vec::new();

    for id in full_body.ids(g) {
        g.get_mut(id).compiled = Some(func_id);
        let op = g.get(id).op;

        let nargs = if op == Opcode::CallJq {
            match g.get(id).imm.clone() {
                Imm::Int(n) => u32::try_from(n).unwrap_or(0),
                _ => return Err(CompileError::Internal("CALL_JQ reached layout without an argument count")),
            }
        } else {
            0
        };
        let length = u32::from(op.base_length()) + 2 * nargs;
        pos += length;
        g.get_mut(id).bytecode_pos = pos;

        if op.flags().contains(OpFlags::HAS_VARIABLE) && g.get(id).bound_by == BoundBy::SelfBinder {
            layout.frame_index.insert(id, next_frame);
            if let Some(sym) = g.get(id).symbol.clone() {
                local_names.push(sym);
            }
            max_local = max_local.max(i64::from(next_frame));
            next_frame += 1;
        }

        match op {
            Opcode::ClosureCreate => {
                layout.subfn_index.insert(id, next_subfn);
                next_subfn += 1;
                pending_children.push(id);
            }
            Opcode::ClosureCreateC => {
                if !layout.native_index.contains_key(&id) {
                    let Imm::Native(nf) = g.get(id).imm.clone() else {
                        return Err(CompileError::Internal("CLOSURE_CREATE_C without a native descriptor"));
                    };
                    let idx = match program.globals.natives.get_index_of(&nf.name) {
                        Some(existing) => u32::try_from(existing).expect("native table fits u32"),
                        None => {
                            let idx = u32::try_from(program.globals.natives.len()).expect("native table fits u32");
                            program.globals.natives.insert(nf.name.clone(), nf);
                            idx
                        }
                    };
                    layout.native_index.insert(id, idx);
                }
            }
            _ => {}
        }
    }

    let nlocals = u32::try_from(max_local + 2).expect("nlocals fits u32");
    {
        let func = &mut program.functions[func_id.index()];
        func.nlocals = nlocals;
        func.debug.locals = local_names;
    }
    tracer.on_function_laid_out(nlocals, program.functions[func_id.index()].nclosures);

    // Pass B: recursively compile nested functions, in encounter order —
    // this determines the order they're pushed into `subfunctions`, which
    // must match the indices assigned above one-to-one (`spec.md` §8:
    // "every CLOSURE_CREATE child appears exactly once in its parent's
    // subfunctions table at its assigned index").
    for child_id in pending_children {
        let child_formals = g.get(child_id).arglist.arg_ids(g);
        let child_body = g.get(child_id).subfn;
        let child_name = g.get(child_id).symbol.clone();
        let child_func_id = compile_function(child_body, child_name, &child_formals, Some(func_id), g, program, layout, depth, tracer)?;
        program.functions[func_id.index()].subfunctions.push(child_func_id);
    }

    // Pass C: emit.
    for id in full_body.ids(g) {
        emit_instruction(id, func_id, g, program, layout)?;
        tracer.on_emit(id, g.get(id).op);
    }

    Ok(func_id)
}

fn push_const(func: &mut CompiledFunction, value: ConstValue) -> u16 {
    let idx = func.constants.len();
    func.constants.push(value);
    u16::try_from(idx).expect("constant pool index fits u16")
}

fn nesting_level(mut from: FuncId, target: FuncId, program: &CompiledProgram) -> Result<u32, CompileError> {
    let mut level = 0u32;
    while from != target {
        from = program.functions[from.index()].parent.ok_or(CompileError::Internal("binder's owning function is unreachable from the referencing function"))?;
        level += 1;
    }
    Ok(level)
}

/// Resolves a call target (or call-argument reference) binder to its
/// `(nesting_level, operand)` pair, where `operand` already carries
/// [`NEWCLOSURE_FLAG`] when the binder is a `CLOSURE_CREATE` template
/// rather than a `CLOSURE_PARAM` local (`spec.md` §4.5 Pass C, `CALL_JQ`).
fn resolve_closure_operand(binder_id: InstrId, current_func: FuncId, g: &Graph, layout: &Layout, program: &CompiledProgram) -> Result<(u32, u16), CompileError> {
    let owner = g.get(binder_id).compiled.ok_or(CompileError::Internal("call binder was never laid out"))?;
    let level = nesting_level(current_func, owner, program)?;
    match g.get(binder_id).op {
        Opcode::ClosureCreate => {
            let idx = *layout.subfn_index.get(&binder_id).ok_or(CompileError::Internal("CLOSURE_CREATE binder missing a sub-function index"))?;
            let idx = u16::try_from(idx).expect("sub-function index fits u16");
            Ok((level, idx | NEWCLOSURE_FLAG))
        }
        Opcode::ClosureParam => {
            let idx = *layout.closure_index.get(&binder_id).ok_or(CompileError::Internal("CLOSURE_PARAM binder missing a closure index"))?;
            Ok((level, u16::try_from(idx).expect("closure index fits u16")))
        }
        _ => Err(CompileError::Internal("call binder is not closure-valued")),
    }
}

/// Resolves a variable reference (`STOREV`/`LOADV`/`LOADVN`/`APPEND`) to
/// its `(nesting_level, frame_index)` pair.
fn resolve_local_operand(binder_id: InstrId, current_func: FuncId, g: &Graph, layout: &Layout, program: &CompiledProgram) -> Result<(u32, u16), CompileError> {
    let owner = g.get(binder_id).compiled.ok_or(CompileError::Internal("variable binder was never laid out"))?;
    let level = nesting_level(current_func, owner, program)?;
    let idx = *layout.frame_index.get(&binder_id).ok_or(CompileError::Internal("variable binder missing a frame index"))?;
    Ok((level, u16::try_from(idx).expect("frame index fits u16")))
}

fn emit_instruction(id: InstrId, func_id: FuncId, g: &Graph, program: &mut CompiledProgram, layout: &Layout) -> Result<(), CompileError> {
    let op = g.get(id).op;

    match op {
        Opcode::CallBuiltin => {
            let Imm::Int(nargs) = g.get(id).imm.clone() else {
                return Err(CompileError::Internal("CALL_BUILTIN without an argument count"));
            };
            let BoundBy::BoundTo(binder_id) = g.get(id).bound_by else {
                return Err(CompileError::Internal("CALL_BUILTIN without a resolved native binder"));
            };
            let cfunc_index = *layout.native_index.get(&binder_id).ok_or(CompileError::Internal("native binder missing a globals index"))?;
            let func = &mut program.functions[func_id.index()];
            func.code.push(op.as_word());
            func.code.push(u16::try_from(nargs).expect("arg count fits u16"));
            func.code.push(u16::try_from(cfunc_index).expect("native index fits u16"));
        }
        Opcode::CallJq => {
            let Imm::Int(nargs) = g.get(id).imm.clone() else {
                return Err(CompileError::Internal("CALL_JQ without an argument count"));
            };
            let BoundBy::BoundTo(binder_id) = g.get(id).bound_by else {
                return Err(CompileError::Internal("CALL_JQ without a resolved binder"));
            };
            let (level, operand) = resolve_closure_operand(binder_id, func_id, g, layout, program)?;
            let func = &mut program.functions[func_id.index()];
            func.code.push(op.as_word());
            func.code.push(u16::try_from(nargs).expect("arg count fits u16"));
            func.code.push(u16::try_from(level).expect("nesting level fits u16"));
            func.code.push(operand);
            drop(func);

            for arg_id in g.get(id).arglist.arg_ids(g) {
                let BoundBy::BoundTo(arg_binder) = g.get(arg_id).bound_by else {
                    return Err(CompileError::Internal("call argument CLOSURE_REF without a resolved binder"));
                };
                let (arg_level, arg_operand) = resolve_closure_operand(arg_binder, func_id, g, layout, program)?;
                let func = &mut program.functions[func_id.index()];
                func.code.push(u16::try_from(arg_level).expect("nesting level fits u16"));
                func.code.push(arg_operand);
            }
        }
        Opcode::ClosureCreateC => {
            // Never emitted as code; registered into `globals` during Pass A.
        }
        Opcode::ClosureCreate => {
            let subfn_index = *layout.subfn_index.get(&id).ok_or(CompileError::Internal("CLOSURE_CREATE missing its own sub-function index"))?;
            let func = &mut program.functions[func_id.index()];
            func.code.push(op.as_word());
            func.code.push(u16::try_from(subfn_index).expect("sub-function index fits u16"));
        }
        _ if op.flags().contains(OpFlags::HAS_BRANCH) => {
            // The operand word is the absolute landing position: the target
            // block's own `bytecode_pos` (already "just past" its last
            // instruction, per layout) *is* that landing address, so no
            // further relative adjustment happens here.
            let Imm::Target(target) = g.get(id).imm.clone() else {
                return Err(CompileError::Internal("branch instruction without a target"));
            };
            let this_pos = g.get(id).bytecode_pos - u32::from(op.base_length());
            let target_pos = g.get(target).bytecode_pos;
            if target_pos <= this_pos {
                return Err(CompileError::Internal("branch target is not strictly forward"));
            }
            let landing = u16::try_from(target_pos).expect("bytecode position fits u16");
            let func = &mut program.functions[func_id.index()];
            func.code.push(op.as_word());
            func.code.push(landing);
        }
        _ if op.flags().contains(OpFlags::HAS_CONSTANT) => {
            let Imm::Const(value) = g.get(id).imm.clone() else {
                return Err(CompileError::Internal("HAS_CONSTANT instruction without a constant"));
            };
            let func = &mut program.functions[func_id.index()];
            let pool_index = push_const(func, value);
            func.code.push(op.as_word());
            func.code.push(pool_index);
        }
        _ if op.flags().contains(OpFlags::HAS_VARIABLE) => {
            let binder_id = match g.get(id).bound_by {
                BoundBy::SelfBinder => id,
                BoundBy::BoundTo(b) => b,
                BoundBy::Unbound => return Err(CompileError::Internal("HAS_VARIABLE instruction left unbound")),
            };
            let (level, frame_index) = resolve_local_operand(binder_id, func_id, g, layout, program)?;
            let func = &mut program.functions[func_id.index()];
            func.code.push(op.as_word());
            func.code.push(u16::try_from(level).expect("nesting level fits u16"));
            func.code.push(frame_index);
        }
        _ => {
            let func = &mut program.functions[func_id.index()];
            func.code.push(op.as_word());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{const_, op_simple};
    use crate::lower::{both, collect};
    use serde_json::json;

    #[test]
    fn identity_program_is_single_function_ret_only() {
        let mut g = Graph::new();
        let body = Block::empty();
        let program = compile_program(body, &mut g, DepthGuard::default()).unwrap();
        assert_eq!(program.functions.len(), 1);
        let entry = program.entry_function();
        assert_eq!(entry.code, vec![Opcode::Ret.as_word()]);
        assert_eq!(entry.nlocals, 1);
        assert!(entry.subfunctions.is_empty());
        assert!(entry.constants.is_empty());
    }

    #[test]
    fn both_constants_emits_fork_then_two_loadks() {
        let mut g = Graph::new();
        let a = const_(json!(1), &mut g);
        let b = const_(json!(2), &mut g);
        let body = both(a, b, &mut g);
        let program = compile_program(body, &mut g, DepthGuard::default()).unwrap();
        let entry = program.entry_function();
        assert_eq!(entry.constants, vec![json!(1), json!(2)]);
        assert_eq!(entry.code[0], Opcode::Fork.as_word());
        assert_eq!(entry.code[2], Opcode::LoadK.as_word());
    }

    #[test]
    fn branch_offsets_are_strictly_positive() {
        let mut g = Graph::new();
        let a = const_(json!(1), &mut g);
        let b = const_(json!(2), &mut g);
        let body = both(a, b, &mut g);
        let program = compile_program(body, &mut g, DepthGuard::default()).unwrap();
        let entry = program.entry_function();
        // FORK's offset word sits right after its opcode word.
        assert!(entry.code[1] > 0);
    }

    #[test]
    fn collect_allocates_one_local_and_no_subfunctions() {
        let mut g = Graph::new();
        let expr = op_simple(Opcode::Dup, &mut g);
        let body = collect(expr, &mut g);
        let program = compile_program(body, &mut g, DepthGuard::default()).unwrap();
        let entry = program.entry_function();
        assert_eq!(entry.nlocals, 2); // one local at frame index 0: maxvar(0) + 2
        assert!(entry.subfunctions.is_empty());
    }

    #[test]
    fn codelen_equals_sum_of_encoded_lengths() {
        let mut g = Graph::new();
        let a = const_(json!(1), &mut g);
        let b = const_(json!(2), &mut g);
        let body = both(a, b, &mut g);
        let ids = body.ids(&g);
        let program = compile_program(body, &mut g, DepthGuard::default()).unwrap();
        let entry = program.entry_function();
        let expected: u32 = ids.iter().map(|&id| u32::from(g.get(id).op.base_length())).sum::<u32>() + u32::from(Opcode::Ret.base_length());
        assert_eq!(entry.code.len() as u32, expected);
    }
}
