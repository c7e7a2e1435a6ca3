//! Lowering of surface control-flow forms to the core opcode set
//! (`spec.md` §4.3 "Lowering of surface forms").
//!
//! Every generator here takes ownership of its block arguments (`spec.md`
//! §5: "Ownership of argument blocks passed into builders transfers to the
//! builder") and returns a single assembled [`Block`]. Forward branch
//! targets are wired with [`op_targetlater`]/[`set_target`] rather than
//! guessed up front, the same two-step pattern `ouros::bytecode::builder`
//! uses for `emit_jump`/`patch_jump`.

use std::rc::Rc;

use serde_json::json;

use crate::bind::bind_references;
use crate::block::{Block, BoundBy, Graph, Imm, Instruction, InstrId, NativeFunc};
use crate::builder::{const_, join, op_bound, op_simple, op_target, op_targetlater, op_unbound, op_var_fresh, set_target};
use crate::diag::{CompileError, DepthGuard, Symbol};
use crate::opcode::{OpFlags, Opcode};

/// `both(a, b)`: produces the values of `a` then of `b` (`spec.md` §4.3).
///
/// `FORK` sets its backtrack target to land right after `a`'s trailing
/// `JUMP` — i.e. at the start of `b` — then falls through into `a`. Once
/// `a`'s own value is produced, `JUMP` skips over `b` to the end; on
/// backtrack into `FORK`'s frame, control resumes at `b`.
#[must_use]
pub fn both(a: Block, b: Block, g: &mut Graph) -> Block {
    let fork = op_targetlater(Opcode::Fork, g);
    let jump = op_targetlater(Opcode::Jump, g);
    set_target(jump, b, g);
    set_target(fork, jump, g);
    join(join(join(fork, a, g), jump, g), b, g)
}

/// `try(e, h)`: error-handling (`spec.md` §4.3). `FORK_OPT` behaves like
/// `FORK` but its backtrack frame is also consulted by the VM when `e`
/// raises an error, running `h` in that case; on ordinary (non-error)
/// backtrack out of `e` it simply propagates emptiness, per spec.
#[must_use]
pub fn try_(e: Block, h: Block, g: &mut Graph) -> Block {
    let fork_opt = op_targetlater(Opcode::ForkOpt, g);
    let jump = op_targetlater(Opcode::Jump, g);
    set_target(jump, h, g);
    set_target(fork_opt, jump, g);
    join(join(join(fork_opt, e, g), jump, g), h, g)
}

/// `cond(c, t, f)`: duplicates the input, runs `c`, then branches
/// (`spec.md` §4.3). Each arm begins with a `POP` discarding `c`'s boolean
/// result and ends with an unconditional jump past the other arm.
#[must_use]
pub fn cond(c: Block, t: Block, f: Block, g: &mut Graph) -> Block {
    let dup = op_simple(Opcode::Dup, g);
    let jump_f = op_targetlater(Opcode::JumpF, g);
    let pop_t = op_simple(Opcode::Pop, g);
    let jump_end = op_targetlater(Opcode::Jump, g);
    let pop_f = op_simple(Opcode::Pop, g);

    set_target(jump_end, f, g);
    set_target(jump_f, jump_end, g);

    join(
        join(
            join(join(join(join(dup, c, g), jump_f, g), pop_t, g), t, g), jump_end, g,
        ),
        join(pop_f, f, g),
        g,
    )
}

/// `a and b` desugars to `cond(a, cond(b, true, false), false)`
/// (`spec.md` §4.3 "and/or").
#[must_use]
pub fn and(a: Block, b: Block, g: &mut Graph) -> Block {
    let t = const_(json!(true), g);
    let f1 = const_(json!(false), g);
    let f2 = const_(json!(false), g);
    let inner = cond(b, t, f1, g);
    cond(a, inner, f2, g)
}

/// `a or b` desugars to `cond(a, true, cond(b, true, false))`
/// (`spec.md` §4.3 "and/or").
#[must_use]
pub fn or(a: Block, b: Block, g: &mut Graph) -> Block {
    let t1 = const_(json!(true), g);
    let t2 = const_(json!(true), g);
    let f = const_(json!(false), g);
    let inner = cond(b, t2, f, g);
    cond(a, t1, inner, g)
}

/// `a // b` (defined-or, `spec.md` §4.3): a fresh local flag `found` tracks
/// whether `a` produced any value. On exhaustion of `a`, `found` is tested;
/// if set, the whole expression simply backtracks further (propagating
/// nothing); otherwise `b` runs.
#[must_use]
pub fn defined_or(a: Block, b: Block, g: &mut Graph) -> Block {
    let found_sym = g.gensym("found");
    let found_binder = op_var_fresh(Opcode::StoreV, found_sym, g);
    let found_id = found_binder.first().expect("op_var_fresh produces a single instruction");

    let init = join(const_(json!(false), g), found_binder, g);

    let fork = op_targetlater(Opcode::Fork, g);
    let set_true = join(const_(json!(true), g), op_bound(Opcode::StoreV, found_id, g), g);
    let jump_end = op_targetlater(Opcode::Jump, g);

    let load_found = op_bound(Opcode::LoadV, found_id, g);
    let jump_f = op_targetlater(Opcode::JumpF, g);
    let pop_not_found = op_simple(Opcode::Pop, g);
    let backtrack = op_simple(Opcode::Backtrack, g);
    let pop_found = op_simple(Opcode::Pop, g);

    set_target(jump_end, b, g);
    set_target(fork, jump_end, g);
    set_target(jump_f, backtrack, g);

    let check_and_b = join(
        join(join(join(join(load_found, jump_f, g), pop_not_found, g), backtrack, g), pop_found, g),
        b,
        g,
    );

    join(join(join(join(init, fork, g), a, g), set_true, g), join(jump_end, check_and_b, g), g)
}

/// `[expr]` comprehensions (`spec.md` §4.3 "collect"): a fresh local
/// `collect := []`; `FORK` retries the loop; each value of `expr` is
/// appended, then the loop explicitly backtracks to ask `expr` for its
/// next value; on exhaustion, `LOADVN collect` emits the built array.
#[must_use]
pub fn collect(expr: Block, g: &mut Graph) -> Block {
    let collect_sym = g.gensym("collect");
    let collect_binder = op_var_fresh(Opcode::StoreV, collect_sym, g);
    let collect_id = collect_binder.first().expect("op_var_fresh produces a single instruction");

    let init = join(const_(json!([]), g), collect_binder, g);
    let fork = op_targetlater(Opcode::Fork, g);
    let dup = op_simple(Opcode::Dup, g);
    let append = op_bound(Opcode::Append, collect_id, g);
    let backtrack = op_simple(Opcode::Backtrack, g);

    let loop_body = join(join(join(dup, expr, g), append, g), backtrack, g);
    set_target(fork, loop_body, g);

    let loadvn = op_bound(Opcode::LoadVN, collect_id, g);
    join(join(join(init, fork, g), loop_body, g), loadvn, g)
}

/// `reduce VAR as SRC (INIT; BODY)` (`spec.md` §4.3 "reduce"). Three fresh
/// locals: the accumulator `res`, a bookkeeping slot holding the original
/// `.` input (so `src` can run against it independently of whatever `body`
/// does to the accumulator), and `var` itself, which `body`'s free
/// references to `var`'s symbol are bound to here.
pub fn reduce(var_symbol: Symbol, src: Block, init: Block, body: Block, g: &mut Graph, depth: DepthGuard) -> Result<Block, CompileError> {
    let res_sym = g.gensym("reduce");
    let tmp_sym = g.gensym("reduce_input");

    let res_binder = op_var_fresh(Opcode::StoreV, res_sym, g);
    let res_id = res_binder.first().expect("op_var_fresh produces a single instruction");
    let tmp_binder = op_var_fresh(Opcode::StoreV, tmp_sym, g);
    let tmp_id = tmp_binder.first().expect("op_var_fresh produces a single instruction");
    let var_binder = op_var_fresh(Opcode::StoreV, var_symbol, g);
    let var_id = var_binder.first().expect("op_var_fresh produces a single instruction");

    bind_references(var_id, body, OpFlags::HAS_VARIABLE, g, depth)?;

    let dup0 = op_simple(Opcode::Dup, g);
    let init_seq = join(join(join(dup0, tmp_binder, g), init, g), res_binder, g);

    let fork = op_targetlater(Opcode::Fork, g);
    let load_tmp = op_bound(Opcode::LoadV, tmp_id, g);
    let load_res = op_bound(Opcode::LoadV, res_id, g);
    let store_res = op_bound(Opcode::StoreV, res_id, g);
    let backtrack = op_simple(Opcode::Backtrack, g);

    let loop_body = join(
        join(join(join(join(load_tmp, src, g), var_binder, g), load_res, g), body, g),
        join(store_res, backtrack, g),
        g,
    );
    set_target(fork, loop_body, g);

    let loadvn = op_bound(Opcode::LoadVN, res_id, g);
    Ok(join(join(join(init_seq, fork, g), loop_body, g), loadvn, g))
}

/// `foreach VAR as SRC (INIT; UPDATE; EXTRACT)` (`spec.md` §4.3 "foreach").
/// Unlike [`reduce`] — which only ever yields once, at the very end, via a
/// final `LOADVN` — `foreach` yields `extract`'s value on *every*
/// iteration: per `spec.md`, "each iteration also runs `ext` and yields its
/// value through a jump to an 'output' label". `FORK`'s backtrack target is
/// positioned just past the whole loop, same as [`reduce`]'s and
/// [`collect`]'s outer `FORK` — reached only once `src` itself has no
/// alternatives left to backtrack into, so zero `src` values falls straight
/// through to whatever follows with no output at all. The difference from
/// `reduce`/`collect` is that the loop body here does *not* end in an
/// unconditional self-`Backtrack`: it falls through after `extract`, the
/// same way [`both`]'s first alternative falls through into its trailing
/// `JUMP`, so this iteration's value actually reaches whatever consumes the
/// `foreach` expression. Further iterations happen when that consumer
/// eventually backtracks: that unwinds into whichever frame `src`'s own
/// compiled form pushed for its next alternative, re-entering the shared
/// loop body right after the `src` call rather than restarting it. The
/// loop body is wrapped in a [`try_`] whose handler swallows exactly the
/// string `"break"` and re-raises everything else via a call to `break`.
pub fn foreach(
    var_symbol: Symbol,
    src: Block,
    init: Block,
    update: Block,
    extract: Block,
    g: &mut Graph,
    depth: DepthGuard,
) -> Result<Block, CompileError> {
    let res_sym = g.gensym("foreach");
    let tmp_sym = g.gensym("foreach_input");

    let res_binder = op_var_fresh(Opcode::StoreV, res_sym, g);
    let res_id = res_binder.first().expect("op_var_fresh produces a single instruction");
    let tmp_binder = op_var_fresh(Opcode::StoreV, tmp_sym, g);
    let tmp_id = tmp_binder.first().expect("op_var_fresh produces a single instruction");
    let var_binder = op_var_fresh(Opcode::StoreV, var_symbol, g);
    let var_id = var_binder.first().expect("op_var_fresh produces a single instruction");

    bind_references(var_id, update, OpFlags::HAS_VARIABLE, g, depth)?;
    bind_references(var_id, extract, OpFlags::HAS_VARIABLE, g, depth)?;

    let dup0 = op_simple(Opcode::Dup, g);
    let init_seq = join(join(join(dup0, tmp_binder, g), init, g), res_binder, g);

    let fork = op_targetlater(Opcode::Fork, g);
    let load_tmp = op_bound(Opcode::LoadV, tmp_id, g);
    let load_res_for_update = op_bound(Opcode::LoadV, res_id, g);
    let store_res = op_bound(Opcode::StoreV, res_id, g);
    let load_res_for_extract = op_bound(Opcode::LoadV, res_id, g);

    let body_core = join(
        join(join(join(join(load_tmp, src, g), var_binder, g), load_res_for_update, g), update, g),
        join(join(store_res, load_res_for_extract, g), extract, g),
        g,
    );

    let handler = break_handler(g);
    let guarded = try_(body_core, handler, g);
    set_target(fork, guarded, g);

    Ok(join(join(init_seq, fork, g), guarded, g))
}

/// The `try`/`catch` handler `foreach` wraps its loop body in: tests the
/// raised value against the string `"break"`; on equality, the loop simply
/// backtracks (swallowing the break); otherwise the error is re-raised by
/// calling the `break` builtin on it. Grounded on `spec.md`'s literal
/// description; the equality test is expressed as a call to an ambient
/// two-argument comparison builtin (`_equal`), since the closed opcode set
/// §4.3 lists has no dedicated compare instruction — exactly as user-level
/// `==` itself must lower to a builtin call. See `DESIGN.md` under
/// "foreach break handling".
fn break_handler(g: &mut Graph) -> Block {
    let dup = op_simple(Opcode::Dup, g);
    let literal = const_(json!("break"), g);
    let is_break = call("_equal".into(), vec![CallArg::Closure(literal)], g);

    let jump_f = op_targetlater(Opcode::JumpF, g);
    let pop_true = op_simple(Opcode::Pop, g);
    let backtrack = op_simple(Opcode::Backtrack, g);
    let jump_end = op_targetlater(Opcode::Jump, g);
    let pop_false = op_simple(Opcode::Pop, g);
    let reraise = call("break".into(), vec![], g);

    set_target(jump_f, backtrack, g);

    let true_arm = join(join(pop_true, backtrack, g), jump_end, g);
    let false_arm = join(pop_false, reraise, g);
    set_target(jump_end, false_arm, g);

    join(join(join(dup, is_break, g), jump_f, g), join(true_arm, false_arm, g), g)
}

/// `subexp(a)` (`spec.md` §4.3): wraps `a` so the VM treats it as a
/// path-constructing expression.
#[must_use]
pub fn subexp(a: Block, g: &mut Graph) -> Block {
    let begin = op_simple(Opcode::SubexpBegin, g);
    let end = op_simple(Opcode::SubexpEnd, g);
    join(join(begin, a, g), end, g)
}

/// `def NAME(FORMALS): BODY` (`spec.md` §4.3 "function"). Each formal
/// becomes a self-bound `CLOSURE_PARAM` placeholder visible inside `body`
/// as a zero-arity call-pseudo binding; `body` is packaged as the
/// resulting `CLOSURE_CREATE`'s `subfn`, the formals as its `arglist`; the
/// definition self-binds so recursive calls inside `body` resolve to it.
pub fn function(name: Symbol, formals: Vec<Symbol>, body: Block, g: &mut Graph, depth: DepthGuard) -> Result<Block, CompileError> {
    let mut arglist = Block::empty();
    let mut param_ids: crate::block::ArgIds = crate::block::ArgIds::with_capacity(formals.len());
    for formal in formals {
        let param = op_var_fresh(Opcode::ClosureParam, formal, g);
        param_ids.push(param.first().expect("op_var_fresh produces a single instruction"));
        arglist = join(arglist, param, g);
    }

    let mut def = Instruction::new(Opcode::ClosureCreate);
    def.symbol = Some(name);
    def.bound_by = BoundBy::SelfBinder;
    def.nformals = Some(u32::try_from(param_ids.len()).unwrap_or(u32::MAX));
    let def_id = g.alloc(def);

    for param_id in &param_ids {
        bind_references(*param_id, body, OpFlags::IS_CALL_PSEUDO, g, depth)?;
    }
    // Recursive self-calls: `body` may already contain unbound CALL_JQs
    // naming this definition's own symbol.
    bind_references(def_id, body, OpFlags::NONE, g, depth)?;

    g.get_mut(def_id).arglist = arglist;
    g.get_mut(def_id).subfn = body;
    Ok(Block::single(def_id))
}

/// `lambda(body)` (`spec.md` §4.3): an anonymous, zero-formal function
/// named `@lambda`.
pub fn lambda(body: Block, g: &mut Graph, depth: DepthGuard) -> Result<Block, CompileError> {
    function("@lambda".into(), Vec::new(), body, g, depth)
}

/// An argument to [`call`]: either an existing closure passed through
/// unchanged, or a filter expression to be materialized as a fresh
/// `CLOSURE_CREATE` at the call site (`spec.md` §4.3 "call").
pub enum CallArg {
    Ref(InstrId),
    Closure(Block),
}

/// `NAME(ARGS)` (`spec.md` §4.3 "call"): an unbound `CALL_JQ` carrying
/// `args` as its `arglist`. Resolution of the target and expansion of the
/// arguments happens later, in [`crate::bind`] and [`crate::expand`].
#[must_use]
pub fn call(name: Symbol, args: Vec<CallArg>, g: &mut Graph) -> Block {
    let mut arglist = Block::empty();
    for arg in args {
        let piece = match arg {
            CallArg::Ref(id) => op_bound(Opcode::ClosureRef, id, g),
            CallArg::Closure(body) => {
                let mut instr = Instruction::new(Opcode::ClosureCreate);
                instr.subfn = body;
                Block::single(g.alloc(instr))
            }
        };
        arglist = join(arglist, piece, g);
    }
    let mut call_instr = Instruction::new(Opcode::CallJq);
    call_instr.symbol = Some(name);
    call_instr.arglist = arglist;
    Block::single(g.alloc(call_instr))
}

/// Builds an unbound reference instruction for a bare variable/identifier
/// the parser hands us before binding runs. Thin wrapper kept here (rather
/// than re-exporting `builder::op_unbound` directly) so lowering call
/// sites read in terms of the surface vocabulary (`spec.md` §4.1).
#[must_use]
pub fn var_ref(op: Opcode, name: Symbol, g: &mut Graph) -> Block {
    op_unbound(op, name, g)
}

/// `NAME as $x (...) | code` native-binding form (`spec.md` §4.3
/// "cbinding"): prepends one self-bound `CLOSURE_CREATE_C` per native
/// function so unbound references in `code` resolve to them.
pub fn cbinding(cfuncs: Vec<Rc<NativeFunc>>, code: Block, g: &mut Graph, depth: DepthGuard) -> Result<Block, CompileError> {
    let mut result = code;
    for nf in cfuncs.into_iter().rev() {
        let mut instr = Instruction::new(Opcode::ClosureCreateC);
        instr.symbol = Some(nf.name.clone());
        instr.bound_by = BoundBy::SelfBinder;
        instr.imm = Imm::Native(nf);
        let id = g.alloc(instr);
        bind_references(id, result, OpFlags::NONE, g, depth)?;
        result = Block::prepend(id, result, g);
    }
    Ok(result)
}

/// `import "NAME" as $as search "SEARCH";` (`spec.md` §4.3 "import"):
/// emits a `DEPS` instruction carrying the module specifier as `symbol`
/// and `{as?, search?}` as its constant, later peeled off by
/// [`crate::imports::take_imports`] for the linker.
#[must_use]
pub fn gen_import(name: Symbol, as_: Option<String>, search: Option<String>, g: &mut Graph) -> Block {
    let mut obj = serde_json::Map::new();
    if let Some(a) = as_ {
        obj.insert("as".to_string(), json!(a));
    }
    if let Some(s) = search {
        obj.insert("search".to_string(), json!(s));
    }
    let mut instr = Instruction::new(Opcode::Deps);
    instr.symbol = Some(name);
    instr.imm = Imm::Const(serde_json::Value::Object(obj));
    Block::single(g.alloc(instr))
}
