//! Name binding and dead-code elimination (`spec.md` §4.2).
//!
//! `bind_references` is the shared recursive matcher behind every public
//! entry point here; it walks a body (and, per `spec.md` §4.2, recurses into
//! every instruction's `subfn`/`arglist` so definitions stay visible inside
//! nested lambdas and argument expressions), rebinding any still-`Unbound`
//! reference whose symbol and opcode flags match.

use ahash::AHashSet;

use crate::block::{BoundBy, Graph, Imm, InstrId, Instruction};
use crate::diag::{CompileError, DepthGuard, Symbol};
use crate::opcode::{OpFlags, Opcode};
use crate::tracer::{CompileTracer, NoopTracer};

/// The binder's formal arity, used to arity-check `CALL_JQ` references
/// (`spec.md` §4.2, "Arity matters for call bindings"). Cached on the
/// binder's own `nformals` field the first time it's computed.
///
/// Native functions (`CLOSURE_CREATE_C`) subtract one from their declared
/// `nargs` because that count includes the implicit `.` input, which never
/// appears as an explicit `CALL_JQ` argument.
fn binder_arity(g: &mut Graph, binder_id: InstrId) -> Option<u32> {
    if let Some(n) = g.get(binder_id).nformals {
        return Some(n);
    }
    let arity = match g.get(binder_id).op {
        Opcode::ClosureCreate => {
            let n = u32::try_from(g.get(binder_id).arglist.arg_ids(g).len()).unwrap_or(u32::MAX);
            Some(n)
        }
        Opcode::ClosureCreateC => match &g.get(binder_id).imm {
            Imm::Native(nf) => Some(nf.nargs.saturating_sub(1)),
            _ => Some(0),
        },
        Opcode::ClosureParam => Some(0),
        _ => None,
    };
    if let Some(n) = arity {
        g.get_mut(binder_id).nformals = Some(n);
    }
    arity
}

/// Caches and returns a `CALL_JQ` instruction's actual-argument count.
fn call_arity(g: &mut Graph, call_id: InstrId) -> u32 {
    if let Some(n) = g.get(call_id).nactuals {
        return n;
    }
    let n = u32::try_from(g.get(call_id).arglist.arg_ids(g).len()).unwrap_or(u32::MAX);
    g.get_mut(call_id).nactuals = Some(n);
    n
}

/// Recursively rebinds every still-unbound reference to `symbol` within
/// `body` (and its nested `subfn`/`arglist` blocks) that matches `flags`,
/// pointing it at `binder_id`. Does not touch `binder_id` itself and does
/// not splice anything into `body` — callers decide whether/where the
/// binder instruction belongs in the final block.
pub fn bind_references(
    binder_id: InstrId,
    body: crate::block::Block,
    flags: OpFlags,
    g: &mut Graph,
    depth: DepthGuard,
) -> Result<(), CompileError> {
    let symbol: Option<Symbol> = g.get(binder_id).symbol.clone();
    let binder_nformals = binder_arity(g, binder_id);
    bind_walk(binder_id, &symbol, flags, binder_nformals, body, g, depth)
}

fn bind_walk(
    binder_id: InstrId,
    symbol: &Option<Symbol>,
    flags: OpFlags,
    binder_nformals: Option<u32>,
    body: crate::block::Block,
    g: &mut Graph,
    depth: DepthGuard,
) -> Result<(), CompileError> {
    let depth = depth.enter()?;
    for id in body.ids(g) {
        if id == binder_id {
            continue;
        }
        let is_candidate = {
            let instr = g.get(id);
            instr.bound_by.is_unbound() && instr.symbol == *symbol && instr.op.flags().contains(flags.union(OpFlags::HAS_BINDING))
        };
        if is_candidate {
            let matches = if g.get(id).op == Opcode::CallJq {
                let actual = call_arity(g, id);
                binder_nformals.is_none_or(|formal| formal == actual)
            } else {
                true
            };
            if matches {
                g.get_mut(id).bound_by = BoundBy::BoundTo(binder_id);
            }
        }
        let subfn = g.get(id).subfn;
        let arglist = g.get(id).arglist;
        bind_walk(binder_id, symbol, flags, binder_nformals, subfn, g, depth)?;
        bind_walk(binder_id, symbol, flags, binder_nformals, arglist, g, depth)?;
    }
    Ok(())
}

/// Resolves free symbols in `body` to `binder`, then prepends `binder` to
/// `body` (`spec.md` §4.2 "Binder", `block_bind`).
///
/// # Panics
/// Panics if `binder` is not a single instruction.
pub fn block_bind(
    binder: crate::block::Block,
    body: crate::block::Block,
    flags: OpFlags,
    g: &mut Graph,
    depth: DepthGuard,
) -> Result<crate::block::Block, CompileError> {
    let binder_id = binder.first().expect("block_bind: binder block is empty");
    assert_eq!(binder.first(), binder.last(), "block_bind: binder must be a single instruction");
    g.get_mut(binder_id).bound_by = BoundBy::SelfBinder;
    bind_references(binder_id, body, flags, g, depth)?;
    Ok(crate::block::Block::prepend(binder_id, body, g))
}

/// Like [`block_bind`], but rewrites the binder's symbol to `libname::symbol`
/// only for the duration of binding, then restores it, and returns the body
/// alone — `spec.md` §4.2 and §9's Open Question: library definitions are
/// expected to be reached through the qualified references the parser
/// emits, not through `join(binder, body)`.
///
/// # Panics
/// Panics if `binder` is not a single instruction, or carries no symbol.
pub fn block_bind_library(
    binder: crate::block::Block,
    body: crate::block::Block,
    flags: OpFlags,
    libname: &str,
    g: &mut Graph,
    depth: DepthGuard,
) -> Result<crate::block::Block, CompileError> {
    let binder_id = binder.first().expect("block_bind_library: binder block is empty");
    assert_eq!(binder.first(), binder.last(), "block_bind_library: binder must be a single instruction");
    let original_symbol = g.get(binder_id).symbol.clone().expect("block_bind_library: binder has no symbol");
    let qualified: Symbol = format!("{libname}::{original_symbol}").into();
    g.get_mut(binder_id).symbol = Some(qualified);
    g.get_mut(binder_id).bound_by = BoundBy::SelfBinder;
    bind_references(binder_id, body, flags, g, depth)?;
    g.get_mut(binder_id).symbol = Some(original_symbol);
    Ok(body)
}

/// Returns `true` if any instruction reachable from `block` (including
/// through `subfn`/`arglist`) references `target` via `BoundBy::BoundTo`.
fn any_reference_to(block: crate::block::Block, target: InstrId, g: &Graph, depth: DepthGuard) -> Result<bool, CompileError> {
    let depth = depth.enter()?;
    for id in block.ids(g) {
        if g.get(id).bound_by == BoundBy::BoundTo(target) {
            return Ok(true);
        }
        if any_reference_to(g.get(id).subfn, target, g, depth)? || any_reference_to(g.get(id).arglist, target, g, depth)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Binds a block of sibling top-level definitions (`defs`, in source order)
/// against each other and against `body`, supporting mutual recursion, then
/// keeps only the definitions transitively referenced from `body` — fixed
/// point per `spec.md` §4.2 `block_bind_referenced`.
pub fn block_bind_referenced(
    defs: crate::block::Block,
    body: crate::block::Block,
    flags: OpFlags,
    g: &mut Graph,
    depth: DepthGuard,
) -> Result<crate::block::Block, CompileError> {
    block_bind_referenced_with_tracer(defs, body, flags, g, depth, &mut NoopTracer)
}

/// Like [`block_bind_referenced`], but reports each discarded definition
/// through `tracer` (`SPEC_FULL.md` "Instrumentation seam", `on_prune`).
pub fn block_bind_referenced_with_tracer<T: CompileTracer>(
    defs: crate::block::Block,
    body: crate::block::Block,
    flags: OpFlags,
    g: &mut Graph,
    mut depth: DepthGuard,
    tracer: &mut T,
) -> Result<crate::block::Block, CompileError> {
    let def_ids = defs.ids(g);

    for &def_id in &def_ids {
        g.get_mut(def_id).bound_by = BoundBy::SelfBinder;
    }
    for &def_id in &def_ids {
        depth = depth.enter()?;
        bind_references(def_id, body, flags, g, depth)?;
        for &other in &def_ids {
            if other == def_id {
                continue;
            }
            let other_subfn = g.get(other).subfn;
            let other_arglist = g.get(other).arglist;
            bind_references(def_id, other_subfn, flags, g, depth)?;
            bind_references(def_id, other_arglist, flags, g, depth)?;
        }
    }

    let mut kept: AHashSet<InstrId> = AHashSet::default();
    let mut changed = true;
    while changed {
        changed = false;
        for &def_id in &def_ids {
            if kept.contains(&def_id) {
                continue;
            }
            let from_body = any_reference_to(body, def_id, g, depth)?;
            let mut from_kept = false;
            for &k in &def_ids {
                if kept.contains(&k) {
                    let subfn = g.get(k).subfn;
                    let arglist = g.get(k).arglist;
                    if any_reference_to(subfn, def_id, g, depth)? || any_reference_to(arglist, def_id, g, depth)? {
                        from_kept = true;
                        break;
                    }
                }
            }
            if from_body || from_kept {
                kept.insert(def_id);
                changed = true;
            }
        }
    }

    for &def_id in &def_ids {
        if !kept.contains(&def_id) {
            tracer.on_prune(def_id, g.get(def_id).symbol.as_ref());
        }
    }

    let mut result = body;
    for &def_id in def_ids.iter().rev() {
        if kept.contains(&def_id) {
            result = crate::block::Block::prepend(def_id, result, g);
        }
    }
    Ok(result)
}

/// Prunes definitions not reachable from a program's entry point
/// (`spec.md` §4.2 `drop_unreferenced`). Operates on a finalized body whose
/// leading instructions (before the `TOP` sentinel, if any) are already-bound
/// self-binder definitions; everything from `TOP` onward is kept
/// unconditionally and its position is preserved.
pub fn drop_unreferenced(body: crate::block::Block, g: &mut Graph, depth: DepthGuard) -> Result<crate::block::Block, CompileError> {
    drop_unreferenced_with_tracer(body, g, depth, &mut NoopTracer)
}

/// Like [`drop_unreferenced`], but reports each discarded definition through
/// `tracer` (`SPEC_FULL.md` "Instrumentation seam", `on_prune`). With
/// [`NoopTracer`] this monomorphizes to exactly the same code as
/// [`drop_unreferenced`].
pub fn drop_unreferenced_with_tracer<T: CompileTracer>(
    body: crate::block::Block,
    g: &mut Graph,
    depth: DepthGuard,
    tracer: &mut T,
) -> Result<crate::block::Block, CompileError> {
    let ids = body.ids(g);
    let Some(top_pos) = ids.iter().position(|&id| g.get(id).op == Opcode::Top) else {
        return Ok(body);
    };
    if top_pos == 0 {
        return Ok(body);
    }

    let def_ids = ids[..top_pos].to_vec();
    let rest_first = ids[top_pos];
    let rest_block = crate::block::Block::from_parts(Some(rest_first), body.last());

    let mut kept: AHashSet<InstrId> = AHashSet::default();
    let mut changed = true;
    while changed {
        changed = false;
        for &def_id in &def_ids {
            if kept.contains(&def_id) {
                continue;
            }
            let from_rest = any_reference_to(rest_block, def_id, g, depth)?;
            let mut from_kept = false;
            for &k in &def_ids {
                if kept.contains(&k) {
                    let subfn = g.get(k).subfn;
                    let arglist = g.get(k).arglist;
                    if any_reference_to(subfn, def_id, g, depth)? || any_reference_to(arglist, def_id, g, depth)? {
                        from_kept = true;
                        break;
                    }
                }
            }
            if from_rest || from_kept {
                kept.insert(def_id);
                changed = true;
            }
        }
    }

    for &def_id in &def_ids {
        if !kept.contains(&def_id) {
            tracer.on_prune(def_id, g.get(def_id).symbol.as_ref());
        }
    }

    let mut result = rest_block;
    for &def_id in def_ids.iter().rev() {
        if kept.contains(&def_id) {
            result = crate::block::Block::prepend(def_id, result, g);
        }
    }
    Ok(result)
}
