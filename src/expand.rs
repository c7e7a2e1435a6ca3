//! Call-site expansion (`spec.md` §4.4). Runs after binding and dead-code
//! elimination, before emission: rewrites every `CALL_JQ` into its final
//! shape, hoisting closure-argument preludes and retagging native-function
//! calls to `CALL_BUILTIN`.

use crate::block::{Block, BoundBy, Graph, Imm, InstrId};
use crate::diag::{CompileError, Diagnostics, DepthGuard};
use crate::lower::subexp;
use crate::opcode::Opcode;
use crate::tracer::{CompileTracer, NoopTracer};

/// Recursively expands every `CALL_JQ` reachable from `body`, including
/// inside every instruction's `subfn`/`arglist` (`spec.md` §4.4
/// "Recursion: argument bodies passed to native functions are themselves
/// subjected to call expansion"). Non-fatal resolution failures
/// (`spec.md` §7 "Unresolved symbol") are accumulated into `diags`, not
/// returned as an `Err`; only internal assertion failures are.
pub fn expand(body: Block, g: &mut Graph, diags: &mut Diagnostics, depth: DepthGuard) -> Result<Block, CompileError> {
    expand_with_tracer(body, g, diags, depth, &mut NoopTracer)
}

/// Like [`expand`], but reports each `CALL_JQ`'s resolution through `tracer`
/// (`SPEC_FULL.md` "Instrumentation seam", `on_expand_call`). With
/// [`NoopTracer`] this monomorphizes to exactly the same code as [`expand`].
pub fn expand_with_tracer<T: CompileTracer>(
    body: Block,
    g: &mut Graph,
    diags: &mut Diagnostics,
    depth: DepthGuard,
    tracer: &mut T,
) -> Result<Block, CompileError> {
    let depth = depth.enter()?;
    let mut result = Block::empty();
    for id in body.ids(g) {
        if g.get(id).op == Opcode::CallJq {
            let was_unbound = g.get(id).bound_by == BoundBy::Unbound;
            let prelude = expand_call(id, g, diags, depth, tracer)?;
            // An unresolved call is reported into `diags` but dropped from
            // the emitted stream entirely (`spec.md` §7 "Error
            // accumulation": compilation continues past it rather than
            // feeding an unresolvable instruction to emission).
            result = if was_unbound { result.join(prelude, g) } else { result.join(prelude, g).join(Block::single(id), g) };
        } else {
            let subfn = g.get(id).subfn;
            let new_subfn = expand_with_tracer(subfn, g, diags, depth, tracer)?;
            g.get_mut(id).subfn = new_subfn;

            let arglist = g.get(id).arglist;
            let new_arglist = expand_with_tracer(arglist, g, diags, depth, tracer)?;
            g.get_mut(id).arglist = new_arglist;

            result = result.join(Block::single(id), g);
        }
    }
    Ok(result)
}

/// Expands a single `CALL_JQ` in place, returning the prelude block that
/// must be spliced in immediately before it (`spec.md` §4.4).
fn expand_call<T: CompileTracer>(
    call_id: InstrId,
    g: &mut Graph,
    diags: &mut Diagnostics,
    depth: DepthGuard,
    tracer: &mut T,
) -> Result<Block, CompileError> {
    let depth = depth.enter()?;
    let bound_by = g.get(call_id).bound_by;
    let arg_ids = g.get(call_id).arglist.arg_ids(g);

    let binder_id = match bound_by {
        BoundBy::Unbound => {
            let symbol = g.get(call_id).symbol.clone().unwrap_or_else(|| crate::diag::Symbol::from(""));
            let arity = u32::try_from(arg_ids.len()).unwrap_or(u32::MAX);
            let location = g.get(call_id).source;
            diags.push(CompileError::Unresolved { symbol, arity, location });
            return Ok(Block::empty());
        }
        BoundBy::SelfBinder => return Err(CompileError::Internal("CALL_JQ cannot be bound to itself")),
        BoundBy::BoundTo(binder_id) => binder_id,
    };

    match g.get(binder_id).op {
        Opcode::ClosureCreateC => {
            let result = expand_native_call(call_id, binder_id, &arg_ids, g, diags, depth, tracer);
            tracer.on_expand_call(call_id, true);
            result
        }
        Opcode::ClosureCreate | Opcode::ClosureParam => {
            let result = expand_user_call(call_id, &arg_ids, g, diags, depth, tracer);
            tracer.on_expand_call(call_id, false);
            result
        }
        _ => Err(CompileError::Internal("call binder is neither a user function, formal parameter, nor native function")),
    }
}

/// User-function / formal-parameter call target (`spec.md` §4.4, first
/// bullet): each `CLOSURE_REF` argument passes through; each
/// `CLOSURE_CREATE` argument is hoisted into the prelude and replaced in
/// the arglist by a `CLOSURE_REF` bound to it.
fn expand_user_call<T: CompileTracer>(
    call_id: InstrId,
    arg_ids: &[InstrId],
    g: &mut Graph,
    diags: &mut Diagnostics,
    depth: DepthGuard,
    tracer: &mut T,
) -> Result<Block, CompileError> {
    let mut prelude = Block::empty();
    let mut new_arglist = Block::empty();

    for &arg_id in arg_ids {
        match g.get(arg_id).op {
            Opcode::ClosureRef => {
                new_arglist = new_arglist.join(Block::single(arg_id), g);
            }
            Opcode::ClosureCreate => {
                let arg_body = g.get(arg_id).subfn;
                let expanded_body = expand_with_tracer(arg_body, g, diags, depth, tracer)?;
                g.get_mut(arg_id).subfn = expanded_body;
                prelude = prelude.join(Block::single(arg_id), g);
                let arg_ref = crate::builder::op_bound(Opcode::ClosureRef, arg_id, g);
                new_arglist = new_arglist.join(arg_ref, g);
            }
            _ => return Err(CompileError::Internal("call argument is neither CLOSURE_REF nor CLOSURE_CREATE")),
        }
    }

    g.get_mut(call_id).arglist = new_arglist;
    let nargs = u32::try_from(arg_ids.len()).unwrap_or(u32::MAX);
    g.get_mut(call_id).imm = Imm::Int(i32::try_from(nargs).unwrap_or(i32::MAX));
    Ok(prelude)
}

/// Native-function call target (`spec.md` §4.4, second bullet): each
/// argument's `CLOSURE_CREATE` body is expanded, then wrapped as an inline
/// `SUBEXP_BEGIN … SUBEXP_END` prepended to the prelude in *reverse*
/// evaluation order; the call is retagged `CALL_BUILTIN` with `intval`
/// equal to `actual_args + 1` (the implicit input) and its `arglist`
/// emptied.
fn expand_native_call<T: CompileTracer>(
    call_id: InstrId,
    _binder_id: InstrId,
    arg_ids: &[InstrId],
    g: &mut Graph,
    diags: &mut Diagnostics,
    depth: DepthGuard,
    tracer: &mut T,
) -> Result<Block, CompileError> {
    let mut prelude = Block::empty();

    for &arg_id in arg_ids.iter().rev() {
        if g.get(arg_id).op != Opcode::ClosureCreate {
            return Err(CompileError::Internal("native-function argument is not a CLOSURE_CREATE"));
        }
        let arg_body = g.get(arg_id).subfn;
        let expanded_body = expand_with_tracer(arg_body, g, diags, depth, tracer)?;
        let wrapped = subexp(expanded_body, g);
        prelude = prelude.join(wrapped, g);
    }

    g.get_mut(call_id).op = Opcode::CallBuiltin;
    let nargs = u32::try_from(arg_ids.len()).unwrap_or(u32::MAX);
    g.get_mut(call_id).imm = Imm::Int(i32::try_from(nargs + 1).unwrap_or(i32::MAX));
    g.get_mut(call_id).arglist = Block::empty();
    Ok(prelude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::bind_references;
    use crate::block::{Instruction, NativeImpl};
    use crate::builder::const_;
    use crate::lower::{call, function, CallArg};
    use serde_json::json;
    use std::rc::Rc;

    #[test]
    fn native_call_retags_to_call_builtin_with_implicit_input_counted() {
        let mut g = Graph::new();
        let mut diags = Diagnostics::new();

        let mut native = Instruction::new(Opcode::ClosureCreateC);
        native.symbol = Some("length".into());
        native.bound_by = BoundBy::SelfBinder;
        native.imm = Imm::Native(Rc::new(crate::block::NativeFunc {
            name: "length".into(),
            nargs: 1,
            implementation: NativeImpl(0),
        }));
        let native_id = g.alloc(native);

        let call_block = call("length".into(), vec![], &mut g);
        let call_id = call_block.first().unwrap();
        bind_references(native_id, call_block, OpFlags::NONE, &mut g, DepthGuard::default()).unwrap();

        let expanded = expand(call_block, &mut g, &mut diags, DepthGuard::default()).unwrap();
        assert!(diags.is_ok());
        assert_eq!(g.get(call_id).op, Opcode::CallBuiltin);
        assert!(matches!(g.get(call_id).imm, Imm::Int(1)));
        assert!(g.get(call_id).arglist.is_empty());
        assert_eq!(expanded.ids(&g), vec![call_id]);
    }

    #[test]
    fn user_call_hoists_closure_create_argument_into_prelude() {
        let mut g = Graph::new();
        let mut diags = Diagnostics::new();

        let def_block = function("f".into(), vec!["g".into()], const_(json!(1), &mut g), &mut g, DepthGuard::default()).unwrap();
        let def_id = def_block.first().unwrap();

        let arg_body = const_(json!(42), &mut g);
        let call_block = call("f".into(), vec![CallArg::Closure(arg_body)], &mut g);
        let call_id = call_block.first().unwrap();
        bind_references(def_id, call_block, OpFlags::NONE, &mut g, DepthGuard::default()).unwrap();

        let whole = def_block.join(call_block, &mut g);
        let expanded = expand(whole, &mut g, &mut diags, DepthGuard::default()).unwrap();

        assert!(diags.is_ok());
        let ids = expanded.ids(&g);
        // def, hoisted CLOSURE_CREATE (the argument), CALL_JQ.
        assert_eq!(ids.len(), 3);
        assert_eq!(g.get(ids[1]).op, Opcode::ClosureCreate);
        assert_eq!(g.get(ids[2]).op, Opcode::CallJq);
        let call_args = g.get(ids[2]).arglist.ids(&g);
        assert_eq!(call_args.len(), 1);
        assert_eq!(g.get(call_args[0]).op, Opcode::ClosureRef);
        assert_eq!(g.get(call_args[0]).bound_by, BoundBy::BoundTo(ids[1]));
    }

    #[test]
    fn unresolved_call_is_accumulated_not_fatal() {
        let mut g = Graph::new();
        let mut diags = Diagnostics::new();
        let call_block = call("nope".into(), vec![], &mut g);
        let expanded = expand(call_block, &mut g, &mut diags, DepthGuard::default()).unwrap();
        assert_eq!(diags.error_count(), 1);
        assert!(expanded.is_empty());
    }
}
