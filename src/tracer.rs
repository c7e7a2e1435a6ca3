//! Compile-time instrumentation seam (`SPEC_FULL.md` "Instrumentation
//! seam"). Grounded on `ouros::tracer::VmTracer`: a zero-cost trait with
//! default no-op methods, monomorphized into the compiler so a production
//! build pays nothing for it.
//!
//! This is instrumentation, not logging — like the teacher crate, `filterc`
//! has no `log`/`tracing` dependency in its core; callers who want a `-v`
//! frontend implement [`CompileTracer`] themselves, the same way a VM
//! frontend implements `VmTracer`.

use crate::block::InstrId;
use crate::diag::Symbol;
use crate::opcode::Opcode;

/// Hook points at the four stages that mutate or classify instructions
/// (`spec.md` §4.2-§4.5): binder application, dead-code pruning, call-site
/// expansion, and code emission. Every method has a no-op default so an
/// implementation only overrides the hooks it cares about, exactly as
/// `VmTracer`'s dispatch/call/return/cell hooks work independently.
pub trait CompileTracer: std::fmt::Debug {
    /// A reference was resolved to `binder` during `bind_references`.
    #[inline(always)]
    fn on_bind(&mut self, _reference: InstrId, _binder: InstrId) {}

    /// A top-level definition was dropped as unreferenced
    /// (`block_bind_referenced`/`drop_unreferenced`).
    #[inline(always)]
    fn on_prune(&mut self, _definition: InstrId, _symbol: Option<&Symbol>) {}

    /// A `CALL_JQ` was expanded: `retagged` is `true` if it became
    /// `CALL_BUILTIN`, `false` if it stayed a user-function call.
    #[inline(always)]
    fn on_expand_call(&mut self, _call: InstrId, _retagged: bool) {}

    /// One instruction was laid out into `func`'s code array during
    /// emission's Pass C.
    #[inline(always)]
    fn on_emit(&mut self, _instr: InstrId, _op: Opcode) {}

    /// A function's layout (Pass A) completed: `nlocals` and `nclosures`
    /// as assigned.
    #[inline(always)]
    fn on_function_laid_out(&mut self, _nlocals: u32, _nclosures: u32) {}
}

/// The default, zero-cost tracer: every hook compiles away entirely via
/// monomorphization (`ouros::tracer::NoopTracer`'s role).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CompileTracer for NoopTracer {}

/// Counts instructions laid out, closures created, and definitions pruned.
/// Provided for tests and for a `-v`-style compiler frontend
/// (`SPEC_FULL.md` "Instrumentation seam").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountingTracer {
    pub binds: u32,
    pub prunes: u32,
    pub calls_expanded: u32,
    pub calls_retagged_builtin: u32,
    pub instructions_emitted: u32,
    pub functions_laid_out: u32,
}

impl CompileTracer for CountingTracer {
    fn on_bind(&mut self, _reference: InstrId, _binder: InstrId) {
        self.binds += 1;
    }

    fn on_prune(&mut self, _definition: InstrId, _symbol: Option<&Symbol>) {
        self.prunes += 1;
    }

    fn on_expand_call(&mut self, _call: InstrId, retagged: bool) {
        self.calls_expanded += 1;
        if retagged {
            self.calls_retagged_builtin += 1;
        }
    }

    fn on_emit(&mut self, _instr: InstrId, _op: Opcode) {
        self.instructions_emitted += 1;
    }

    fn on_function_laid_out(&mut self, _nlocals: u32, _nclosures: u32) {
        self.functions_laid_out += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_tracer_starts_at_zero() {
        let tracer = CountingTracer::default();
        assert_eq!(tracer, CountingTracer::default());
        assert_eq!(tracer.binds, 0);
    }

    #[test]
    fn counting_tracer_accumulates_hooks() {
        let mut g = crate::block::Graph::new();
        let a = g.alloc(crate::block::Instruction::new(Opcode::Dup));
        let b = g.alloc(crate::block::Instruction::new(Opcode::Pop));
        let mut tracer = CountingTracer::default();
        tracer.on_bind(a, b);
        tracer.on_expand_call(a, true);
        tracer.on_expand_call(a, false);
        tracer.on_emit(a, Opcode::Dup);
        assert_eq!(tracer.binds, 1);
        assert_eq!(tracer.calls_expanded, 2);
        assert_eq!(tracer.calls_retagged_builtin, 1);
        assert_eq!(tracer.instructions_emitted, 1);
    }
}
