//! The public compile entry point (`spec.md` §5 "Compile entry point",
//! §6 "Compile entry point").
//!
//! Wires the pipeline end to end: a caller hands in a bound, TOP-sentineled
//! program body (the parser and [`crate::bind`] have already run); this
//! module peels off imports, prunes unreferenced top-level definitions,
//! expands every call site, and emits the final [`CompiledProgram`].

use crate::block::Graph;
use crate::diag::{CompileError, DepthGuard, Diagnostics, DEFAULT_MAX_NESTING_DEPTH};
use crate::emit::{self, CompiledProgram};
use crate::expand;
use crate::imports::{self, ImportRecord};
use crate::tracer::{CompileTracer, NoopTracer};

/// Tunables for one compile call (`SPEC_FULL.md` "Configuration surface").
/// Grounded on `ouros::resource::ResourceLimits`'s plain-struct-with-`Default`
/// shape: a compiler has far fewer dials than a VM, so this carries exactly
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Recursion-depth ceiling threaded through binding, reference analysis,
    /// and call expansion (`SPEC_FULL.md`'s recursion-guard supplement).
    pub max_nesting_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH }
    }
}

/// Everything one `compile()` call produces: the bytecode program, the
/// import records the linker still needs to resolve, and every non-fatal
/// diagnostic accumulated along the way (`spec.md` §7 "the compiler returns
/// a non-negative error count").
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub program: CompiledProgram,
    pub imports: Vec<ImportRecord>,
    pub diagnostics: Vec<CompileError>,
}

impl CompileOutcome {
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Compiles `body` with [`CompileOptions::default`].
///
/// `body` must already be a fully bound program (every definition's
/// `block_bind`/`block_bind_referenced` has run, and unresolved references
/// are the only ones left `Unbound`) — binding itself is driven by the
/// caller, not this entry point, since the shape of a program's top-level
/// definitions varies with how the parser assembled it.
pub fn compile(body: crate::block::Block, g: &mut Graph) -> Result<CompileOutcome, CompileError> {
    compile_with_options(body, g, CompileOptions::default())
}

/// Compiles `body` with explicit [`CompileOptions`] (`spec.md` §4.4, §4.5;
/// §4.2 for the dead-code-pruning step it performs before expansion).
pub fn compile_with_options(
    body: crate::block::Block,
    g: &mut Graph,
    options: CompileOptions,
) -> Result<CompileOutcome, CompileError> {
    compile_with_options_and_tracer(body, g, options, &mut NoopTracer)
}

/// Compiles `body` with [`CompileOptions::default`], reporting pruning,
/// call-expansion, and emission progress through `tracer` (`SPEC_FULL.md`
/// "Instrumentation seam"). With [`NoopTracer`] this monomorphizes to
/// exactly the same code as [`compile`].
pub fn compile_with_tracer<T: CompileTracer>(body: crate::block::Block, g: &mut Graph, tracer: &mut T) -> Result<CompileOutcome, CompileError> {
    compile_with_options_and_tracer(body, g, CompileOptions::default(), tracer)
}

/// Compiles `body` with explicit [`CompileOptions`] and an explicit
/// [`CompileTracer`] (`spec.md` §4.4, §4.5; §4.2 for the dead-code-pruning
/// step it performs before expansion).
pub fn compile_with_options_and_tracer<T: CompileTracer>(
    body: crate::block::Block,
    g: &mut Graph,
    options: CompileOptions,
    tracer: &mut T,
) -> Result<CompileOutcome, CompileError> {
    let depth = DepthGuard::new(options.max_nesting_depth);

    let (imports, body) = imports::take_imports(body, g);
    let body = crate::bind::drop_unreferenced_with_tracer(body, g, depth, tracer)?;

    let mut diags = Diagnostics::new();
    let body = expand::expand_with_tracer(body, g, &mut diags, depth, tracer)?;

    let program = emit::compile_program_with_tracer(body, g, depth, tracer)?;

    Ok(CompileOutcome { program, imports, diagnostics: diags.into_errors() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::const_;
    use crate::lower::{both, call, function};
    use serde_json::json;

    #[test]
    fn identity_compiles_to_single_function() {
        let mut g = Graph::new();
        let body = const_(json!(1), &mut g);
        let outcome = compile(body, &mut g).unwrap();
        assert!(outcome.is_ok());
        assert!(outcome.imports.is_empty());
        assert_eq!(outcome.program.functions.len(), 1);
    }

    #[test]
    fn both_constants_compile_without_diagnostics() {
        let mut g = Graph::new();
        let a = const_(json!(1), &mut g);
        let b = const_(json!(2), &mut g);
        let body = both(a, b, &mut g);
        let outcome = compile(body, &mut g).unwrap();
        assert!(outcome.is_ok());
    }

    #[test]
    fn unresolved_call_is_reported_without_aborting_compilation() {
        let mut g = Graph::new();
        let body = call("nope".into(), vec![], &mut g);
        let outcome = compile(body, &mut g).unwrap();
        assert_eq!(outcome.error_count(), 1);
        assert_eq!(outcome.program.functions.len(), 1);
    }

    #[test]
    fn recursive_definition_compiles_with_one_subfunction() {
        let mut g = Graph::new();
        let recurse = call("f".into(), vec![], &mut g);
        let def = function("f".into(), vec![], recurse, &mut g, DepthGuard::default()).unwrap();
        let def_id = def.first().unwrap();
        let entry_call = call("f".into(), vec![], &mut g);
        crate::bind::bind_references(def_id, entry_call, crate::opcode::OpFlags::NONE, &mut g, DepthGuard::default()).unwrap();
        let body = def.join(entry_call, &mut g);

        let outcome = compile(body, &mut g).unwrap();
        assert!(outcome.is_ok());
        assert_eq!(outcome.program.functions.len(), 2);
        assert_eq!(outcome.program.entry_function().subfunctions.len(), 1);
    }

    #[test]
    fn unused_definition_is_pruned_before_emission() {
        let mut g = Graph::new();
        let used_body = const_(json!(1), &mut g);
        let used = function("used".into(), vec![], used_body, &mut g, DepthGuard::default()).unwrap();
        let used_id = used.first().unwrap();

        let unused_body = const_(json!(2), &mut g);
        let unused = function("unused".into(), vec![], unused_body, &mut g, DepthGuard::default()).unwrap();

        let top = crate::builder::op_simple(crate::opcode::Opcode::Top, &mut g);
        let call_used = call("used".into(), vec![], &mut g);
        crate::bind::bind_references(used_id, call_used, crate::opcode::OpFlags::NONE, &mut g, DepthGuard::default()).unwrap();
        let rest = top.join(call_used, &mut g);
        let body = used.join(unused, &mut g).join(rest, &mut g);

        let outcome = compile(body, &mut g).unwrap();
        assert!(outcome.is_ok());
        // One subfunction for `used`; `unused` never reaches emission.
        assert_eq!(outcome.program.entry_function().subfunctions.len(), 1);
    }

    #[test]
    fn tracer_observes_pruning_expansion_and_emission() {
        use crate::tracer::CountingTracer;

        let mut g = Graph::new();
        let used_body = const_(json!(1), &mut g);
        let used = function("used".into(), vec![], used_body, &mut g, DepthGuard::default()).unwrap();
        let used_id = used.first().unwrap();

        let unused_body = const_(json!(2), &mut g);
        let unused = function("unused".into(), vec![], unused_body, &mut g, DepthGuard::default()).unwrap();

        let top = crate::builder::op_simple(crate::opcode::Opcode::Top, &mut g);
        let call_used = call("used".into(), vec![], &mut g);
        crate::bind::bind_references(used_id, call_used, crate::opcode::OpFlags::NONE, &mut g, DepthGuard::default()).unwrap();
        let rest = top.join(call_used, &mut g);
        let body = used.join(unused, &mut g).join(rest, &mut g);

        let mut tracer = CountingTracer::default();
        let outcome = compile_with_tracer(body, &mut g, &mut tracer).unwrap();
        assert!(outcome.is_ok());
        assert_eq!(tracer.prunes, 1);
        assert_eq!(tracer.calls_expanded, 1);
        assert!(tracer.instructions_emitted > 0);
        assert_eq!(tracer.functions_laid_out, 2);
    }
}
