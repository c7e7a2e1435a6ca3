//! Diagnostics: the two error taxonomies from the compile entry point.
//!
//! Grounded on `ouros::repl_error::ReplError` / `ouros::parse::ParseError`: a
//! plain hand-written enum with manual `Display`/`Error`, no `thiserror`.

use std::fmt;
use std::rc::Rc;

/// Default guard on post-order recursion depth during binding, reference
/// analysis, and call-site expansion. See `spec.md` §9 ("guard against stack
/// overflow on pathological nesting"). Mirrors
/// `ouros::resource::DEFAULT_MAX_RECURSION_DEPTH`.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 1000;

/// Opaque handle for an interned source filename. The compiler never
/// interprets this value; it is supplied by, and only meaningful to, the
/// external parser/linker.
pub type FileId = u32;

/// Stand-in for the external `locfile` source-position handle (`spec.md` §5,
/// §9). Modeled as a small `Copy` struct rather than a reference-counted
/// pointer: unlike the C original, nothing here needs manual retain/free
/// once the value is `Copy`, the same simplification `ouros::parse::CodeRange`
/// makes for its own (structurally identical) role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SourceLoc {
    pub file: FileId,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// Interned-free symbol representation. The parser hands us borrowed/owned
/// strings; `Rc<str>` keeps clones (every reference to a binder clones its
/// symbol) cheap without requiring a crate-owned interner, which is outside
/// this component's scope (`spec.md` §1 names the lexer/parser as external).
pub type Symbol = Rc<str>;

/// Errors produced while compiling a block into bytecode (`spec.md` §7).
#[derive(Debug, Clone)]
pub enum CompileError {
    /// A reference's `bound_by` is still `Unbound` once call-site expansion
    /// runs. Non-fatal: compilation continues to surface as many of these as
    /// possible (`spec.md` §7, "Error accumulation").
    Unresolved {
        symbol: Symbol,
        arity: u32,
        location: Option<SourceLoc>,
    },
    /// The ambient nesting-depth guard (`DEFAULT_MAX_NESTING_DEPTH`) tripped
    /// during a post-order traversal. See `SPEC_FULL.md`'s recursion-guard
    /// supplement.
    RecursionLimit { limit: usize, depth: usize },
    /// An internal assertion failure: a branch target not yet laid out, an
    /// opcode that reached emission in a state its descriptor forbids, a
    /// call whose binder is an unexpected kind. Indicates a bug in this
    /// compiler or in the upstream parser, never a user error.
    Internal(&'static str),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved { symbol, arity, .. } => write!(f, "{symbol}/{arity} is not defined"),
            Self::RecursionLimit { limit, depth } => {
                write!(f, "nesting depth {depth} exceeds compiler limit {limit}")
            }
            Self::Internal(msg) => write!(f, "internal compiler error: {msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Accumulates non-fatal compile errors across a whole compilation
/// (`spec.md` §7, "the compiler returns a non-negative error count").
///
/// Grounded on `ouros::prepare::PrepareResult`, which threads a `Vec` of
/// soft name-resolution errors outward instead of aborting on the first one.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn into_errors(self) -> Vec<CompileError> {
        self.errors
    }
}

/// A depth counter threaded through recursive traversals so pathological
/// nesting fails with [`CompileError::RecursionLimit`] instead of a stack
/// overflow. Grounded on `ouros::resource::ResourceTracker`'s depth checks.
#[derive(Debug, Clone, Copy)]
pub struct DepthGuard {
    limit: usize,
    depth: usize,
}

impl DepthGuard {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit, depth: 0 }
    }

    /// Enters one more level of recursion, returning an error if the limit
    /// would be exceeded. Callers decrement on the way back out by holding
    /// onto the guard value returned before recursing (it is `Copy`, so the
    /// caller's own stack frame keeps the pre-increment depth).
    pub fn enter(self) -> Result<Self, CompileError> {
        let depth = self.depth + 1;
        if depth > self.limit {
            return Err(CompileError::RecursionLimit { limit: self.limit, depth });
        }
        Ok(Self { limit: self.limit, depth })
    }
}

impl Default for DepthGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NESTING_DEPTH)
    }
}
