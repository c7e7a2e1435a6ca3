//! `filterc`: the middle-end and back-end of a jq-like filter-language
//! compiler (`spec.md` §1 "Scope"). Takes an already-parsed block-IR
//! program — the arena-based data model in [`block`] — and carries it
//! through name binding ([`bind`]), dead-code elimination, call-site
//! expansion ([`expand`]), and bytecode linearization ([`emit`]) to a
//! [`emit::CompiledProgram`] a bytecode VM can run directly.
//!
//! Grounded on `ouros`: the block-IR/bytecode split mirrors its own
//! AST-to-bytecode pipeline, and every ambient concern (error taxonomy,
//! depth guards, instrumentation hooks) is carried over in the same shape
//! the teacher crate uses it in, documented per-module in `DESIGN.md`.
//!
//! # Crate shape
//!
//! - [`block`] — the IR: [`block::Graph`], [`block::Block`], [`block::Instruction`].
//! - [`opcode`] — [`opcode::Opcode`] and its [`opcode::OpFlags`]/length/name descriptors.
//! - [`builder`] — single-instruction and structural block constructors.
//! - [`lower`] — control-flow and binding-form lowering (`both`, `cond`, `reduce`, `foreach`, ...).
//! - [`bind`] — name resolution and dead-code elimination.
//! - [`expand`] — call-site expansion (closure hoisting, native retagging).
//! - [`imports`] — `import`/`include` extraction.
//! - [`emit`] — layout and bytecode emission.
//! - [`tracer`] — the zero-cost compile-time instrumentation seam.
//! - [`diag`] — the error taxonomy, symbol type, and recursion-depth guard.
//! - [`compile`] — the public pipeline entry point tying the above together.
pub mod bind;
pub mod block;
pub mod builder;
pub mod compile;
pub mod diag;
pub mod emit;
pub mod expand;
pub mod imports;
pub mod lower;
pub mod opcode;
pub mod tracer;

pub use block::{Block, BoundBy, ConstValue, FuncId, Graph, Imm, Instruction, InstrId, NativeFunc, NativeImpl};
pub use compile::{compile, compile_with_options, compile_with_options_and_tracer, compile_with_tracer, CompileOptions, CompileOutcome};
pub use diag::{CompileError, DepthGuard, Diagnostics, Symbol, DEFAULT_MAX_NESTING_DEPTH};
pub use emit::{compile_program, compile_program_with_tracer, CompiledFunction, CompiledProgram, DebugInfo, Globals};
pub use imports::ImportRecord;
pub use opcode::{OpFlags, Opcode};
pub use tracer::{CompileTracer, CountingTracer, NoopTracer};
