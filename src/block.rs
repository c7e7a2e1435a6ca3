//! The instruction/block data model (`spec.md` §3 "DATA MODEL").
//!
//! Grounded on `ouros::heap::Heap`'s arena-of-ids pattern (`HeapId(usize)`
//! indexing a `Vec<Option<HeapValue>>`): a single per-compile [`Graph`] arena
//! owns every [`Instruction`]; a [`Block`] is a cheap `Copy` pair of
//! `Option<InstrId>` endpoints denoting a (possibly empty) doubly-linked
//! sublist of that arena. This is Option (a) from `spec.md` §9's design note
//! ("arena of instructions with 32-bit indices and explicit prev/next
//! fields"), chosen because it maps 1:1 onto the intrusive linked-list model
//! the specification describes.

use std::fmt;

use crate::diag::{SourceLoc, Symbol};
use crate::opcode::Opcode;

/// Constant-pool value. The JSON value library (`jv`) is an external
/// collaborator (`spec.md` §1); `serde_json::Value` stands in for it here
/// since it is the value representation a JSON-filter-language constant pool
/// would actually hold, and `serde_json` is already part of the ambient
/// stack (`SPEC_FULL.md`, "Crate shape").
pub type ConstValue = serde_json::Value;

/// Opaque index of a bytecode function, set on `Instruction::compiled` once
/// emission assigns the instruction to a function body (`spec.md` §3).
/// `Serialize`/`Deserialize` because it crosses the compiler/VM boundary as
/// part of a [`crate::emit::CompiledFunction`]'s `subfunctions` table
/// (`spec.md` §6 "Bytecode consumer").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FuncId(pub u32);

/// A call's actual arguments or a definition's formal parameters (`spec.md`
/// §3 `arglist`): almost always a handful of entries, so inline storage
/// avoids a heap allocation for the common 0-4-argument call. Grounded on
/// `ouros::value`'s `SmallVec<[Value; 3]>` for argument/parameter lists.
pub type ArgIds = smallvec::SmallVec<[InstrId; 4]>;

/// A native (builtin) function descriptor (`spec.md` §6, "Native function
/// descriptor"). `nargs` includes the implicit input, so a zero-argument
/// builtin has `nargs = 1`. Serializable (with serde's `rc` feature for
/// `Symbol = Rc<str>`) since it is carried into [`crate::emit::Globals`],
/// part of the bytecode handed across the compiler/VM boundary.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NativeFunc {
    pub name: Symbol,
    pub nargs: u32,
    /// Opaque handle into whatever table the host VM uses to dispatch
    /// builtin implementations; this compiler never calls it, only carries
    /// it through to the constant/native table it emits.
    pub implementation: NativeImpl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct NativeImpl(pub u32);

/// The tagged union an instruction's immediate occupies, disambiguated by
/// its opcode's descriptor flags (`spec.md` §3 `imm` field, §9 "Heterogeneous
/// immediate").
#[derive(Debug, Clone, Default)]
pub enum Imm {
    #[default]
    None,
    /// A plain integer immediate — used for the final argument count
    /// (`intval`) call expansion writes onto `CALL_JQ`/`CALL_BUILTIN`.
    Int(i32),
    /// A forward branch target: the *last* instruction of the target block
    /// (`spec.md` §4.1 `op_target`).
    Target(InstrId),
    /// An owned constant pool value (`LOADK`, and the import-options object
    /// carried by `DEPS`).
    Const(ConstValue),
    /// A native-function descriptor, attached by `cbinding`'s
    /// `CLOSURE_CREATE_C` binders.
    Native(std::rc::Rc<NativeFunc>),
}

/// Binding tri-state (`spec.md` §3 `bound_by`, §9 "bound_by tri-state").
/// `SelfBinder` must stay representable distinctly from `Unbound` so a
/// binder can be its own referent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundBy {
    #[default]
    Unbound,
    SelfBinder,
    BoundTo(InstrId),
}

impl BoundBy {
    #[must_use]
    pub const fn is_unbound(self) -> bool {
        matches!(self, Self::Unbound)
    }
}

/// A single IR node (`spec.md` §3 "Instruction").
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Opcode,
    prev: Option<InstrId>,
    next: Option<InstrId>,
    pub imm: Imm,
    /// Nested block: body of a function-creating instruction.
    pub subfn: Block,
    /// Nested block: formal parameters (for definitions) or actual-argument
    /// expressions (for call sites).
    pub arglist: Block,
    pub bound_by: BoundBy,
    /// The lexical name this instruction binds or references.
    pub symbol: Option<Symbol>,
    /// Formal-arity cache. `None` until computed (`spec.md`'s `-1` sentinel,
    /// expressed idiomatically).
    pub nformals: Option<u32>,
    /// Actual-argument-count cache, same convention as `nformals`.
    pub nactuals: Option<u32>,
    pub source: Option<SourceLoc>,
    /// Back-pointer to the compiled function this instruction belongs to,
    /// set during emission.
    pub compiled: Option<FuncId>,
    /// Emit offset just past this instruction, set during layout.
    pub bytecode_pos: u32,
}

impl Instruction {
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            prev: None,
            next: None,
            imm: Imm::None,
            subfn: Block::empty(),
            arglist: Block::empty(),
            bound_by: BoundBy::Unbound,
            symbol: None,
            nformals: None,
            nactuals: None,
            source: None,
            compiled: None,
            bytecode_pos: 0,
        }
    }
}

/// Index of an [`Instruction`] inside a [`Graph`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(u32);

impl InstrId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The arena owning every instruction produced while compiling one program.
/// Analogous to `ouros::heap::Heap<T>`, minus generational reuse: a compiler
/// graph is built once, walked a handful of times, and dropped — there is no
/// free list because nothing is ever freed mid-compile (`spec.md` §5:
/// "each compile call owns its IR graph ... until it returns").
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Instruction>,
    gensym_counter: u32,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, instr: Instruction) -> InstrId {
        let id = InstrId(u32::try_from(self.nodes.len()).expect("instruction arena overflow"));
        self.nodes.push(instr);
        id
    }

    /// Produces a symbol guaranteed not to collide with any name the parser
    /// could have handed us, for the internal bookkeeping locals the
    /// control-flow lowerings need (`spec.md` §4.3: `found`, `collect`,
    /// `res`, the `reduce`/`foreach` source bookkeeping variable). Surface
    /// identifiers never contain `*`, so `*base*N` is free by construction.
    pub fn gensym(&mut self, base: &str) -> Symbol {
        let n = self.gensym_counter;
        self.gensym_counter += 1;
        format!("*{base}*{n}").into()
    }

    #[must_use]
    pub fn get(&self, id: InstrId) -> &Instruction {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.nodes[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A (possibly empty) doubly-linked sublist of a [`Graph`]'s arena
/// (`spec.md` §3 "Block"). `first`/`last` are either both `None` (empty) or
/// both `Some` — the invariant is upheld structurally: every constructor
/// below either builds a single-instruction block or joins two
/// already-valid blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Block {
    first: Option<InstrId>,
    last: Option<InstrId>,
}

impl Block {
    #[must_use]
    pub const fn empty() -> Self {
        Self { first: None, last: None }
    }

    #[must_use]
    pub fn single(id: InstrId) -> Self {
        Self { first: Some(id), last: Some(id) }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.first
    }

    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.last
    }

    /// Concatenates `self` followed by `other`, splicing their link pointers
    /// in O(1). `self`/`other` are consumed: per `spec.md` §3, a block is
    /// never shared, and concatenation transfers ownership of nodes.
    #[must_use]
    pub fn join(self, other: Block, g: &mut Graph) -> Block {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let a_last = self.last.expect("non-empty block has a last instruction");
        let b_first = other.first.expect("non-empty block has a first instruction");
        g.get_mut(a_last).next = Some(b_first);
        g.get_mut(b_first).prev = Some(a_last);
        Block { first: self.first, last: other.last }
    }

    /// Prepends a single instruction to a block (used to splice a binder in
    /// front of its body, `spec.md` §4.2).
    #[must_use]
    pub fn prepend(id: InstrId, body: Block, g: &mut Graph) -> Block {
        Block::single(id).join(body, g)
    }

    /// Walks every instruction in source order. Borrows the graph
    /// immutably; mutation (e.g. rebinding) must drain the ids first and
    /// mutate afterward.
    #[must_use]
    pub fn iter<'g>(&self, g: &'g Graph) -> BlockIter<'g> {
        BlockIter { g, cur: self.first }
    }

    /// Collects every instruction id in source order into a `Vec`, for
    /// passes that need to mutate the graph while iterating.
    #[must_use]
    pub fn ids(&self, g: &Graph) -> Vec<InstrId> {
        self.iter(g).collect()
    }

    /// Like [`Block::ids`], but collects into an [`ArgIds`] — for `arglist`
    /// blocks specifically (call actuals, formal parameters), which are
    /// short enough that inline storage avoids an allocation.
    #[must_use]
    pub fn arg_ids(&self, g: &Graph) -> ArgIds {
        self.iter(g).collect()
    }

    /// Builds a block directly from a pair of endpoints without touching
    /// any link pointers. Used when carving a sub-range out of an
    /// already-correctly-linked list (e.g. "everything from the `TOP`
    /// sentinel onward") where the interior links are already valid and
    /// only the public endpoints change.
    #[must_use]
    pub const fn from_parts(first: Option<InstrId>, last: Option<InstrId>) -> Block {
        Block { first, last }
    }

    /// Rebuilds a block's link pointers from an explicit id sequence,
    /// overwriting `prev`/`next` on every member. Used by passes that drop
    /// instructions out of the middle of a block (e.g. `take_imports`
    /// stripping `DEPS` nodes) and must relink the survivors.
    #[must_use]
    pub fn from_ids(ids: &[InstrId], g: &mut Graph) -> Block {
        let Some(&first) = ids.first() else {
            return Block::empty();
        };
        let last = *ids.last().expect("non-empty slice has a last element");
        for pair in ids.windows(2) {
            g.get_mut(pair[0]).next = Some(pair[1]);
            g.get_mut(pair[1]).prev = Some(pair[0]);
        }
        g.get_mut(first).prev = None;
        g.get_mut(last).next = None;
        Block { first: Some(first), last: Some(last) }
    }
}

pub struct BlockIter<'g> {
    g: &'g Graph,
    cur: Option<InstrId>,
}

impl<'g> Iterator for BlockIter<'g> {
    type Item = InstrId;

    fn next(&mut self) -> Option<InstrId> {
        let cur = self.cur?;
        self.cur = self.g.get(cur).next;
        Some(cur)
    }
}
