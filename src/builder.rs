//! Pure constructors that produce IR fragments (`spec.md` §4.1 "Block
//! construction primitives"). Every function here takes ownership of
//! whatever blocks it's given and returns a fresh block; callers must not
//! reuse arguments afterward (`spec.md` §5, "Ownership of argument blocks
//! passed into builders transfers to the builder").

use crate::block::{Block, BoundBy, ConstValue, Graph, Imm, InstrId, Instruction};
use crate::diag::Symbol;
use crate::opcode::Opcode;

/// An empty block.
#[must_use]
pub fn noop() -> Block {
    Block::empty()
}

/// An opcode whose encoded length is fixed and which carries no immediate.
#[must_use]
pub fn op_simple(op: Opcode, g: &mut Graph) -> Block {
    Block::single(g.alloc(Instruction::new(op)))
}

/// A `LOADK` with an owned constant.
#[must_use]
pub fn const_(value: ConstValue, g: &mut Graph) -> Block {
    let mut instr = Instruction::new(Opcode::LoadK);
    instr.imm = Imm::Const(value);
    Block::single(g.alloc(instr))
}

/// Asserts `block` is a single `LOADK` and returns its constant.
///
/// # Panics
/// Panics if `block` is not exactly one `LOADK` instruction — callers only
/// use this on blocks they just built with [`const_`].
#[must_use]
pub fn const_value<'g>(block: Block, g: &'g Graph) -> &'g ConstValue {
    let id = block.first().expect("const_value: block is empty");
    assert_eq!(block.first(), block.last(), "const_value: block is not a single instruction");
    let instr = g.get(id);
    assert_eq!(instr.op, Opcode::LoadK, "const_value: instruction is not LOADK");
    match &instr.imm {
        Imm::Const(v) => v,
        _ => unreachable!("LOADK instruction without a Const immediate"),
    }
}

/// A branch opcode whose immediate is the *last* instruction of `target`.
///
/// # Panics
/// Panics if `target` is empty — branch targets must be non-empty blocks.
#[must_use]
pub fn op_target(op: Opcode, target: Block, g: &mut Graph) -> Block {
    let target_last = target.last().expect("op_target: target block must be non-empty");
    let mut instr = Instruction::new(op);
    instr.imm = Imm::Target(target_last);
    Block::single(g.alloc(instr))
}

/// A branch opcode whose target will be patched later via [`set_target`].
#[must_use]
pub fn op_targetlater(op: Opcode, g: &mut Graph) -> Block {
    Block::single(g.alloc(Instruction::new(op)))
}

/// Patches a branch block built with [`op_targetlater`] to point at the last
/// instruction of `target`.
///
/// # Panics
/// Panics if `branch` isn't a single instruction or `target` is empty.
pub fn set_target(branch: Block, target: Block, g: &mut Graph) {
    let branch_id = branch.first().expect("set_target: branch block is empty");
    assert_eq!(branch.first(), branch.last(), "set_target: branch block is not a single instruction");
    let target_last = target.last().expect("set_target: target block must be non-empty");
    g.get_mut(branch_id).imm = Imm::Target(target_last);
}

/// An instruction in unbound state, carrying the symbol it references.
#[must_use]
pub fn op_unbound(op: Opcode, name: Symbol, g: &mut Graph) -> Block {
    let mut instr = Instruction::new(op);
    instr.symbol = Some(name);
    instr.bound_by = BoundBy::Unbound;
    Block::single(g.alloc(instr))
}

/// A fresh local-variable binder: an unbound variable instruction bound to
/// itself.
#[must_use]
pub fn op_var_fresh(op: Opcode, hint: Symbol, g: &mut Graph) -> Block {
    let mut instr = Instruction::new(op);
    instr.symbol = Some(hint);
    instr.bound_by = BoundBy::SelfBinder;
    Block::single(g.alloc(instr))
}

/// A reference whose `bound_by` is preset to `binder`; copies the binder's
/// symbol.
#[must_use]
pub fn op_bound(op: Opcode, binder: InstrId, g: &mut Graph) -> Block {
    let symbol = g.get(binder).symbol.clone();
    let mut instr = Instruction::new(op);
    instr.symbol = symbol;
    instr.bound_by = BoundBy::BoundTo(binder);
    Block::single(g.alloc(instr))
}

/// Strict list concatenation: `a` followed by `b`. A thin name for
/// `Block::join` matching `spec.md`'s `join`/`append` vocabulary.
#[must_use]
pub fn join(a: Block, b: Block, g: &mut Graph) -> Block {
    a.join(b, g)
}

/// Appends `b` after `a`; alias of [`join`] for call sites that read better
/// as "append" (e.g. appending a trailing `RET`).
#[must_use]
pub fn append(a: Block, b: Block, g: &mut Graph) -> Block {
    a.join(b, g)
}
