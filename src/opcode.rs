//! The opcode descriptor table (`spec.md` §6, "Opcode descriptor (external table)").
//!
//! Each opcode carries a fixed encoded length (in 16-bit words, CALL_JQ's
//! variable tail handled separately by the emitter) and a bitmask describing
//! which immediate shape it expects. `strum`'s derives give the enum a
//! canonical mnemonic string for debug info and disassembly without a
//! hand-maintained `match`, mirroring how `ouros::exception_private::ExcType`
//! uses the same derives for its variant-name strings.

use strum::{Display, EnumString, IntoStaticStr};

/// A bitmask over the immediate/placeholder properties of an opcode.
/// Hand-written rather than pulled from the `bitflags` crate: five flags is
/// small enough that the teacher's own handwritten-enum style (no extra
/// dependency) fits better than a macro-generated type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags(u8);

impl OpFlags {
    pub const NONE: Self = Self(0);
    pub const HAS_CONSTANT: Self = Self(1 << 0);
    pub const HAS_BRANCH: Self = Self(1 << 1);
    pub const HAS_BINDING: Self = Self(1 << 2);
    pub const HAS_VARIABLE: Self = Self(1 << 3);
    pub const IS_CALL_PSEUDO: Self = Self(1 << 4);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for OpFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// A single opcode's entry in the descriptor table: display name, fixed
/// encoded length in 16-bit words (the word holding the opcode itself
/// counts), and the immediate-shape flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpDescriptor {
    pub name: &'static str,
    pub length: u16,
    pub flags: OpFlags,
}

/// All opcodes the lowering and emission passes can produce (`spec.md` §4.3).
/// `#[repr(u16)]` with explicit discriminants gives each variant the stable
/// numeric word the emitter writes into the flat bytecode array (`spec.md`
/// §4.5 Pass C); the discriminant values are this crate's own encoding
/// choice, not dictated by the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[repr(u16)]
pub enum Opcode {
    #[strum(serialize = "DUP")]
    Dup,
    #[strum(serialize = "POP")]
    Pop,
    #[strum(serialize = "BACKTRACK")]
    Backtrack,
    #[strum(serialize = "FORK")]
    Fork,
    #[strum(serialize = "FORK_OPT")]
    ForkOpt,
    #[strum(serialize = "JUMP")]
    Jump,
    #[strum(serialize = "JUMP_F")]
    JumpF,
    #[strum(serialize = "SUBEXP_BEGIN")]
    SubexpBegin,
    #[strum(serialize = "SUBEXP_END")]
    SubexpEnd,
    #[strum(serialize = "LOADK")]
    LoadK,
    #[strum(serialize = "STOREV")]
    StoreV,
    #[strum(serialize = "LOADV")]
    LoadV,
    #[strum(serialize = "LOADVN")]
    LoadVN,
    #[strum(serialize = "APPEND")]
    Append,
    #[strum(serialize = "CALL_JQ")]
    CallJq,
    #[strum(serialize = "CALL_BUILTIN")]
    CallBuiltin,
    #[strum(serialize = "RET")]
    Ret,
    #[strum(serialize = "TOP")]
    Top,
    #[strum(serialize = "DEPS")]
    Deps,
    #[strum(serialize = "CLOSURE_CREATE")]
    ClosureCreate,
    #[strum(serialize = "CLOSURE_CREATE_C")]
    ClosureCreateC,
    #[strum(serialize = "CLOSURE_PARAM")]
    ClosureParam,
    #[strum(serialize = "CLOSURE_REF")]
    ClosureRef,
}

impl Opcode {
    /// The opcode's fixed-size descriptor entry. For `CallJq`, `length` is
    /// the *base* length (header words only); the emitter adds `2 * nargs`
    /// on top, per `spec.md` §4.5 ("Pass A — layout").
    #[must_use]
    pub const fn descriptor(self) -> OpDescriptor {
        use OpFlags as F;
        let (name, length, flags) = match self {
            Self::Dup => ("DUP", 1, F::NONE),
            Self::Pop => ("POP", 1, F::NONE),
            Self::Backtrack => ("BACKTRACK", 1, F::NONE),
            Self::Fork => ("FORK", 2, F::HAS_BRANCH),
            Self::ForkOpt => ("FORK_OPT", 2, F::HAS_BRANCH),
            Self::Jump => ("JUMP", 2, F::HAS_BRANCH),
            Self::JumpF => ("JUMP_F", 2, F::HAS_BRANCH),
            Self::SubexpBegin => ("SUBEXP_BEGIN", 1, F::NONE),
            Self::SubexpEnd => ("SUBEXP_END", 1, F::NONE),
            Self::LoadK => ("LOADK", 2, F::HAS_CONSTANT),
            Self::StoreV => ("STOREV", 3, F::HAS_VARIABLE.union(F::HAS_BINDING)),
            Self::LoadV => ("LOADV", 3, F::HAS_VARIABLE.union(F::HAS_BINDING)),
            Self::LoadVN => ("LOADVN", 3, F::HAS_VARIABLE.union(F::HAS_BINDING)),
            Self::Append => ("APPEND", 3, F::HAS_VARIABLE.union(F::HAS_BINDING)),
            // Base header only: [op, nargs, nesting_level, binder_index]. The
            // trailing 2 words per argument are a layout-time addition, not
            // part of the fixed descriptor.
            Self::CallJq => ("CALL_JQ", 4, F::HAS_BINDING),
            Self::CallBuiltin => ("CALL_BUILTIN", 3, F::NONE),
            Self::Ret => ("RET", 1, F::NONE),
            Self::Top => ("TOP", 1, F::NONE),
            Self::Deps => ("DEPS", 2, F::HAS_CONSTANT),
            // CLOSURE_CREATE is hoisted into real preludes by call expansion
            // and genuinely emitted (`spec.md` §4.4: "hoisted into a prelude
            // (emitted immediately before the call)"), so it carries both a
            // fixed encoded form (`[op, subfn_index]`) and the call-pseudo
            // flag marking it valid only inside an arglist/binder position
            // before expansion runs. See DESIGN.md "Open decisions".
            Self::ClosureCreate => ("CLOSURE_CREATE", 2, F::IS_CALL_PSEUDO),
            // Binder-only: registered into the globals table at layout time,
            // never itself emitted as code.
            Self::ClosureCreateC => ("CLOSURE_CREATE_C", 0, F::NONE),
            // Pure placeholders: consumed entirely during call expansion /
            // Pass B, never reach Pass C's emission walk.
            Self::ClosureParam => ("CLOSURE_PARAM", 0, F::IS_CALL_PSEUDO),
            Self::ClosureRef => ("CLOSURE_REF", 0, F::IS_CALL_PSEUDO.union(F::HAS_BINDING)),
        };
        OpDescriptor { name, length, flags }
    }

    #[must_use]
    pub const fn flags(self) -> OpFlags {
        self.descriptor().flags
    }

    #[must_use]
    pub const fn base_length(self) -> u16 {
        self.descriptor().length
    }

    /// The stable 16-bit word the emitter writes for this opcode
    /// (`spec.md` §4.5: "emitting 16-bit words"). Backed by the enum's
    /// `#[repr(u16)]` discriminant.
    #[must_use]
    pub const fn as_word(self) -> u16 {
        self as u16
    }

    /// The inverse of [`Opcode::as_word`]: decodes a raw code-array word
    /// back to its opcode, for disassembly and tests. Returns `None` for any
    /// word that doesn't name a variant (which includes every operand word,
    /// since those aren't valid opcode positions to begin with).
    #[must_use]
    pub const fn from_word(word: u16) -> Option<Self> {
        match word {
            w if w == Self::Dup as u16 => Some(Self::Dup),
            w if w == Self::Pop as u16 => Some(Self::Pop),
            w if w == Self::Backtrack as u16 => Some(Self::Backtrack),
            w if w == Self::Fork as u16 => Some(Self::Fork),
            w if w == Self::ForkOpt as u16 => Some(Self::ForkOpt),
            w if w == Self::Jump as u16 => Some(Self::Jump),
            w if w == Self::JumpF as u16 => Some(Self::JumpF),
            w if w == Self::SubexpBegin as u16 => Some(Self::SubexpBegin),
            w if w == Self::SubexpEnd as u16 => Some(Self::SubexpEnd),
            w if w == Self::LoadK as u16 => Some(Self::LoadK),
            w if w == Self::StoreV as u16 => Some(Self::StoreV),
            w if w == Self::LoadV as u16 => Some(Self::LoadV),
            w if w == Self::LoadVN as u16 => Some(Self::LoadVN),
            w if w == Self::Append as u16 => Some(Self::Append),
            w if w == Self::CallJq as u16 => Some(Self::CallJq),
            w if w == Self::CallBuiltin as u16 => Some(Self::CallBuiltin),
            w if w == Self::Ret as u16 => Some(Self::Ret),
            w if w == Self::Top as u16 => Some(Self::Top),
            w if w == Self::Deps as u16 => Some(Self::Deps),
            w if w == Self::ClosureCreate as u16 => Some(Self::ClosureCreate),
            w if w == Self::ClosureCreateC as u16 => Some(Self::ClosureCreateC),
            w if w == Self::ClosureParam as u16 => Some(Self::ClosureParam),
            w if w == Self::ClosureRef as u16 => Some(Self::ClosureRef),
            _ => None,
        }
    }
}

impl TryFrom<u16> for Opcode {
    type Error = u16;

    fn try_from(word: u16) -> Result<Self, Self::Error> {
        Self::from_word(word).ok_or(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_jq_base_length_excludes_argument_words() {
        assert_eq!(Opcode::CallJq.base_length(), 4);
    }

    #[test]
    fn branch_opcodes_declare_has_branch() {
        for op in [Opcode::Fork, Opcode::ForkOpt, Opcode::Jump, Opcode::JumpF] {
            assert!(op.flags().contains(OpFlags::HAS_BRANCH), "{op} should be HAS_BRANCH");
        }
    }

    #[test]
    fn pseudo_ops_are_marked() {
        for op in [Opcode::ClosureCreate, Opcode::ClosureParam, Opcode::ClosureRef] {
            assert!(op.flags().contains(OpFlags::IS_CALL_PSEUDO), "{op} should be IS_CALL_PSEUDO");
        }
    }

    #[test]
    fn mnemonic_round_trips() {
        for op in [Opcode::Fork, Opcode::LoadVN, Opcode::CallBuiltin] {
            let name: &'static str = op.into();
            let parsed: Opcode = name.parse().unwrap();
            assert_eq!(parsed, op);
        }
    }

    #[test]
    fn as_word_round_trips_through_from_word() {
        for op in [Opcode::Dup, Opcode::Fork, Opcode::CallJq, Opcode::ClosureRef, Opcode::Ret] {
            assert_eq!(Opcode::from_word(op.as_word()), Some(op));
        }
    }

    #[test]
    fn from_word_rejects_an_out_of_range_word() {
        assert_eq!(Opcode::from_word(u16::MAX), None);
    }
}
