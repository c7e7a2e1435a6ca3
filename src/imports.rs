//! Import extraction (`spec.md` §4.3 "import", §6 "Import record").
//!
//! `take_imports` peels the leading run of `DEPS` instructions off the
//! front of a program (after an optional single `TOP` sentinel) and
//! returns them as an ordered list for the linker, alongside the residual
//! block with those instructions removed.

use crate::block::{Block, Graph, Imm};
use crate::diag::Symbol;
use crate::opcode::Opcode;

/// One `import`/`include` declaration (`spec.md` §6 "Import record").
/// Serializable since it's handed to an external linker across the same
/// kind of process boundary `CompiledProgram` crosses toward the VM.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImportRecord {
    pub name: Symbol,
    pub as_: Option<String>,
    pub search: Option<String>,
}

/// Strips the leading `DEPS` run (after an optional `TOP`) off `body`,
/// returning the import records in source order and the residual block
/// with the `TOP` sentinel (if any) preserved in its original position.
///
/// `spec.md` §4.3: "`take_imports` returns all and only `DEPS`
/// instructions at the head of the program (after an optional single
/// `TOP`), in source order."
pub fn take_imports(body: Block, g: &mut Graph) -> (Vec<ImportRecord>, Block) {
    let ids = body.ids(g);
    let mut cursor = 0;
    if ids.first().is_some_and(|&id| g.get(id).op == Opcode::Top) {
        cursor = 1;
    }

    let mut records = Vec::new();
    while cursor < ids.len() && g.get(ids[cursor]).op == Opcode::Deps {
        let id = ids[cursor];
        let instr = g.get(id);
        let name = instr.symbol.clone().unwrap_or_else(|| Symbol::from(""));
        let (as_, search) = match &instr.imm {
            Imm::Const(serde_json::Value::Object(map)) => (
                map.get("as").and_then(|v| v.as_str()).map(String::from),
                map.get("search").and_then(|v| v.as_str()).map(String::from),
            ),
            _ => (None, None),
        };
        records.push(ImportRecord { name, as_, search });
        cursor += 1;
    }

    if records.is_empty() {
        return (records, body);
    }

    let mut survivors = Vec::with_capacity(ids.len() - cursor + 1);
    if cursor > 0 {
        // The `TOP` sentinel, if present, is always `ids[0]`.
        survivors.push(ids[0]);
    }
    survivors.extend_from_slice(&ids[cursor..]);

    let rest = Block::from_ids(&survivors, g);
    (records, rest)
}
