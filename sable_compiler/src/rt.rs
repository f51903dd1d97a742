//! Runtime symbol tables.
//!
//! Populated by the emitter, read by the instruction-dispatch loop. The
//! tables are plain indexed vectors so the hot dispatch paths stay
//! allocation-free; the field table doubles as a lazily-populated
//! per-type offset cache.

use crate::sym::{FieldSymId, FuncSigId, MethodGroupId};
use rustc_hash::FxHashMap;
use sable_core::{TypeId, Value};
use std::sync::Arc;

/// What backs a callable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RtFuncKind {
    /// Declared but never defined; calling it is a runtime error.
    #[default]
    None,
    /// Host function, by host token.
    HostFunc {
        /// Host-side function token.
        host_id: u32,
    },
    /// Host function that may rewrite its call site's opcode on first
    /// execution.
    HostQuickenFunc {
        /// Host-side function token.
        host_id: u32,
    },
    /// User function compiled into the code buffer.
    UserFunc {
        /// Entry pc.
        entry_pc: u32,
        /// Frame size requirement.
        num_locals: u8,
    },
    /// A closure value; the entry travels with the value, not the table.
    Closure,
}

/// One entry of the function-symbol table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtFuncSym {
    /// Backing entry.
    pub kind: RtFuncKind,
    /// Parameter count.
    pub num_params: u8,
    /// Interned signature.
    pub sig: FuncSigId,
    /// Whether calls must type-check arguments at runtime.
    pub req_call_type_check: bool,
}

/// One entry of the field-symbol table: a most-recently-used cache of
/// `(type, offset)` populated lazily by the dispatch loop.
#[derive(Debug, Clone, Copy)]
pub struct RtFieldSym {
    /// Type the cached offset applies to.
    pub mru_type: TypeId,
    /// Cached field offset.
    pub mru_offset: u8,
}

impl Default for RtFieldSym {
    fn default() -> Self {
        Self {
            mru_type: TypeId::UNDEFINED,
            mru_offset: 0,
        }
    }
}

/// One method-table entry.
#[derive(Debug, Clone, Copy)]
pub struct RtMethodEntry {
    /// Interned signature for typed dispatch.
    pub sig: FuncSigId,
    /// Backing entry.
    pub kind: RtFuncKind,
}

/// The tables the dispatch loop reads.
#[derive(Debug, Default)]
pub struct RuntimeTables {
    /// Function symbols, indexed by func-sym id.
    pub func_syms: Vec<RtFuncSym>,
    /// Static variable values, indexed by static-var id.
    pub var_syms: Vec<Value>,
    /// Field symbols, indexed by field-sym id.
    pub field_syms: Vec<RtFieldSym>,
    /// Method entries keyed by `(receiver type, method group)`.
    pub method_syms: FxHashMap<(TypeId, MethodGroupId), RtMethodEntry>,
    /// Field order per object type, for lazy offset resolution.
    pub object_layouts: FxHashMap<TypeId, Arc<[FieldSymId]>>,
}

impl RuntimeTables {
    /// Create empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the function table to cover `id`.
    pub fn ensure_func_slot(&mut self, id: usize) -> &mut RtFuncSym {
        if self.func_syms.len() <= id {
            self.func_syms.resize_with(id + 1, RtFuncSym::default);
        }
        &mut self.func_syms[id]
    }

    /// Grow the static-var table to cover `id`.
    pub fn ensure_var_slot(&mut self, id: usize) {
        if self.var_syms.len() <= id {
            self.var_syms.resize(id + 1, Value::NONE);
        }
    }

    /// Grow the field table to cover `id`.
    pub fn ensure_field_slot(&mut self, id: usize) {
        if self.field_syms.len() <= id {
            self.field_syms.resize_with(id + 1, RtFieldSym::default);
        }
    }
}
