//! Read-only view of a compiled module.
//!
//! The code buffer, debug symbols, and runtime tables are written only
//! during compilation; the runtime borrows them immutably for the whole
//! execution.

use sable_compiler::{CompiledChunk, DebugSymbolTable, RuntimeTables};

/// Borrowed compilation output the runtime executes against.
#[derive(Clone, Copy)]
pub struct ModuleEnv<'a> {
    /// Instruction bytes.
    pub ops: &'a [u8],
    /// Debug symbols for the unwinders.
    pub debug: &'a DebugSymbolTable,
    /// Runtime symbol tables.
    pub tables: &'a RuntimeTables,
}

impl<'a> ModuleEnv<'a> {
    /// Borrow a compiled chunk.
    #[must_use]
    pub fn new(chunk: &'a CompiledChunk) -> Self {
        Self {
            ops: &chunk.buf.ops,
            debug: &chunk.debug,
            tables: &chunk.tables,
        }
    }
}
