//! # Sable Compiler
//!
//! Semantic analysis and register-based bytecode emission for Sable.
//!
//! # Architecture
//!
//! ```text
//! AST → SemanticAnalyzer → StaticInitScheduler → BytecodeEmitter → CompiledChunk
//!            │                                        │
//!            └── SymbolTable / TypeLattice ───────────┘
//! ```
//!
//! The analyzer annotates nodes (types, resolved symbols, operator
//! strategies) and decides capture and boxing; the emitter walks the
//! annotated tree, drives a per-block register planner, and writes the
//! variable-width byte stream plus the runtime symbol tables and debug
//! symbols the fiber runtime unwinds through.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod block;
pub mod bytecode;
pub mod emitter;
pub mod host;
pub mod init_order;
pub mod register;
pub mod rt;
pub mod sema;
pub mod sym;

pub use block::{Block, BlockId, LocalVar, LocalVarFlags, LocalVarKind, SubBlock};
pub use bytecode::{
    disassemble, inst_len, CodeBuffer, DebugSym, DebugSymbolTable, OpCode, END_LOCALS_NONE,
    NONE_DST,
};
pub use emitter::{BytecodeEmitter, CompiledChunk};
pub use host::{HostEnv, HostFuncKind, HostFuncResult, HostTypeResult, NoHost};
pub use register::RegisterPlanner;
pub use rt::{RtFieldSym, RtFuncKind, RtFuncSym, RtMethodEntry, RuntimeTables};
pub use sema::{ChunkSema, NodeRes, OpStrategy, SemanticAnalyzer, SemaStats};
pub use sym::{
    CallResolution, ChunkId, CompactSymbolId, FieldSymId, FuncSig, FuncSigId, FuncSym, FuncSymId,
    MethodEntry, MethodGroupId, ModuleId, Symbol, SymbolId, SymbolKind, SymbolTable,
};

use sable_core::{Ast, NodeId, SableResult, TypeLattice};

/// Compile one chunk end to end: analysis, initializer scheduling, and
/// emission. The same AST always produces byte-identical output.
pub fn compile_chunk(
    table: &mut SymbolTable,
    lattice: &mut TypeLattice,
    host: &mut dyn HostEnv,
    ast: &Ast,
    root_stmt: NodeId,
) -> SableResult<(ChunkSema, CompiledChunk)> {
    let sema = SemanticAnalyzer::new(table, lattice, host, ChunkId(0), ast).analyze(root_stmt)?;
    let chunk = BytecodeEmitter::new(table, ast, &sema).emit_chunk(root_stmt)?;
    Ok((sema, chunk))
}
