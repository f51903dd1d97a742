//! The bytecode emitter.
//!
//! Walks the annotated AST and lowers it to the variable-width byte
//! stream, driving one [`RegisterPlanner`] per block. The emitter owns
//! the ARC discipline: every value produced at `+1` either transfers to
//! a consumer that asked for ownership (`retain = true`) or lands in the
//! arc-temp region and is released when the enclosing statement ends.
//! Block ends emit the release sequence the unwinders reuse through the
//! debug symbol table.
//!
//! Named locals receive one slot each for the whole block and are
//! zero-initialized on frame entry (`setInitN`), so the block-end
//! release sequence can release every rc-candidate local exactly once on
//! any exit path, including paths on which a declaration never ran.

use crate::block::{BlockId, LocalVarFlags, LocalVarKind};
use crate::bytecode::{CodeBuffer, DebugSym, DebugSymbolTable, OpCode, END_LOCALS_NONE, NONE_DST};
use crate::host::HostFuncKind;
use crate::init_order::StaticInitScheduler;
use crate::register::{ArcMark, RegisterPlanner};
use crate::rt::{RtFuncKind, RtMethodEntry, RuntimeTables};
use crate::sema::{ChunkSema, NodeRes, OpStrategy};
use crate::sym::{
    CompactSymbolId, FuncSigId, FuncSymId, MethodGroupId, SymbolId, SymbolKind, SymbolTable,
};
use rustc_hash::FxHashMap;
use sable_core::{
    Ast, BinaryOp, CompileErrorKind, IntRadix, NodeHead, NodeId, SableError, SableResult, TypeId,
    TypeLattice, UnaryOp, Value,
};
use smallvec::SmallVec;

/// Output of compiling one chunk.
#[derive(Debug)]
pub struct CompiledChunk {
    /// Instruction bytes and pools.
    pub buf: CodeBuffer,
    /// Debug symbols for unwinding and diagnostics.
    pub debug: DebugSymbolTable,
    /// Runtime symbol tables.
    pub tables: RuntimeTables,
    /// Frame size of the top-level block.
    pub main_num_locals: u8,
    /// End-locals pc of the top-level block.
    pub main_end_locals_pc: u32,
}

/// Result of emitting one expression.
#[derive(Debug, Clone, Copy)]
struct ExprValue {
    /// Slot holding the value; equals the requested dst whenever
    /// ownership was requested.
    slot: u8,
    /// Inferred type.
    type_id: TypeId,
}

/// Break/continue patch state for one enclosing loop.
#[derive(Debug, Default)]
struct LoopContext {
    /// Jumps to patch to the loop exit.
    break_jumps: SmallVec<[u32; 2]>,
    /// Jumps to patch to the continue target.
    continue_jumps: SmallVec<[u32; 2]>,
    /// Continue target, if already known (while loops).
    continue_pc: Option<u32>,
    /// Slots the loop owns (a for-iter's iterator); released by early
    /// returns that leave the loop.
    owned_slots: SmallVec<[u8; 1]>,
}

/// Saved per-block emission state while a nested body is emitted.
struct BlockFrame {
    block: BlockId,
    planner: RegisterPlanner,
    rc_local_slots: SmallVec<[u8; 8]>,
    coyield_pcs: SmallVec<[u32; 2]>,
    debug_start: usize,
    loop_stack: Vec<LoopContext>,
}

/// The bytecode emitter for one chunk.
pub struct BytecodeEmitter<'a> {
    table: &'a mut SymbolTable,
    ast: &'a Ast,
    sema: &'a ChunkSema,
    buf: CodeBuffer,
    debug: DebugSymbolTable,
    tables: RuntimeTables,

    cur_block: BlockId,
    planner: RegisterPlanner,
    /// Register slot per `(block, var)`. Synthesized aliases occupy no
    /// slot and have no entry.
    var_slots: FxHashMap<(BlockId, u16), u8>,
    /// Slots of rc-candidate named locals of the current block, released
    /// by the block-end sequence.
    rc_local_slots: SmallVec<[u8; 8]>,
    /// Coyield sites awaiting the block's end-locals pc.
    coyield_pcs: SmallVec<[u32; 2]>,
    /// First debug entry belonging to the current block.
    debug_start: usize,
    loop_stack: Vec<LoopContext>,
}

impl<'a> BytecodeEmitter<'a> {
    /// Create an emitter over analyzed output.
    pub fn new(table: &'a mut SymbolTable, ast: &'a Ast, sema: &'a ChunkSema) -> Self {
        Self {
            table,
            ast,
            sema,
            buf: CodeBuffer::new(),
            debug: DebugSymbolTable::new(),
            tables: RuntimeTables::new(),
            cur_block: BlockId::MAIN,
            planner: RegisterPlanner::new(0),
            var_slots: FxHashMap::default(),
            rc_local_slots: SmallVec::new(),
            coyield_pcs: SmallVec::new(),
            debug_start: 0,
            loop_stack: Vec::new(),
        }
    }

    /// Compile the chunk rooted at `root_stmt`.
    pub fn emit_chunk(mut self, root_stmt: NodeId) -> SableResult<CompiledChunk> {
        // Host symbols resolved during analysis seed the runtime tables.
        for &(func, result) in &self.sema.host_funcs {
            let (num_params, sig, req) = {
                let fs = self.table.func_sym(func);
                let sig = fs.sig;
                let s = self.table.sig(sig);
                (s.params.len() as u8, sig, s.req_call_type_check)
            };
            let slot = self.tables.ensure_func_slot(func.0 as usize);
            slot.kind = match result.kind {
                HostFuncKind::Standard => RtFuncKind::HostFunc {
                    host_id: result.host_id,
                },
                HostFuncKind::Quicken => RtFuncKind::HostQuickenFunc {
                    host_id: result.host_id,
                },
            };
            slot.num_params = num_params;
            slot.sig = sig;
            slot.req_call_type_check = req;
        }
        for &(var_id, value) in &self.sema.host_vars {
            self.tables.ensure_var_slot(var_id as usize);
            self.tables.var_syms[var_id as usize] = value;
        }

        // Top-level block state: every named local gets its slot up
        // front so the frame can be zero-initialized in one op.
        let init_slots = self.open_block(BlockId::MAIN);
        self.emit_set_init_n(&init_slots);

        // Function and type bodies first (execution jumps over them),
        // then the static-initializer sequence, then top-level code.
        for stmt in self.ast.siblings(root_stmt) {
            match *self.ast.head(stmt) {
                NodeHead::FuncDecl { .. } => self.emit_static_func_decl(stmt)?,
                NodeHead::ObjectDecl {
                    name, first_func, ..
                } => self.emit_object_methods(name, first_func)?,
                _ => {}
            }
        }

        self.emit_static_initializers()?;

        for stmt in self.ast.siblings(root_stmt) {
            match *self.ast.head(stmt) {
                NodeHead::FuncDecl { .. }
                | NodeHead::ObjectDecl { .. }
                | NodeHead::EnumDecl { .. }
                | NodeHead::VarDecl { .. }
                | NodeHead::UseDecl { .. }
                | NodeHead::HostFuncDecl { .. }
                | NodeHead::HostTypeDecl { .. }
                | NodeHead::HostVarDecl { .. } => {}
                _ => self.emit_stmt(stmt)?,
            }
        }

        let main_end_locals_pc = self.close_block_releases();
        self.buf.push_op(OpCode::End);
        let main_num_locals = self.planner.max_locals();

        // Size the remaining tables to the ids handed out.
        if self.table.num_static_vars() > 0 {
            self.tables.ensure_var_slot(self.table.num_static_vars() - 1);
        }
        if self.table.num_field_syms() > 0 {
            self.tables.ensure_field_slot(self.table.num_field_syms() - 1);
        }

        Ok(CompiledChunk {
            buf: self.buf,
            debug: self.debug,
            tables: self.tables,
            main_num_locals,
            main_end_locals_pc,
        })
    }

    fn err(&self, kind: CompileErrorKind, msg: impl Into<String>, node: NodeId) -> SableError {
        SableError::compile(kind, msg, node)
    }

    // =========================================================================
    // Block management
    // =========================================================================

    /// Initialize per-block state: a fresh planner, slots for params,
    /// captures, and named locals, plus the release and zero-init lists.
    /// Returns the slots `setInitN` must clear.
    fn open_block(&mut self, block_id: BlockId) -> SmallVec<[u8; 8]> {
        self.cur_block = block_id;
        let block = &self.sema.blocks[block_id.0 as usize];
        self.planner = RegisterPlanner::new(block.params.len() as u8);
        self.rc_local_slots = SmallVec::new();
        self.coyield_pcs = SmallVec::new();
        self.debug_start = self.debug.len();

        let mut assignments: SmallVec<[(u16, u8); 8]> = SmallVec::new();

        // Params sit right after the call header.
        for (i, &var_idx) in block.params.iter().enumerate() {
            assignments.push((var_idx, RegisterPlanner::param_slot(i as u8)));
        }
        // Captured boxes are copied in by the call protocol directly
        // after the params, in capture order.
        for (cap_idx, _) in block.captures.iter().enumerate() {
            let alias_idx = block
                .vars
                .iter()
                .position(|v| {
                    v.kind == LocalVarKind::ParentLocalAlias && v.capture_idx as usize == cap_idx
                })
                .expect("capture has an alias var") as u16;
            assignments.push((alias_idx, self.planner.declare_local()));
        }
        // Plain locals in declaration order.
        for (idx, var) in block.vars.iter().enumerate() {
            if var.kind == LocalVarKind::Local {
                assignments.push((idx as u16, self.planner.declare_local()));
            }
        }

        let mut init_slots: SmallVec<[u8; 8]> = SmallVec::new();
        for &(var_idx, slot) in &assignments {
            let var = block.var(var_idx);
            self.var_slots.insert((block_id, var_idx), slot);
            if var.is_rc_candidate() || var.is_boxed() {
                self.rc_local_slots.push(slot);
            }
            if var.flags.contains(LocalVarFlags::GEN_INITIALIZER) && var.kind == LocalVarKind::Local
            {
                init_slots.push(slot);
            }
        }
        init_slots
    }

    fn var_slot(&self, var_idx: u16) -> u8 {
        self.var_slots[&(self.cur_block, var_idx)]
    }

    fn emit_set_init_n(&mut self, init_slots: &[u8]) {
        if init_slots.is_empty() {
            return;
        }
        self.buf.push_op(OpCode::SetInitN);
        self.buf.push_byte(init_slots.len() as u8);
        for &slot in init_slots {
            self.buf.push_byte(slot);
        }
    }

    /// Emit the block-end release sequence and patch everything waiting
    /// for its pc. Returns the end-locals pc.
    fn close_block_releases(&mut self) -> u32 {
        let end_locals_pc = if self.rc_local_slots.is_empty() {
            END_LOCALS_NONE
        } else {
            let pc = self.buf.pc();
            let slots = self.rc_local_slots.clone();
            for slot in slots {
                self.buf.push_op1(OpCode::Release, slot);
            }
            pc
        };
        self.debug.patch_end_locals(self.debug_start, end_locals_pc);
        let coyields = std::mem::take(&mut self.coyield_pcs);
        for pc in coyields {
            // Teardown unwinding continues at the release sequence, or
            // at the block terminator when there is nothing to release.
            let target = if end_locals_pc == END_LOCALS_NONE {
                self.buf.pc()
            } else {
                end_locals_pc
            };
            self.buf.patch_jump(pc, target);
        }
        end_locals_pc
    }

    // =========================================================================
    // Function emission
    // =========================================================================

    /// Emit a function body: a forward jump over it, slot reservation and
    /// zero-init, the body, and the block-end releases plus `ret0`.
    /// Returns `(entry_pc, num_locals)`.
    fn emit_func_body(
        &mut self,
        decl: NodeId,
        first_stmt: NodeId,
        expr_body: bool,
    ) -> SableResult<(u32, u8)> {
        let block_id = self.sema.block_of[&decl];

        let skip = self.buf.emit_jump();
        let entry_pc = self.buf.pc();

        let saved = BlockFrame {
            block: self.cur_block,
            planner: std::mem::replace(&mut self.planner, RegisterPlanner::new(0)),
            rc_local_slots: std::mem::take(&mut self.rc_local_slots),
            coyield_pcs: std::mem::take(&mut self.coyield_pcs),
            debug_start: self.debug_start,
            loop_stack: std::mem::take(&mut self.loop_stack),
        };

        let init_slots = self.open_block(block_id);
        self.emit_set_init_n(&init_slots);
        self.emit_box_params(block_id);

        if expr_body {
            // Expression-bodied lambda: an implicit `return expr`.
            self.emit_return_value(first_stmt)?;
        } else {
            for stmt in self.ast.siblings(first_stmt) {
                self.emit_stmt(stmt)?;
            }
        }

        self.close_block_releases();
        self.buf.push_op(OpCode::Ret0);

        let num_locals = self.planner.max_locals();

        self.cur_block = saved.block;
        self.planner = saved.planner;
        self.rc_local_slots = saved.rc_local_slots;
        self.coyield_pcs = saved.coyield_pcs;
        self.debug_start = saved.debug_start;
        self.loop_stack = saved.loop_stack;

        self.buf.patch_jump_here(skip);
        Ok((entry_pc, num_locals))
    }

    /// Box parameters that analysis marked as captured.
    fn emit_box_params(&mut self, block_id: BlockId) {
        let boxed: SmallVec<[u8; 4]> = {
            let block = &self.sema.blocks[block_id.0 as usize];
            block
                .params
                .iter()
                .enumerate()
                .filter(|&(_, &idx)| block.var(idx).is_boxed())
                .map(|(i, _)| RegisterPlanner::param_slot(i as u8))
                .collect()
        };
        for slot in boxed {
            self.buf.push_op1(OpCode::BoxOp, slot);
        }
    }

    /// Emit a top-level `func` declaration and register its entry.
    fn emit_static_func_decl(&mut self, decl: NodeId) -> SableResult<()> {
        let NodeHead::FuncDecl { first_stmt, .. } = *self.ast.head(decl) else {
            unreachable!("caller matched FuncDecl");
        };
        let NodeRes::Sym(compact) = self.sema.res(decl) else {
            unreachable!("analysis stamped the func sym");
        };
        debug_assert!(compact.is_func_sym());
        let func = FuncSymId(compact.id());

        let (entry_pc, num_locals) = self.emit_func_body(decl, first_stmt, false)?;

        let (num_params, sig, req) = {
            let fs = self.table.func_sym(func);
            let sig = fs.sig;
            let s = self.table.sig(sig);
            (s.params.len() as u8, sig, s.req_call_type_check)
        };
        let slot = self.tables.ensure_func_slot(func.0 as usize);
        slot.kind = RtFuncKind::UserFunc {
            entry_pc,
            num_locals,
        };
        slot.num_params = num_params;
        slot.sig = sig;
        slot.req_call_type_check = req;
        Ok(())
    }

    /// Emit an object's methods and populate the method table and the
    /// layout map.
    fn emit_object_methods(
        &mut self,
        name: sable_core::NameId,
        first_func: NodeId,
    ) -> SableResult<()> {
        let obj_sym = self.table.lookup(SymbolId::ROOT, name).expect("declared");
        let SymbolKind::Object { type_id, .. } = self.table.sym(obj_sym).kind else {
            unreachable!("object decl resolved to an object symbol");
        };
        if let Some(fields) = self.table.object_fields(type_id) {
            self.tables.object_layouts.insert(type_id, fields.clone());
        }

        for func in self.ast.siblings(first_func) {
            let NodeHead::FuncDecl {
                name: func_name,
                num_params,
                first_stmt,
                ..
            } = *self.ast.head(func)
            else {
                continue;
            };
            let NodeRes::Sym(compact) = self.sema.res(func) else {
                unreachable!("analysis stamped the method sym");
            };
            let func_sym = FuncSymId(compact.id());
            let (entry_pc, num_locals) = self.emit_func_body(func, first_stmt, false)?;

            let sig = self.table.func_sym(func_sym).sig;
            let group = self
                .table
                .ensure_method_group(func_name, num_params.saturating_sub(1));
            self.tables.method_syms.insert(
                (type_id, group),
                RtMethodEntry {
                    sig,
                    kind: RtFuncKind::UserFunc {
                        entry_pc,
                        num_locals,
                    },
                },
            );
        }
        Ok(())
    }

    // =========================================================================
    // Static initializers
    // =========================================================================

    /// Emit `setStaticVar` sequences in dependency order. A back edge in
    /// a cyclic graph observes the not-yet-written slot, which is `none`.
    fn emit_static_initializers(&mut self) -> SableResult<()> {
        let order = StaticInitScheduler::new(&self.sema.init_deps).schedule(&self.sema.static_vars);
        let decl_of: FxHashMap<SymbolId, NodeId> = self.sema.static_vars.iter().copied().collect();

        for sym in order {
            let Some(&decl) = decl_of.get(&sym) else {
                continue;
            };
            let NodeHead::VarDecl { init, .. } = *self.ast.head(decl) else {
                continue;
            };
            let var_id = self.table.ensure_static_var_id(sym);
            self.tables.ensure_var_slot(var_id as usize);

            // Fresh temp state per initializer.
            let arc = self.planner.begin_arc_expr();
            let dst = self.planner.next_free_temp_local();
            let value = self.emit_expr(init, dst, TypeId::ANY, true, true)?;
            self.buf.push_op(OpCode::SetStaticVar);
            self.buf.push_u16(var_id);
            self.buf.push_byte(value.slot);
            self.end_arc(arc);
            self.planner.assert_statement_boundary();
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn emit_stmt(&mut self, stmt: NodeId) -> SableResult<()> {
        let arc = self.planner.begin_arc_expr();
        match *self.ast.head(stmt) {
            NodeHead::ExprStmt { expr } => {
                let dst = self.planner.next_free_temp_local();
                self.emit_expr(expr, dst, TypeId::ANY, false, false)?;
            }
            NodeHead::VarDecl { .. } => self.emit_local_decl(stmt)?,
            NodeHead::FuncDecl { first_stmt, .. } => {
                // Nested function: a local bound to a lambda or closure.
                let NodeRes::Local(var_idx) = self.sema.res(stmt) else {
                    unreachable!("nested func resolves to a local");
                };
                let (slot, boxed) = {
                    let var = self.sema.blocks[self.cur_block.0 as usize].var(var_idx);
                    (self.var_slot(var_idx), var.is_boxed())
                };
                let tmp = self.planner.next_free_temp_local();
                self.emit_func_value(stmt, first_stmt, false, tmp)?;
                self.buf.push_op2(OpCode::CopyReleaseDst, tmp, slot);
                if boxed {
                    self.buf.push_op1(OpCode::BoxOp, slot);
                }
            }
            NodeHead::Assign { target, value } => self.emit_assign(target, value)?,
            NodeHead::OpAssign { op, target, value } => {
                self.emit_op_assign(stmt, op, target, value)?;
            }
            NodeHead::If { .. } => self.emit_if(stmt)?,
            NodeHead::WhileCond { cond, first_stmt } => self.emit_while_cond(cond, first_stmt)?,
            NodeHead::WhileInf { first_stmt } => self.emit_while_inf(first_stmt)?,
            NodeHead::ForRange { .. } => self.emit_for_range(stmt)?,
            NodeHead::ForIter { .. } => self.emit_for_iter(stmt)?,
            NodeHead::Break => {
                let jump = self.buf.emit_jump();
                let Some(ctx) = self.loop_stack.last_mut() else {
                    return Err(self.err(
                        CompileErrorKind::UnsupportedNode,
                        "break outside of a loop",
                        stmt,
                    ));
                };
                ctx.break_jumps.push(jump);
            }
            NodeHead::Continue => {
                let jump = self.buf.emit_jump();
                let Some(ctx) = self.loop_stack.last_mut() else {
                    return Err(self.err(
                        CompileErrorKind::UnsupportedNode,
                        "continue outside of a loop",
                        stmt,
                    ));
                };
                match ctx.continue_pc {
                    Some(pc) => self.buf.patch_jump(jump, pc),
                    None => ctx.continue_jumps.push(jump),
                }
            }
            NodeHead::Return { expr } => {
                if expr.is_null() {
                    self.emit_inline_releases();
                    self.buf.push_op(OpCode::Ret0);
                } else {
                    self.emit_return_value(expr)?;
                }
            }
            NodeHead::Match { .. } => self.emit_match(stmt)?,
            NodeHead::TryStmt { .. } => self.emit_try(stmt)?,
            NodeHead::Throw { expr } => {
                let dst = self.planner.next_free_temp_local();
                let value = self.emit_expr(expr, dst, TypeId::ANY, true, true)?;
                self.push_debug_sym(stmt);
                self.buf.push_op1(OpCode::Throw, value.slot);
            }
            NodeHead::Coyield => {
                self.push_debug_sym(stmt);
                let pc = self.buf.pc();
                self.buf.push_op(OpCode::Coyield);
                self.buf.push_u16(0);
                self.coyield_pcs.push(pc);
            }
            _ => {
                return Err(self.err(
                    CompileErrorKind::UnsupportedNode,
                    "unexpected node in statement position",
                    stmt,
                ));
            }
        }
        self.end_arc(arc);
        self.planner.assert_statement_boundary();
        Ok(())
    }

    /// Release the arc temps recorded since `mark`.
    fn end_arc(&mut self, mark: ArcMark) {
        let slots = self.planner.end_arc_expr(mark);
        for slot in slots {
            self.buf.push_op1(OpCode::Release, slot);
        }
    }

    /// Inline release of everything live in this block: arc temps,
    /// loop-owned slots, then the rc-candidate locals. Used by early
    /// returns; the block-end sequence covers the normal path.
    fn emit_inline_releases(&mut self) {
        let temps: SmallVec<[u8; 4]> = self.planner.arc_temps().iter().copied().collect();
        for slot in temps {
            self.buf.push_op1(OpCode::Release, slot);
        }
        let loop_owned: SmallVec<[u8; 2]> = self
            .loop_stack
            .iter()
            .flat_map(|ctx| ctx.owned_slots.iter().copied())
            .collect();
        for slot in loop_owned {
            self.buf.push_op1(OpCode::Release, slot);
        }
        let locals = self.rc_local_slots.clone();
        for slot in locals {
            self.buf.push_op1(OpCode::Release, slot);
        }
    }

    /// `return expr`: the computed value moves into slot 0 at `+1`, then
    /// everything live releases, then `ret1`.
    fn emit_return_value(&mut self, expr: NodeId) -> SableResult<()> {
        let arc = self.planner.begin_arc_expr();
        let dst = self.planner.next_free_temp_local();
        let value = self.emit_expr(expr, dst, TypeId::ANY, true, true)?;
        self.buf.push_op2(OpCode::Copy, value.slot, 0);
        // Intermediates still owe their releases; the owned result moved
        // to slot 0 and is excluded (ownership requests never enter the
        // arc region).
        self.end_arc(arc);
        self.emit_inline_releases();
        self.buf.push_op(OpCode::Ret1);
        Ok(())
    }

    // =========================================================================
    // Declarations & assignment
    // =========================================================================

    fn emit_local_decl(&mut self, stmt: NodeId) -> SableResult<()> {
        let NodeHead::VarDecl { init, .. } = *self.ast.head(stmt) else {
            unreachable!("caller matched VarDecl");
        };
        let NodeRes::Local(var_idx) = self.sema.res(stmt) else {
            unreachable!("local decl resolves to a local");
        };
        self.emit_store_local(var_idx, init)?;

        // A captured local upgrades to a box at its definition site.
        let (slot, boxed) = {
            let var = self.sema.blocks[self.cur_block.0 as usize].var(var_idx);
            (self.var_slot(var_idx), var.is_boxed())
        };
        if boxed {
            self.buf.push_op1(OpCode::BoxOp, slot);
        }
        Ok(())
    }

    fn emit_assign(&mut self, target: NodeId, value: NodeId) -> SableResult<()> {
        match *self.ast.head(target) {
            NodeHead::Ident(_) => {
                let NodeRes::Local(var_idx) = self.sema.res(target) else {
                    return Err(self.err(
                        CompileErrorKind::InvalidAssignmentTarget,
                        "assignment target did not resolve",
                        target,
                    ));
                };
                let kind = self.sema.blocks[self.cur_block.0 as usize].var(var_idx).kind;
                match kind {
                    LocalVarKind::StaticAlias => self.emit_store_static(var_idx, value),
                    LocalVarKind::ObjectMemberAlias | LocalVarKind::ParentObjectMemberAlias => {
                        self.emit_store_self_field(var_idx, value, target)
                    }
                    _ => self.emit_store_local(var_idx, value),
                }
            }
            NodeHead::AccessExpr { left, .. } => {
                let NodeRes::Field(field) = self.sema.res(target) else {
                    unreachable!("field target resolved during analysis");
                };
                let recv_dst = self.planner.next_free_temp_local();
                let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                let val_dst = self.planner.next_free_temp_local();
                let value = self.emit_expr(value, val_dst, TypeId::ANY, true, true)?;
                self.push_debug_sym(target);
                self.buf.push_op1(OpCode::SetFieldRelease, recv.slot);
                self.buf.push_u16(field.0 as u16);
                self.buf.push_byte(value.slot);
                Ok(())
            }
            NodeHead::IndexExpr { left, index } => {
                let recv_dst = self.planner.next_free_temp_local();
                let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                let idx_dst = self.planner.next_free_temp_local();
                let idx = self.emit_expr(index, idx_dst, TypeId::ANY, false, true)?;
                let val_dst = self.planner.next_free_temp_local();
                let value = self.emit_expr(value, val_dst, TypeId::ANY, true, true)?;
                self.push_debug_sym(target);
                self.buf
                    .push_op3(OpCode::SetIndexRelease, recv.slot, idx.slot, value.slot);
                Ok(())
            }
            _ => Err(self.err(
                CompileErrorKind::InvalidAssignmentTarget,
                "expression is not assignable",
                target,
            )),
        }
    }

    /// Store `value` into a local, choosing among the four copy forms by
    /// rc-candidacy of the old and new values, with the boxed-local
    /// variants where analysis boxed the var.
    fn emit_store_local(&mut self, var_idx: u16, value: NodeId) -> SableResult<()> {
        let (slot, boxed, target_rc, declared) = {
            let var = self.sema.blocks[self.cur_block.0 as usize].var(var_idx);
            // A captured alias's slot holds the shared box; writes go
            // through it just like writes to a boxed origin.
            let through_box = var.is_boxed() || var.kind == LocalVarKind::ParentLocalAlias;
            (
                self.var_slot(var_idx),
                through_box,
                var.is_rc_candidate(),
                var.declared_type,
            )
        };

        // Local-to-local moves collapse into a single fused copy op.
        if !boxed {
            if let Some((src_slot, src_rc)) = self.as_plain_local(value) {
                let op = match (target_rc, src_rc) {
                    (true, true) => OpCode::CopyRetainRelease,
                    (true, false) => OpCode::CopyReleaseDst,
                    (false, _) => OpCode::Copy,
                };
                self.buf.push_op2(op, src_slot, slot);
                return Ok(());
            }
        }

        if !target_rc && !boxed {
            // Plain value into a plain slot; emit straight into place.
            let v = self.emit_expr(value, slot, declared, false, true)?;
            if v.slot != slot {
                self.buf.push_op2(OpCode::Copy, v.slot, slot);
            }
            return Ok(());
        }

        let tmp = self.planner.next_free_temp_local();
        let v = self.emit_expr(value, tmp, declared, true, true)?;
        debug_assert_eq!(v.slot, tmp, "owned values land at the requested dst");
        if boxed {
            self.buf.push_op2(OpCode::SetBoxValueRelease, slot, tmp);
        } else {
            self.buf.push_op2(OpCode::CopyReleaseDst, tmp, slot);
        }
        Ok(())
    }

    /// A value expression that is just a read of a plain (unboxed,
    /// unaliased) local; enables the fused copy forms.
    fn as_plain_local(&self, value: NodeId) -> Option<(u8, bool)> {
        if !matches!(self.ast.head(value), NodeHead::Ident(_)) {
            return None;
        }
        let NodeRes::Local(idx) = self.sema.res(value) else {
            return None;
        };
        let var = self.sema.blocks[self.cur_block.0 as usize].var(idx);
        if !matches!(var.kind, LocalVarKind::Local | LocalVarKind::Param) || var.is_boxed() {
            return None;
        }
        Some((self.var_slot(idx), var.is_rc_candidate()))
    }

    fn emit_store_static(&mut self, var_idx: u16, value: NodeId) -> SableResult<()> {
        let compact = self.sema.blocks[self.cur_block.0 as usize]
            .var(var_idx)
            .static_sym;
        let sym = SymbolId(compact.id());
        let var_id = self.table.ensure_static_var_id(sym);
        let tmp = self.planner.next_free_temp_local();
        let v = self.emit_expr(value, tmp, TypeId::ANY, true, true)?;
        self.buf.push_op(OpCode::SetStaticVar);
        self.buf.push_u16(var_id);
        self.buf.push_byte(v.slot);
        Ok(())
    }

    /// Assignment to a bare receiver field (`x = v` inside a method where
    /// `x` is a field of `self`).
    fn emit_store_self_field(
        &mut self,
        var_idx: u16,
        value: NodeId,
        target: NodeId,
    ) -> SableResult<()> {
        let field = {
            let name = self.sema.blocks[self.cur_block.0 as usize].var(var_idx).name;
            self.table.ensure_field_sym(name)
        };
        let tmp = self.planner.next_free_temp_local();
        let v = self.emit_expr(value, tmp, TypeId::ANY, true, true)?;
        self.push_debug_sym(target);
        self.buf
            .push_op1(OpCode::SetFieldRelease, RegisterPlanner::param_slot(0));
        self.buf.push_u16(field.0 as u16);
        self.buf.push_byte(v.slot);
        Ok(())
    }

    fn emit_op_assign(
        &mut self,
        stmt: NodeId,
        op: BinaryOp,
        target: NodeId,
        value: NodeId,
    ) -> SableResult<()> {
        // Lowered as read, combine, write; the write reuses the plain
        // assignment machinery.
        match *self.ast.head(target) {
            NodeHead::Ident(_) => {
                let NodeRes::Local(var_idx) = self.sema.res(target) else {
                    return Err(self.err(
                        CompileErrorKind::InvalidAssignmentTarget,
                        "assignment target did not resolve",
                        target,
                    ));
                };
                let cur_dst = self.planner.next_free_temp_local();
                let cur = self.emit_expr(target, cur_dst, TypeId::ANY, false, true)?;
                let rhs_dst = self.planner.next_free_temp_local();
                let rhs = self.emit_expr(value, rhs_dst, TypeId::ANY, false, true)?;
                let out = self.planner.next_free_temp_local();
                let result = self.emit_binary_op(stmt, op, cur, rhs, out, true)?;

                let (kind, slot_or_zero, boxed) = {
                    let var = self.sema.blocks[self.cur_block.0 as usize].var(var_idx);
                    let slot = if var.kind == LocalVarKind::StaticAlias {
                        0
                    } else {
                        self.var_slot(var_idx)
                    };
                    (var.kind, slot, var.is_boxed())
                };
                match kind {
                    LocalVarKind::StaticAlias => {
                        let compact = self.sema.blocks[self.cur_block.0 as usize]
                            .var(var_idx)
                            .static_sym;
                        let var_id = self.table.ensure_static_var_id(SymbolId(compact.id()));
                        self.buf.push_op(OpCode::SetStaticVar);
                        self.buf.push_u16(var_id);
                        self.buf.push_byte(result.slot);
                    }
                    LocalVarKind::ObjectMemberAlias | LocalVarKind::ParentObjectMemberAlias => {
                        let field = {
                            let name =
                                self.sema.blocks[self.cur_block.0 as usize].var(var_idx).name;
                            self.table.ensure_field_sym(name)
                        };
                        self.buf
                            .push_op1(OpCode::SetFieldRelease, RegisterPlanner::param_slot(0));
                        self.buf.push_u16(field.0 as u16);
                        self.buf.push_byte(result.slot);
                    }
                    _ => {
                        if boxed || kind == LocalVarKind::ParentLocalAlias {
                            self.buf
                                .push_op2(OpCode::SetBoxValueRelease, slot_or_zero, result.slot);
                        } else {
                            self.buf
                                .push_op2(OpCode::CopyReleaseDst, result.slot, slot_or_zero);
                        }
                    }
                }
                Ok(())
            }
            NodeHead::AccessExpr { left, .. } => {
                let NodeRes::Field(field) = self.sema.res(target) else {
                    unreachable!("field target resolved during analysis");
                };
                let recv_dst = self.planner.next_free_temp_local();
                let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                let cur = self.planner.next_free_temp_local();
                self.push_debug_sym(target);
                self.buf.push_op2(OpCode::Field, recv.slot, cur);
                self.buf.push_u16(field.0 as u16);
                let cur_value = ExprValue {
                    slot: cur,
                    type_id: TypeId::DYNAMIC,
                };
                let rhs_dst = self.planner.next_free_temp_local();
                let rhs = self.emit_expr(value, rhs_dst, TypeId::ANY, false, true)?;
                let out = self.planner.next_free_temp_local();
                let result = self.emit_binary_op(stmt, op, cur_value, rhs, out, true)?;
                self.buf.push_op1(OpCode::SetFieldRelease, recv.slot);
                self.buf.push_u16(field.0 as u16);
                self.buf.push_byte(result.slot);
                Ok(())
            }
            NodeHead::IndexExpr { left, index } => {
                let recv_dst = self.planner.next_free_temp_local();
                let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                let idx_dst = self.planner.next_free_temp_local();
                let idx = self.emit_expr(index, idx_dst, TypeId::ANY, false, true)?;
                let cur = self.planner.next_free_temp_local();
                self.push_debug_sym(target);
                self.buf.push_op3(OpCode::Index, recv.slot, idx.slot, cur);
                self.planner.push_arc_temp(cur);
                let cur_value = ExprValue {
                    slot: cur,
                    type_id: TypeId::DYNAMIC,
                };
                let rhs_dst = self.planner.next_free_temp_local();
                let rhs = self.emit_expr(value, rhs_dst, TypeId::ANY, false, true)?;
                let out = self.planner.next_free_temp_local();
                let result = self.emit_binary_op(stmt, op, cur_value, rhs, out, true)?;
                self.buf
                    .push_op3(OpCode::SetIndexRelease, recv.slot, idx.slot, result.slot);
                Ok(())
            }
            _ => Err(self.err(
                CompileErrorKind::InvalidAssignmentTarget,
                "expression is not assignable",
                target,
            )),
        }
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    /// Evaluate a condition into a temp, releasing its intermediates
    /// before the jump. Releasing first is sound for a truthiness read:
    /// only the value bits matter, and heap values are always truthy.
    fn emit_cond(&mut self, cond: NodeId) -> SableResult<u8> {
        let arc = self.planner.begin_arc_expr();
        let dst = self.planner.next_free_temp_local();
        let v = self.emit_expr(cond, dst, TypeId::BOOLEAN, false, true)?;
        self.end_arc(arc);
        Ok(v.slot)
    }

    fn emit_if(&mut self, stmt: NodeId) -> SableResult<()> {
        let NodeHead::If {
            cond,
            first_stmt,
            else_clause,
        } = *self.ast.head(stmt)
        else {
            unreachable!("caller matched If");
        };

        let mut exit_jumps: SmallVec<[u32; 4]> = SmallVec::new();

        let cond_slot = self.emit_cond(cond)?;
        let mut skip = self.buf.emit_cond_jump(OpCode::JumpNotCond, cond_slot);
        for s in self.ast.siblings(first_stmt) {
            self.emit_stmt(s)?;
        }

        let mut clause = else_clause;
        while !clause.is_null() {
            let NodeHead::ElseClause {
                cond,
                first_stmt,
                next_clause,
            } = *self.ast.head(clause)
            else {
                break;
            };
            exit_jumps.push(self.buf.emit_jump());
            self.buf.patch_jump_here(skip);
            if cond.is_null() {
                for s in self.ast.siblings(first_stmt) {
                    self.emit_stmt(s)?;
                }
                for jump in exit_jumps {
                    self.buf.patch_jump_here(jump);
                }
                return Ok(());
            }
            let cond_slot = self.emit_cond(cond)?;
            skip = self.buf.emit_cond_jump(OpCode::JumpNotCond, cond_slot);
            for s in self.ast.siblings(first_stmt) {
                self.emit_stmt(s)?;
            }
            clause = next_clause;
        }

        self.buf.patch_jump_here(skip);
        for jump in exit_jumps {
            self.buf.patch_jump_here(jump);
        }
        Ok(())
    }

    fn emit_while_cond(&mut self, cond: NodeId, first_stmt: NodeId) -> SableResult<()> {
        let top = self.buf.pc();
        let cond_slot = self.emit_cond(cond)?;
        let exit = self.buf.emit_cond_jump(OpCode::JumpNotCond, cond_slot);

        self.loop_stack.push(LoopContext {
            continue_pc: Some(top),
            ..Default::default()
        });
        for s in self.ast.siblings(first_stmt) {
            self.emit_stmt(s)?;
        }
        let back = self.buf.emit_jump();
        self.buf.patch_jump(back, top);

        self.buf.patch_jump_here(exit);
        let ctx = self.loop_stack.pop().expect("loop context pushed above");
        for jump in ctx.break_jumps {
            self.buf.patch_jump_here(jump);
        }
        Ok(())
    }

    fn emit_while_inf(&mut self, first_stmt: NodeId) -> SableResult<()> {
        let top = self.buf.pc();
        self.loop_stack.push(LoopContext {
            continue_pc: Some(top),
            ..Default::default()
        });
        for s in self.ast.siblings(first_stmt) {
            self.emit_stmt(s)?;
        }
        let back = self.buf.emit_jump();
        self.buf.patch_jump(back, top);
        let ctx = self.loop_stack.pop().expect("loop context pushed above");
        for jump in ctx.break_jumps {
            self.buf.patch_jump_here(jump);
        }
        Ok(())
    }

    /// Fill one reserved loop slot, copying if the expression settled
    /// elsewhere.
    fn emit_into_slot(&mut self, node: NodeId, slot: u8) -> SableResult<()> {
        let v = self.emit_expr(node, slot, TypeId::ANY, false, true)?;
        if v.slot != slot {
            self.buf.push_op2(OpCode::Copy, v.slot, slot);
        }
        Ok(())
    }

    fn emit_for_range(&mut self, stmt: NodeId) -> SableResult<()> {
        let NodeHead::ForRange {
            start,
            end,
            step,
            first_stmt,
            ..
        } = *self.ast.head(stmt)
        else {
            unreachable!("caller matched ForRange");
        };
        let NodeRes::Local(each_idx) = self.sema.res(stmt) else {
            unreachable!("loop var resolves to a local");
        };
        let user_var = self.var_slot(each_idx);

        // The counter and bound temps stay reserved across the body so
        // nested expressions cannot steal them.
        let start_slot = self.planner.next_free_temp_local();
        self.emit_into_slot(start, start_slot)?;
        let end_slot = self.planner.next_free_temp_local();
        self.emit_into_slot(end, end_slot)?;
        let step_slot = self.planner.next_free_temp_local();
        if step.is_null() {
            self.buf
                .emit_const(Value::int(1).expect("1 fits inline"), step_slot);
        } else {
            self.emit_into_slot(step, step_slot)?;
        }
        let counter = self.planner.next_free_temp_local();
        for slot in [start_slot, end_slot, step_slot, counter] {
            self.planner.set_reserved_temp_local(slot);
        }

        let init_pc = self.buf.pc();
        self.buf.push_op(OpCode::ForRangeInit);
        self.buf.push_byte(start_slot);
        self.buf.push_byte(end_slot);
        self.buf.push_byte(step_slot);
        self.buf.push_byte(counter);
        self.buf.push_byte(user_var);
        self.buf.push_u16(0);

        let body_pc = self.buf.pc();
        self.loop_stack.push(LoopContext::default());
        for s in self.ast.siblings(first_stmt) {
            self.emit_stmt(s)?;
        }
        let ctx = self.loop_stack.pop().expect("loop context pushed above");

        let bottom_pc = self.buf.pc();
        self.buf.push_op(OpCode::ForRange);
        self.buf.push_byte(counter);
        self.buf.push_byte(step_slot);
        self.buf.push_byte(end_slot);
        self.buf.push_byte(user_var);
        let back = (i64::from(body_pc) - i64::from(bottom_pc)) as i16;
        self.buf.push_u16(back as u16);

        // The init op skips the whole loop when the range is empty.
        let exit_off = (i64::from(self.buf.pc()) - i64::from(init_pc)) as i16;
        self.buf.set_u16(init_pc as usize + 6, exit_off as u16);

        for jump in ctx.continue_jumps {
            self.buf.patch_jump(jump, bottom_pc);
        }
        for jump in ctx.break_jumps {
            self.buf.patch_jump_here(jump);
        }
        for slot in [start_slot, end_slot, step_slot, counter] {
            self.planner.clear_reserved_temp_local(slot);
        }
        Ok(())
    }

    fn emit_for_iter(&mut self, stmt: NodeId) -> SableResult<()> {
        let NodeHead::ForIter {
            iterable,
            each_val,
            first_stmt,
            ..
        } = *self.ast.head(stmt)
        else {
            unreachable!("caller matched ForIter");
        };
        let NodeRes::Local(each_idx) = self.sema.res(stmt) else {
            unreachable!("loop var resolves to a local");
        };
        let each_slot = self.var_slot(each_idx);
        let is_pair = !each_val.is_null();
        // Pair iteration's second var is declared right after the first.
        let each_val_slot = if is_pair {
            self.var_slot(each_idx + 1)
        } else {
            0
        };

        let iter_group = {
            let name = self
                .table
                .intern_name(if is_pair { "pairIterator" } else { "iterator" });
            self.table.ensure_method_group(name, 0)
        };
        let next_group = {
            let name = self
                .table
                .intern_name(if is_pair { "nextPair" } else { "next" });
            self.table.ensure_method_group(name, 0)
        };
        let sig1 = self.table.ensure_untyped_func_sig(1);

        // The iterator and the step result live in reserved temps for
        // the whole loop.
        let iter_slot = self.planner.next_free_temp_local();
        let step_slot = self.planner.next_free_temp_local();
        self.planner.set_reserved_temp_local(iter_slot);
        self.planner.set_reserved_temp_local(step_slot);

        // iterator() on the iterable; the result moves into its
        // reserved slot, owned there for the duration of the loop.
        {
            let arc = self.planner.begin_arc_expr();
            let recv_dst = self.planner.next_free_temp_local();
            let recv = self.emit_expr(iterable, recv_dst, TypeId::ANY, false, true)?;
            let call_start = self.planner.advance_next_temp_past_arc_temps();
            self.planner.claim_temp_run(call_start, 5);
            self.buf
                .push_op2(OpCode::CopyRetainSrc, recv.slot, call_start + 4);
            self.push_debug_sym(stmt);
            self.emit_call_obj_sym(call_start, 1, true, iter_group, sig1);
            self.buf.push_op2(OpCode::Copy, call_start, iter_slot);
            self.end_arc(arc);
        }

        let enter = self.buf.emit_jump();
        let unpack_pc = self.buf.pc();
        if is_pair {
            let idx_tmp = self.planner.next_free_temp_local();
            let val_tmp = self.planner.next_free_temp_local();
            self.buf.emit_const(Value::int(0).expect("fits"), idx_tmp);
            self.buf.push_op3(OpCode::Index, step_slot, idx_tmp, val_tmp);
            self.buf.push_op2(OpCode::CopyReleaseDst, val_tmp, each_slot);
            self.buf.emit_const(Value::int(1).expect("fits"), idx_tmp);
            self.buf.push_op3(OpCode::Index, step_slot, idx_tmp, val_tmp);
            self.buf
                .push_op2(OpCode::CopyReleaseDst, val_tmp, each_val_slot);
            self.buf.push_op1(OpCode::Release, step_slot);
        } else {
            self.buf
                .push_op2(OpCode::CopyReleaseDst, step_slot, each_slot);
        }

        self.loop_stack.push(LoopContext {
            owned_slots: smallvec::smallvec![iter_slot],
            ..Default::default()
        });
        for s in self.ast.siblings(first_stmt) {
            self.emit_stmt(s)?;
        }
        let ctx = self.loop_stack.pop().expect("loop context pushed above");

        // Loop header: fetch the next element and re-enter the body.
        let header_pc = self.buf.pc();
        self.buf.patch_jump(enter, header_pc);
        {
            let call_start = self.planner.advance_next_temp_past_arc_temps();
            self.planner.claim_temp_run(call_start, 5);
            self.buf
                .push_op2(OpCode::CopyRetainSrc, iter_slot, call_start + 4);
            self.push_debug_sym(stmt);
            self.emit_call_obj_sym(call_start, 1, true, next_group, sig1);
            self.buf.push_op2(OpCode::Copy, call_start, step_slot);
        }
        let reenter = self.buf.emit_cond_jump(OpCode::JumpNotNone, step_slot);
        self.buf.patch_jump(reenter, unpack_pc);

        // Merged exit: the done path falls through and breaks jump here;
        // both release the iterator exactly once.
        let exit_pc = self.buf.pc();
        self.buf.push_op1(OpCode::Release, iter_slot);

        for jump in ctx.continue_jumps {
            self.buf.patch_jump(jump, header_pc);
        }
        for jump in ctx.break_jumps {
            self.buf.patch_jump(jump, exit_pc);
        }
        self.planner.clear_reserved_temp_local(iter_slot);
        self.planner.clear_reserved_temp_local(step_slot);
        Ok(())
    }

    fn emit_match(&mut self, stmt: NodeId) -> SableResult<()> {
        let NodeHead::Match { expr, first_case } = *self.ast.head(stmt) else {
            unreachable!("caller matched Match");
        };

        let expr_dst = self.planner.next_free_temp_local();
        let scrutinee = self.emit_expr(expr, expr_dst, TypeId::ANY, false, true)?;

        // All case conditions evaluate up front into separate temps; the
        // match op walks the cond table and dispatches.
        struct CaseInfo {
            cond_slots: SmallVec<[u8; 2]>,
            first_stmt: NodeId,
            is_else: bool,
        }
        let mut cases: Vec<CaseInfo> = Vec::new();
        let mut num_conds = 0usize;
        for case in self.ast.siblings(first_case) {
            let NodeHead::MatchCase {
                first_cond,
                first_stmt,
                is_else,
            } = *self.ast.head(case)
            else {
                continue;
            };
            let mut info = CaseInfo {
                cond_slots: SmallVec::new(),
                first_stmt,
                is_else,
            };
            if !is_else {
                for cond in self.ast.siblings(first_cond) {
                    let dst = self.planner.next_free_temp_local();
                    let v = self.emit_expr(cond, dst, TypeId::ANY, false, true)?;
                    info.cond_slots.push(v.slot);
                    num_conds += 1;
                }
            }
            cases.push(info);
        }

        let match_pc = self.buf.pc();
        self.buf
            .push_op2(OpCode::Match, scrutinee.slot, num_conds as u8);
        for case in &cases {
            for &slot in &case.cond_slots {
                self.buf.push_byte(slot);
                self.buf.push_u16(0);
            }
        }
        self.buf.push_u16(0);

        // Case bodies emit sequentially; each non-final body jumps to
        // the match end so no fall-through into unrelated code occurs.
        let mut end_jumps: SmallVec<[u32; 4]> = SmallVec::new();
        let mut cond_i = 0usize;
        let mut else_body_pc: Option<u32> = None;
        let num_cases = cases.len();
        for (i, case) in cases.iter().enumerate() {
            let body_pc = self.buf.pc();
            if case.is_else {
                else_body_pc = Some(body_pc);
            } else {
                for _ in &case.cond_slots {
                    let operand_at = match_pc as usize + 3 + cond_i * 3 + 1;
                    let off = (i64::from(body_pc) - i64::from(match_pc)) as i16;
                    self.buf.set_u16(operand_at, off as u16);
                    cond_i += 1;
                }
            }
            for s in self.ast.siblings(case.first_stmt) {
                self.emit_stmt(s)?;
            }
            if i + 1 < num_cases {
                end_jumps.push(self.buf.emit_jump());
            }
        }

        // Without a matching cond and no else, control lands here, past
        // every body.
        let end_pc = self.buf.pc();
        let else_target = else_body_pc.unwrap_or(end_pc);
        let else_operand_at = match_pc as usize + 3 + num_conds * 3;
        let off = (i64::from(else_target) - i64::from(match_pc)) as i16;
        self.buf.set_u16(else_operand_at, off as u16);
        for jump in end_jumps {
            self.buf.patch_jump_here(jump);
        }
        Ok(())
    }

    fn emit_try(&mut self, stmt: NodeId) -> SableResult<()> {
        let NodeHead::TryStmt {
            first_stmt,
            catch_name,
            first_catch_stmt,
        } = *self.ast.head(stmt)
        else {
            unreachable!("caller matched TryStmt");
        };

        let catch_dst = if catch_name.is_null() {
            NONE_DST
        } else {
            let NodeRes::Local(catch_idx) = self.sema.res(stmt) else {
                unreachable!("catch var resolves to a local");
            };
            self.var_slot(catch_idx)
        };

        let try_pc = self.buf.pc();
        self.buf.push_op2(OpCode::TryValue, 0, catch_dst);
        self.buf.push_u16(0);

        for s in self.ast.siblings(first_stmt) {
            self.emit_stmt(s)?;
        }

        // Normal exit pops the frame and skips the catch body.
        let pop_pc = self.buf.pc();
        self.buf.push_op(OpCode::PopTry);
        self.buf.push_u16(0);

        let catch_pc = self.buf.pc();
        self.buf.set_u16(try_pc as usize + 3, catch_pc as u16);
        for s in self.ast.siblings(first_catch_stmt) {
            self.emit_stmt(s)?;
        }
        self.buf.patch_jump_here(pop_pc);
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Emit one expression.
    ///
    /// `dst` is the caller-assigned target slot. `retain` is the
    /// consumer contract: when true the value is owned (`+1` for rc
    /// values) and sits exactly at `dst`; when false the value may live
    /// elsewhere (the returned slot) as a borrow, with any produced `+1`
    /// recorded in the arc-temp region. `dst_is_used = false` allows
    /// eliding pure expressions and dropping call results.
    fn emit_expr(
        &mut self,
        node: NodeId,
        dst: u8,
        req_type: TypeId,
        retain: bool,
        dst_is_used: bool,
    ) -> SableResult<ExprValue> {
        let type_id = self.sema.type_of(node);
        match *self.ast.head(node) {
            NodeHead::IntLit { value, radix } => {
                if !dst_is_used {
                    return Ok(ExprValue { slot: dst, type_id });
                }
                // Nonzero-base and char literals parse unsigned, then
                // coerce into the signed value space.
                let int_val = match radix {
                    IntRadix::Dec
                    | IntRadix::Hex
                    | IntRadix::Oct
                    | IntRadix::Bin
                    | IntRadix::Char => value as i64,
                };
                if req_type == TypeId::FLOAT {
                    self.buf.emit_const(Value::float(int_val as f64), dst);
                    return Ok(ExprValue {
                        slot: dst,
                        type_id: TypeId::FLOAT,
                    });
                }
                let v = Value::int(int_val).ok_or_else(|| {
                    self.err(
                        CompileErrorKind::TypeMismatch,
                        "integer literal out of range",
                        node,
                    )
                })?;
                self.buf.emit_const(v, dst);
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::FloatLit(f) => {
                if dst_is_used {
                    self.buf.emit_const(Value::float(f), dst);
                }
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::TrueLit => {
                if dst_is_used {
                    self.buf.push_op1(OpCode::TrueOp, dst);
                }
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::FalseLit => {
                if dst_is_used {
                    self.buf.push_op1(OpCode::FalseOp, dst);
                }
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::NoneLit => {
                if dst_is_used {
                    self.buf.push_op1(OpCode::NoneOp, dst);
                }
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::StringLit(name) => {
                if dst_is_used {
                    let s = self.table.names.resolve(name);
                    let idx = self.buf.push_string_const(&s);
                    self.buf.emit_const(Value::static_string(idx), dst);
                }
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::SymbolLit(name) => {
                if dst_is_used {
                    self.buf.push_op(OpCode::TagLiteral);
                    self.buf.push_u16(name.0 as u16);
                    self.buf.push_byte(dst);
                }
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::Ident(_) => self.emit_ident(node, dst, retain, dst_is_used),
            NodeHead::StringTemplate {
                first_part,
                num_exprs,
            } => self.emit_string_template(node, first_part, num_exprs, dst, retain),
            NodeHead::BinExpr { op, left, right } => {
                if op.is_logic() {
                    return self.emit_logic(node, op, left, right, dst, retain);
                }
                let mark = self.planner.begin_arc_expr();
                let l_dst = self.planner.next_free_temp_local();
                let l = self.emit_expr(left, l_dst, TypeId::ANY, false, true)?;
                let r_dst = self.planner.next_free_temp_local();
                let r = self.emit_expr(right, r_dst, TypeId::ANY, false, true)?;
                self.planner.compute_next_temp_from(mark);
                self.emit_binary_op(node, op, l, r, dst, retain)
            }
            NodeHead::UnaryExpr { op, child } => {
                let mark = self.planner.begin_arc_expr();
                let c_dst = self.planner.next_free_temp_local();
                let c = self.emit_expr(child, c_dst, TypeId::ANY, false, true)?;
                self.planner.compute_next_temp_from(mark);
                match op {
                    UnaryOp::Neg => {
                        if self.sema.strategy(node) == OpStrategy::Generic {
                            self.push_debug_sym(node);
                        }
                        self.buf.push_op2(OpCode::Neg, c.slot, dst);
                    }
                    UnaryOp::Not => {
                        self.buf.push_op2(OpCode::Not, c.slot, dst);
                    }
                }
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::CallExpr {
                callee,
                first_arg,
                num_args,
            } => self.emit_call(node, callee, first_arg, num_args, dst, retain, dst_is_used),
            NodeHead::NamedArg { .. } => Err(self.err(
                CompileErrorKind::UnsupportedNode,
                "named arguments are not supported",
                node,
            )),
            NodeHead::AccessExpr { left, .. } => match self.sema.res(node) {
                NodeRes::EnumMember {
                    enum_type,
                    member_idx,
                } => {
                    if dst_is_used {
                        self.buf.push_op(OpCode::Tag);
                        self.buf.push_u16(enum_type.0 as u16);
                        self.buf.push_byte(member_idx as u8);
                        self.buf.push_byte(dst);
                    }
                    Ok(ExprValue { slot: dst, type_id })
                }
                NodeRes::Sym(compact) => {
                    self.emit_static_sym_read(compact, dst, retain, node)?;
                    Ok(ExprValue { slot: dst, type_id })
                }
                NodeRes::Field(field) => {
                    let mark = self.planner.begin_arc_expr();
                    let recv_dst = self.planner.next_free_temp_local();
                    let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                    self.planner.compute_next_temp_from(mark);
                    self.push_debug_sym(node);
                    let op = if retain {
                        OpCode::FieldRetain
                    } else {
                        OpCode::Field
                    };
                    self.buf.push_op2(op, recv.slot, dst);
                    self.buf.push_u16(field.0 as u16);
                    Ok(ExprValue { slot: dst, type_id })
                }
                _ => unreachable!("access resolved during analysis"),
            },
            NodeHead::IndexExpr { left, index } | NodeHead::ReverseIndexExpr { left, index } => {
                let reverse = matches!(self.ast.head(node), NodeHead::ReverseIndexExpr { .. });
                let mark = self.planner.begin_arc_expr();
                let recv_dst = self.planner.next_free_temp_local();
                let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                let idx_dst = self.planner.next_free_temp_local();
                let idx = self.emit_expr(index, idx_dst, TypeId::ANY, false, true)?;
                self.planner.compute_next_temp_from(mark);
                self.push_debug_sym(node);
                let op = if reverse {
                    OpCode::ReverseIndex
                } else {
                    OpCode::Index
                };
                self.buf.push_op3(op, recv.slot, idx.slot, dst);
                self.note_owned(dst, retain);
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::SliceExpr { left, start, end } => {
                let mark = self.planner.begin_arc_expr();
                let recv_dst = self.planner.next_free_temp_local();
                let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                let start_slot = self.planner.next_free_temp_local();
                if start.is_null() {
                    self.buf.push_op1(OpCode::NoneOp, start_slot);
                } else {
                    self.emit_into_slot(start, start_slot)?;
                }
                let end_slot = self.planner.next_free_temp_local();
                if end.is_null() {
                    self.buf.push_op1(OpCode::NoneOp, end_slot);
                } else {
                    self.emit_into_slot(end, end_slot)?;
                }
                self.planner.compute_next_temp_from(mark);
                self.push_debug_sym(node);
                self.buf.push_op(OpCode::Slice);
                self.buf.push_byte(recv.slot);
                self.buf.push_byte(start_slot);
                self.buf.push_byte(end_slot);
                self.buf.push_byte(dst);
                self.note_owned(dst, retain);
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::ListLit {
                first_elem,
                num_elems,
            } => {
                let args: Vec<NodeId> = self.ast.siblings(first_elem).collect();
                let first_arg = self.emit_arg_run(&args)?;
                self.buf.push_op3(OpCode::List, first_arg, num_elems, dst);
                self.note_owned(dst, retain);
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::MapLit {
                first_entry,
                num_entries,
            } => self.emit_map(first_entry, num_entries, dst, retain),
            NodeHead::ObjectInit { first_entry, .. } => {
                self.emit_object_init(node, first_entry, dst, retain)
            }
            NodeHead::Lambda {
                body,
                body_is_stmts,
                ..
            } => {
                self.emit_func_value(node, body, !body_is_stmts, dst)?;
                self.note_owned(dst, retain);
                Ok(ExprValue { slot: dst, type_id })
            }
            NodeHead::CoinitExpr { call } => self.emit_coinit(node, call, dst, retain),
            NodeHead::CoresumeExpr { fiber } => {
                let mark = self.planner.begin_arc_expr();
                let fiber_dst = self.planner.next_free_temp_local();
                let f = self.emit_expr(fiber, fiber_dst, TypeId::ANY, false, true)?;
                self.planner.compute_next_temp_from(mark);
                self.push_debug_sym(node);
                self.buf.push_op2(OpCode::Coresume, f.slot, dst);
                self.note_owned(dst, retain);
                Ok(ExprValue { slot: dst, type_id })
            }
            _ => Err(self.err(
                CompileErrorKind::UnsupportedNode,
                "unexpected node in expression position",
                node,
            )),
        }
    }

    /// Record ownership of a freshly produced `+1` value: either the
    /// consumer asked for it, or the arc region carries it to the end of
    /// the statement.
    fn note_owned(&mut self, slot: u8, retain: bool) {
        if !retain {
            self.planner.push_arc_temp(slot);
        }
    }

    fn emit_ident(
        &mut self,
        node: NodeId,
        dst: u8,
        retain: bool,
        dst_is_used: bool,
    ) -> SableResult<ExprValue> {
        let type_id = self.sema.type_of(node);
        let NodeRes::Local(var_idx) = self.sema.res(node) else {
            return Err(self.err(
                CompileErrorKind::UnknownSymbol,
                "identifier did not resolve",
                node,
            ));
        };
        let (kind, boxed, rc, compact) = {
            let var = self.sema.blocks[self.cur_block.0 as usize].var(var_idx);
            (var.kind, var.is_boxed(), var.is_rc_candidate(), var.static_sym)
        };
        match kind {
            LocalVarKind::Local | LocalVarKind::Param => {
                let slot = self.var_slot(var_idx);
                if boxed {
                    if !dst_is_used {
                        return Ok(ExprValue { slot: dst, type_id });
                    }
                    let op = if retain {
                        OpCode::BoxValueRetain
                    } else {
                        OpCode::BoxValue
                    };
                    self.buf.push_op2(op, slot, dst);
                    return Ok(ExprValue { slot: dst, type_id });
                }
                if retain {
                    let op = if rc { OpCode::CopyRetainSrc } else { OpCode::Copy };
                    self.buf.push_op2(op, slot, dst);
                    return Ok(ExprValue { slot: dst, type_id });
                }
                // Borrowed read: hand back the variable's own slot.
                Ok(ExprValue { slot, type_id })
            }
            LocalVarKind::ParentLocalAlias => {
                // The captured box was copied into this frame's slot.
                let slot = self.var_slot(var_idx);
                if !dst_is_used {
                    return Ok(ExprValue { slot: dst, type_id });
                }
                let op = if retain {
                    OpCode::BoxValueRetain
                } else {
                    OpCode::BoxValue
                };
                self.buf.push_op2(op, slot, dst);
                Ok(ExprValue { slot: dst, type_id })
            }
            LocalVarKind::ObjectMemberAlias | LocalVarKind::ParentObjectMemberAlias => {
                // Reads the receiver's field through `self` (param 0).
                let field = {
                    let name = self.sema.blocks[self.cur_block.0 as usize].var(var_idx).name;
                    self.table.ensure_field_sym(name)
                };
                self.push_debug_sym(node);
                let op = if retain {
                    OpCode::FieldRetain
                } else {
                    OpCode::Field
                };
                self.buf
                    .push_op2(op, RegisterPlanner::param_slot(0), dst);
                self.buf.push_u16(field.0 as u16);
                Ok(ExprValue { slot: dst, type_id })
            }
            LocalVarKind::StaticAlias => {
                if !dst_is_used {
                    return Ok(ExprValue { slot: dst, type_id });
                }
                self.emit_static_sym_read(compact, dst, retain, node)?;
                Ok(ExprValue { slot: dst, type_id })
            }
        }
    }

    fn emit_static_sym_read(
        &mut self,
        compact: CompactSymbolId,
        dst: u8,
        retain: bool,
        node: NodeId,
    ) -> SableResult<()> {
        if compact.is_func_sym() {
            // A function symbol used as a value.
            self.buf.push_op(OpCode::StaticFunc);
            self.buf.push_u16(compact.id() as u16);
            self.buf.push_byte(dst);
            self.note_owned(dst, retain);
            return Ok(());
        }
        let sym = SymbolId(compact.id());
        match self.table.sym(sym).kind {
            SymbolKind::Variable { .. } => {
                let var_id = self.table.ensure_static_var_id(sym);
                self.buf.push_op(OpCode::StaticVar);
                self.buf.push_u16(var_id);
                self.buf.push_byte(dst);
                if retain {
                    self.buf.push_op1(OpCode::Retain, dst);
                }
                Ok(())
            }
            SymbolKind::Function { func_sym } => {
                self.buf.push_op(OpCode::StaticFunc);
                self.buf.push_u16(func_sym.0 as u16);
                self.buf.push_byte(dst);
                self.note_owned(dst, retain);
                Ok(())
            }
            _ => Err(self.err(
                CompileErrorKind::UnsupportedNode,
                "symbol is not usable as a value",
                node,
            )),
        }
    }

    fn emit_binary_op(
        &mut self,
        node: NodeId,
        op: BinaryOp,
        l: ExprValue,
        r: ExprValue,
        dst: u8,
        retain: bool,
    ) -> SableResult<ExprValue> {
        let type_id = self.sema.type_of(node);
        let strategy = self.sema.strategy(node);
        let specialized_int = strategy == OpStrategy::Specialized
            && l.type_id == TypeId::INTEGER
            && r.type_id == TypeId::INTEGER;

        let opcode = match op {
            BinaryOp::Add => {
                if specialized_int {
                    OpCode::AddInt
                } else {
                    OpCode::Add
                }
            }
            BinaryOp::Sub => {
                if specialized_int {
                    OpCode::MinusInt
                } else {
                    OpCode::Minus
                }
            }
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::Pow => OpCode::Pow,
            BinaryOp::BitAnd => OpCode::BitAnd,
            BinaryOp::BitOr => OpCode::BitOr,
            BinaryOp::BitXor => OpCode::BitXor,
            BinaryOp::Shl => OpCode::Shl,
            BinaryOp::Shr => OpCode::Shr,
            BinaryOp::Lt => OpCode::Lt,
            BinaryOp::Le => OpCode::Le,
            BinaryOp::Gt => OpCode::Gt,
            BinaryOp::Ge => OpCode::Ge,
            BinaryOp::Eq => OpCode::Eq,
            BinaryOp::Ne => OpCode::Ne,
            BinaryOp::And | BinaryOp::Or => unreachable!("logic ops short-circuit"),
        };

        // Generic ops dispatch at runtime and may throw, so they need a
        // source location. Division throws on zero even when typed.
        if strategy == OpStrategy::Generic || matches!(op, BinaryOp::Div | BinaryOp::Mod) {
            self.push_debug_sym(node);
        }
        self.buf.push_op3(opcode, l.slot, r.slot, dst);

        // A generic op may produce a heap value (string concatenation).
        if strategy == OpStrategy::Generic && TypeLattice::is_rc_candidate(type_id) {
            self.note_owned(dst, retain);
        }
        Ok(ExprValue { slot: dst, type_id })
    }

    fn emit_logic(
        &mut self,
        node: NodeId,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
        dst: u8,
        retain: bool,
    ) -> SableResult<ExprValue> {
        let type_id = self.sema.type_of(node);
        // Short-circuit: the left value must land in dst so a skip still
        // leaves the result in place.
        let l = self.emit_expr(left, dst, TypeId::ANY, retain, true)?;
        if l.slot != dst {
            self.buf.push_op2(OpCode::Copy, l.slot, dst);
        }
        let jump_op = if op == BinaryOp::And {
            OpCode::JumpNotCond
        } else {
            OpCode::JumpCond
        };
        let skip = self.buf.emit_cond_jump(jump_op, dst);
        if retain {
            // The right side replaces the owned left value.
            self.buf.push_op1(OpCode::Release, dst);
        }
        let r = self.emit_expr(right, dst, TypeId::ANY, retain, true)?;
        if r.slot != dst {
            self.buf.push_op2(OpCode::Copy, r.slot, dst);
        }
        self.buf.patch_jump_here(skip);
        Ok(ExprValue { slot: dst, type_id })
    }

    fn emit_string_template(
        &mut self,
        node: NodeId,
        first_part: NodeId,
        num_exprs: u8,
        dst: u8,
        retain: bool,
    ) -> SableResult<ExprValue> {
        let mut literal_idxs: SmallVec<[u32; 4]> = SmallVec::new();
        let mut exprs: SmallVec<[NodeId; 4]> = SmallVec::new();
        for part in self.ast.siblings(first_part) {
            if let NodeHead::StringLit(name) = *self.ast.head(part) {
                let s = self.table.names.resolve(name);
                literal_idxs.push(self.buf.push_string_const(&s));
            } else {
                exprs.push(part);
            }
        }
        debug_assert_eq!(exprs.len(), num_exprs as usize);
        debug_assert_eq!(literal_idxs.len(), num_exprs as usize + 1);

        let arg_start = self.emit_arg_run(&exprs)?;
        self.push_debug_sym(node);
        self.buf
            .push_op3(OpCode::StringTemplate, arg_start, num_exprs, dst);
        for idx in literal_idxs {
            self.buf.push_u16(idx as u16);
        }
        self.note_owned(dst, retain);
        Ok(ExprValue {
            slot: dst,
            type_id: TypeId::STRING,
        })
    }

    fn emit_map(
        &mut self,
        first_entry: NodeId,
        num_entries: u8,
        dst: u8,
        retain: bool,
    ) -> SableResult<ExprValue> {
        if num_entries == 0 {
            self.buf.push_op1(OpCode::MapEmpty, dst);
            self.note_owned(dst, retain);
            return Ok(ExprValue {
                slot: dst,
                type_id: TypeId::MAP,
            });
        }

        let mut key_idxs: SmallVec<[u32; 4]> = SmallVec::new();
        let mut values: SmallVec<[NodeId; 4]> = SmallVec::new();
        for entry in self.ast.siblings(first_entry) {
            let NodeHead::MapEntry { key, value } = *self.ast.head(entry) else {
                continue;
            };
            let key_name = match *self.ast.head(key) {
                NodeHead::Ident(name) | NodeHead::StringLit(name) => name,
                _ => {
                    return Err(self.err(
                        CompileErrorKind::UnsupportedNode,
                        "map literal keys must be identifiers or strings",
                        key,
                    ));
                }
            };
            let s = self.table.names.resolve(key_name);
            key_idxs.push(self.buf.push_string_const(&s));
            values.push(value);
        }

        let arg_start = self.emit_arg_run(&values)?;
        self.buf.push_op3(OpCode::Map, arg_start, num_entries, dst);
        for idx in key_idxs {
            self.buf.push_u16(idx as u16);
        }
        self.note_owned(dst, retain);
        Ok(ExprValue {
            slot: dst,
            type_id: TypeId::MAP,
        })
    }

    fn emit_object_init(
        &mut self,
        node: NodeId,
        first_entry: NodeId,
        dst: u8,
        retain: bool,
    ) -> SableResult<ExprValue> {
        let type_id = self.sema.type_of(node);
        let layout = self
            .table
            .object_fields(type_id)
            .expect("object layout recorded at declaration")
            .clone();

        // Field values pack in layout order; absent fields default to
        // `none`.
        let mut by_offset: Vec<Option<NodeId>> = vec![None; layout.len()];
        for entry in self.ast.siblings(first_entry) {
            let NodeHead::MapEntry { key, value } = *self.ast.head(entry) else {
                continue;
            };
            let NodeRes::Field(field) = self.sema.res(key) else {
                unreachable!("object init keys resolved during analysis");
            };
            let offset = self
                .table
                .object_field_offset(type_id, field)
                .expect("field checked during analysis");
            by_offset[offset as usize] = Some(value);
        }

        let num_fields = layout.len() as u8;
        let first_arg = self.planner.advance_next_temp_past_arc_temps();
        self.planner.claim_temp_run(first_arg, num_fields);
        for (i, value) in by_offset.iter().enumerate() {
            let slot = first_arg + i as u8;
            match value {
                Some(v) => {
                    let res = self.emit_expr(*v, slot, TypeId::ANY, true, true)?;
                    debug_assert_eq!(res.slot, slot);
                    self.planner.settle_temp_run(first_arg + num_fields);
                }
                None => self.buf.push_op1(OpCode::NoneOp, slot),
            }
        }

        // Objects with at most four fields take the construction fast
        // path.
        let op = if layout.len() <= 4 {
            OpCode::ObjectSmall
        } else {
            OpCode::Object
        };
        self.buf.push_op(op);
        self.buf.push_u16(type_id.0 as u16);
        self.buf.push_byte(first_arg);
        self.buf.push_byte(num_fields);
        self.buf.push_byte(dst);
        self.note_owned(dst, retain);
        Ok(ExprValue { slot: dst, type_id })
    }

    /// Emit a `lambda` or `closure` value into `dst`.
    fn emit_func_value(
        &mut self,
        decl: NodeId,
        body: NodeId,
        expr_body: bool,
        dst: u8,
    ) -> SableResult<()> {
        let block_id = self.sema.block_of[&decl];
        let (entry_pc, num_locals) = self.emit_func_body(decl, body, expr_body)?;

        let (num_params, captures): (u8, SmallVec<[u16; 2]>) = {
            let block = &self.sema.blocks[block_id.0 as usize];
            (block.params.len() as u8, block.captures.clone())
        };
        let sig = self.table.ensure_untyped_func_sig(num_params as usize);

        if captures.is_empty() {
            self.buf.push_op(OpCode::Lambda);
            self.buf.push_u16(entry_pc as u16);
            self.buf.push_byte(num_params);
            self.buf.push_byte(num_locals);
            self.buf.push_u16(sig.0 as u16);
            self.buf.push_byte(dst);
            return Ok(());
        }

        // Each captured parent box is retained once for the closure.
        let capture_slots: SmallVec<[u8; 2]> = captures
            .iter()
            .map(|&parent_idx| self.var_slot(parent_idx))
            .collect();
        for &slot in &capture_slots {
            self.buf.push_op1(OpCode::Retain, slot);
        }
        self.buf.push_op(OpCode::Closure);
        self.buf.push_u16(entry_pc as u16);
        self.buf.push_byte(num_params);
        self.buf.push_byte(num_locals);
        self.buf.push_u16(sig.0 as u16);
        self.buf.push_byte(capture_slots.len() as u8);
        self.buf.push_byte(dst);
        for &slot in &capture_slots {
            self.buf.push_byte(slot);
        }
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn emit_call_obj_sym(
        &mut self,
        call_start: u8,
        num_args: u8,
        want_ret: bool,
        group: MethodGroupId,
        sig: FuncSigId,
    ) {
        self.buf.push_op(OpCode::CallObjSym);
        self.buf.push_byte(call_start);
        self.buf.push_byte(num_args);
        self.buf.push_byte(want_ret as u8);
        self.buf.push_u16(group.0 as u16);
        self.buf.push_u16(sig.0 as u16);
    }

    /// Emit expressions into a fresh contiguous run of slots past the
    /// arc-temp region, each retained for the consumer op. Returns the
    /// first slot.
    fn emit_arg_run(&mut self, args: &[NodeId]) -> SableResult<u8> {
        let first_arg = self.planner.advance_next_temp_past_arc_temps();
        let len = args.len() as u8;
        self.planner.claim_temp_run(first_arg, len);
        for (i, &arg) in args.iter().enumerate() {
            let slot = first_arg + i as u8;
            let res = self.emit_expr(arg, slot, TypeId::ANY, true, true)?;
            debug_assert_eq!(res.slot, slot, "owned values land at the requested dst");
            self.planner.settle_temp_run(first_arg + len);
        }
        Ok(first_arg)
    }

    /// Lay out a call region `[header × 4][receiver?][args…][callee?]`
    /// starting at a fresh contiguous run. Returns the call start.
    fn emit_call_region(
        &mut self,
        recv: Option<u8>,
        args: &[NodeId],
        callee: Option<NodeId>,
    ) -> SableResult<u8> {
        let extra = recv.is_some() as u8 + callee.is_some() as u8;
        let total = 4 + args.len() as u8 + extra;
        let call_start = self.planner.advance_next_temp_past_arc_temps();
        self.planner.claim_temp_run(call_start, total);

        let mut slot = call_start + 4;
        if let Some(recv_slot) = recv {
            self.buf.push_op2(OpCode::CopyRetainSrc, recv_slot, slot);
            slot += 1;
        }
        for &arg in args {
            let res = self.emit_expr(arg, slot, TypeId::ANY, true, true)?;
            debug_assert_eq!(res.slot, slot, "owned values land at the requested dst");
            self.planner.settle_temp_run(call_start + total);
            slot += 1;
        }
        if let Some(callee) = callee {
            let res = self.emit_expr(callee, slot, TypeId::ANY, true, true)?;
            debug_assert_eq!(res.slot, slot);
            self.planner.settle_temp_run(call_start + total);
        }
        Ok(call_start)
    }

    fn emit_call(
        &mut self,
        call: NodeId,
        callee: NodeId,
        first_arg: NodeId,
        num_args: u8,
        dst: u8,
        retain: bool,
        want_ret: bool,
    ) -> SableResult<ExprValue> {
        let type_id = self.sema.type_of(call);
        let args: Vec<NodeId> = self.ast.siblings(first_arg).collect();

        match self.sema.res(call) {
            NodeRes::Sym(compact) if compact.is_func_sym() => {
                // Static function call: arity and signature validated at
                // the call site by the dispatch loop.
                let func = FuncSymId(compact.id());
                let sig = self.table.func_sym(func).sig;
                let call_start = self.emit_call_region(None, &args, None)?;
                self.push_debug_sym(call);
                self.buf.push_op(OpCode::CallSym);
                self.buf.push_byte(call_start);
                self.buf.push_byte(num_args);
                self.buf.push_byte(want_ret as u8);
                self.buf.push_u16(func.0 as u16);
                self.buf.push_u16(sig.0 as u16);
                self.buf.push_byte(0);
                self.buf.push_byte(0);
                self.finish_call(call_start, dst, retain, want_ret, type_id)
            }
            NodeRes::Sym(compact) => {
                // Known family, late dispatch: the runtime re-resolves
                // the overload from the argument types.
                let sym = SymbolId(compact.id());
                let call_start = self.emit_call_region(None, &args, None)?;
                self.push_debug_sym(call);
                self.buf.push_op(OpCode::Call);
                self.buf.push_byte(call_start);
                self.buf.push_byte(num_args);
                self.buf.push_byte(want_ret as u8);
                self.buf.push_u16(sym.0 as u16);
                self.finish_call(call_start, dst, retain, want_ret, type_id)
            }
            NodeRes::MethodCall { group, sig } => {
                let NodeHead::AccessExpr { left, .. } = *self.ast.head(callee) else {
                    unreachable!("method call callee is an access expression");
                };
                let recv_dst = self.planner.next_free_temp_local();
                let recv = self.emit_expr(left, recv_dst, TypeId::ANY, false, true)?;
                let call_start = self.emit_call_region(Some(recv.slot), &args, None)?;
                self.push_debug_sym(call);
                self.emit_call_obj_sym(call_start, num_args + 1, want_ret, group, sig);
                self.finish_call(call_start, dst, retain, want_ret, type_id)
            }
            _ => {
                // Function-value call: the callee value sits after the
                // args and is consumed by the op.
                let call_start = self.emit_call_region(None, &args, Some(callee))?;
                self.push_debug_sym(call);
                let op = if want_ret { OpCode::Call1 } else { OpCode::Call0 };
                self.buf.push_op2(op, call_start, num_args);
                self.finish_call(call_start, dst, retain, want_ret, type_id)
            }
        }
    }

    /// After a call, the result (if requested) sits at the call start,
    /// owned.
    fn finish_call(
        &mut self,
        call_start: u8,
        dst: u8,
        retain: bool,
        want_ret: bool,
        type_id: TypeId,
    ) -> SableResult<ExprValue> {
        if !want_ret {
            return Ok(ExprValue {
                slot: call_start,
                type_id: TypeId::NONE,
            });
        }
        if retain {
            if call_start != dst {
                self.buf.push_op2(OpCode::Copy, call_start, dst);
            }
            return Ok(ExprValue { slot: dst, type_id });
        }
        self.note_owned(call_start, false);
        Ok(ExprValue {
            slot: call_start,
            type_id,
        })
    }

    fn emit_coinit(
        &mut self,
        node: NodeId,
        call: NodeId,
        dst: u8,
        retain: bool,
    ) -> SableResult<ExprValue> {
        let NodeHead::CallExpr {
            first_arg,
            num_args,
            ..
        } = *self.ast.head(call)
        else {
            unreachable!("analysis checked the coinit form");
        };
        let NodeRes::Sym(compact) = self.sema.res(call) else {
            return Err(self.err(
                CompileErrorKind::UnsupportedNode,
                "coinit expects a static function call",
                node,
            ));
        };
        if !compact.is_func_sym() {
            return Err(self.err(
                CompileErrorKind::UnsupportedNode,
                "coinit expects a static function call",
                node,
            ));
        }
        let func = FuncSymId(compact.id());

        let args: Vec<NodeId> = self.ast.siblings(first_arg).collect();
        let arg_start = self.emit_arg_run(&args)?;
        self.push_debug_sym(node);
        self.buf.push_op(OpCode::Coinit);
        self.buf.push_byte(arg_start);
        self.buf.push_byte(num_args);
        self.buf.push_u16(func.0 as u16);
        self.buf.push_byte(0);
        self.buf.push_byte(dst);
        self.note_owned(dst, retain);
        Ok(ExprValue {
            slot: dst,
            type_id: TypeId::FIBER,
        })
    }

    // =========================================================================
    // Debug symbols
    // =========================================================================

    /// Record a debug symbol at the current pc: source node, the live
    /// retained temps, and (patched at block end) the end-locals pc.
    fn push_debug_sym(&mut self, node: NodeId) {
        let temp_releases: SmallVec<[u8; 4]> = self.planner.arc_temps().iter().copied().collect();
        self.debug.push(DebugSym {
            pc: self.buf.pc(),
            node,
            end_locals_pc: END_LOCALS_NONE,
            temp_releases,
        });
    }
}
