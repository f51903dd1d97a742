//! Semantic analysis.
//!
//! The analyzer walks each chunk twice: a declarations pass that
//! registers every static symbol, then a bodies pass that processes
//! function bodies and top-level statements. The two-pass order is what
//! makes forward references between top-level declarations work.
//!
//! Each expression receives an inferred type from the lattice, stored in
//! a side table; identifiers and call sites are additionally stamped
//! with their resolved symbol so the emitter never re-resolves. The
//! walk also decides capture and boxing, narrows dynamic-variable types
//! per sub-block, and records static-initializer dependency edges.

use crate::block::{Block, BlockId, LocalVar, LocalVarFlags, LocalVarKind, SubBlock};
use crate::host::{HostEnv, HostFuncResult};
use crate::sym::{
    CallError, CallResolution, ChunkId, CompactSymbolId, FieldSymId, FuncSigId, FuncSymId,
    MethodEntry, MethodGroupId, SymbolId, SymbolKind, SymbolTable,
};
use rustc_hash::{FxHashMap, FxHashSet};
use sable_core::{
    Ast, BinaryOp, CompileErrorKind, NameId, NodeHead, NodeId, SableError, SableResult, TypeId,
    TypeLattice, UnaryOp, Value,
};
use smallvec::SmallVec;

/// Lowering strategy chosen for an operator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpStrategy {
    /// Not an operator node.
    #[default]
    None,
    /// Both operands statically numeric; lowers to a fast-path op.
    Specialized,
    /// Dispatches at runtime and may throw a type error.
    Generic,
}

/// How a node resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRes {
    /// No resolution recorded.
    #[default]
    Unresolved,
    /// A variable of the enclosing block (including synthesized aliases).
    Local(u16),
    /// A static symbol or func-sym.
    Sym(CompactSymbolId),
    /// A method call site.
    MethodCall {
        /// Interned `(name, num_args)` group.
        group: MethodGroupId,
        /// Untyped signature of the call arity.
        sig: FuncSigId,
    },
    /// A field access site.
    Field(FieldSymId),
    /// An enum member reference.
    EnumMember {
        /// Owning enum's type id.
        enum_type: TypeId,
        /// Member ordinal.
        member_idx: u32,
    },
}

/// Statistics returned from analysis.
#[derive(Debug, Default, Clone)]
pub struct SemaStats {
    /// Blocks analyzed (functions, lambdas, top level).
    pub blocks_analyzed: usize,
    /// Capture entries created.
    pub captures_created: usize,
    /// Static-initializer dependency edges recorded.
    pub dep_edges: usize,
}

/// Analysis output for one chunk.
#[derive(Debug, Default)]
pub struct ChunkSema {
    /// Per-node resolution.
    pub res: Vec<NodeRes>,
    /// Per-node inferred type.
    pub types: Vec<TypeId>,
    /// Per-node operator strategy.
    pub strategies: Vec<OpStrategy>,
    /// All blocks; index 0 is the chunk's top level.
    pub blocks: Vec<Block>,
    /// Block of each `FuncDecl`/`Lambda` node.
    pub block_of: FxHashMap<NodeId, BlockId>,
    /// Top-level variable symbols with their declaring nodes, in source
    /// order.
    pub static_vars: Vec<(SymbolId, NodeId)>,
    /// Dependency edges: initialized symbol to the symbols its
    /// initializer references.
    pub init_deps: FxHashMap<SymbolId, Vec<SymbolId>>,
    /// Modules imported with `use`, searched during call resolution.
    pub using_modules: Vec<SymbolId>,
    /// Host functions resolved at declaration.
    pub host_funcs: Vec<(FuncSymId, HostFuncResult)>,
    /// Host variables resolved at declaration: `(static var id, value)`.
    pub host_vars: Vec<(u16, Value)>,
    /// Walk statistics.
    pub stats: SemaStats,
}

impl ChunkSema {
    /// Resolution of a node.
    #[inline]
    #[must_use]
    pub fn res(&self, id: NodeId) -> NodeRes {
        self.res[id.index()]
    }

    /// Inferred type of a node.
    #[inline]
    #[must_use]
    pub fn type_of(&self, id: NodeId) -> TypeId {
        self.types[id.index()]
    }

    /// Operator strategy of a node.
    #[inline]
    #[must_use]
    pub fn strategy(&self, id: NodeId) -> OpStrategy {
        self.strategies[id.index()]
    }
}

/// Result of a variable lookup.
#[derive(Debug)]
enum VarLookup {
    /// Found or synthesized in the current block.
    Local(u16),
    /// Nothing found.
    NotFound,
}

/// The semantic analyzer for one chunk.
pub struct SemanticAnalyzer<'a> {
    table: &'a mut SymbolTable,
    lattice: &'a mut TypeLattice,
    host: &'a mut dyn HostEnv,
    chunk_id: ChunkId,
    ast: &'a Ast,
    out: ChunkSema,

    cur_block: BlockId,
    /// Sub-block scopes of the block being walked, innermost last.
    sub_blocks: Vec<SubBlock>,
    /// Declared return types of the enclosing blocks.
    ret_types: Vec<TypeId>,
    /// The symbol whose static initializer is being analyzed, if any.
    static_init_sym: Option<SymbolId>,
    dep_seen: FxHashSet<(SymbolId, SymbolId)>,
}

impl<'a> SemanticAnalyzer<'a> {
    /// Create an analyzer.
    pub fn new(
        table: &'a mut SymbolTable,
        lattice: &'a mut TypeLattice,
        host: &'a mut dyn HostEnv,
        chunk_id: ChunkId,
        ast: &'a Ast,
    ) -> Self {
        let num_nodes = ast.len();
        let mut out = ChunkSema::default();
        out.res = vec![NodeRes::Unresolved; num_nodes];
        out.types = vec![TypeId::UNDEFINED; num_nodes];
        out.strategies = vec![OpStrategy::None; num_nodes];
        Self {
            table,
            lattice,
            host,
            chunk_id,
            ast,
            out,
            cur_block: BlockId::MAIN,
            sub_blocks: Vec::new(),
            ret_types: Vec::new(),
            static_init_sym: None,
            dep_seen: FxHashSet::default(),
        }
    }

    /// Run both passes over the chunk rooted at `root_stmt`.
    pub fn analyze(mut self, root_stmt: NodeId) -> SableResult<ChunkSema> {
        // Top-level block.
        self.out
            .blocks
            .push(Block::new(None, NodeId::NULL, true));
        self.out.stats.blocks_analyzed += 1;

        self.declare_pass(root_stmt)?;
        self.bodies_pass(root_stmt)?;
        Ok(self.out)
    }

    fn err(&self, kind: CompileErrorKind, msg: impl Into<String>, node: NodeId) -> SableError {
        SableError::compile(kind, msg, node)
    }

    fn name_str(&self, name: NameId) -> String {
        self.table.names.resolve(name).to_string()
    }

    // =========================================================================
    // Pass 1: declarations
    // =========================================================================

    fn declare_pass(&mut self, root_stmt: NodeId) -> SableResult<()> {
        let stmts: Vec<NodeId> = self.ast.siblings(root_stmt).collect();
        for stmt in stmts {
            self.declare_stmt(stmt)?;
        }
        Ok(())
    }

    fn declare_stmt(&mut self, stmt: NodeId) -> SableResult<()> {
        match *self.ast.head(stmt) {
            NodeHead::VarDecl {
                name, type_spec, ..
            } => {
                let type_id = self.resolve_type_spec(type_spec)?;
                let sym = self
                    .table
                    .declare(
                        SymbolId::ROOT,
                        name,
                        SymbolKind::Variable {
                            type_id,
                            decl_chunk: self.chunk_id,
                            decl_node: stmt,
                        },
                    )
                    .ok_or_else(|| {
                        self.err(
                            CompileErrorKind::DuplicateSymbol,
                            format!("duplicate symbol `{}`", self.name_str(name)),
                            stmt,
                        )
                    })?;
                self.table.ensure_static_var_id(sym);
                self.out.static_vars.push((sym, stmt));
            }
            NodeHead::FuncDecl {
                name,
                first_param,
                num_params,
                ret_spec,
                ..
            } => {
                let func = self.declare_func_under(
                    SymbolId::ROOT,
                    name,
                    first_param,
                    num_params,
                    ret_spec,
                    stmt,
                )?;
                self.out.res[stmt.index()] = NodeRes::Sym(CompactSymbolId::from_func_sym(func));
            }
            NodeHead::ObjectDecl {
                name,
                first_field,
                first_func,
                ..
            } => {
                self.declare_object(stmt, name, first_field, first_func)?;
            }
            NodeHead::EnumDecl { name, first_member } => {
                let type_id = self.lattice.alloc_object_type();
                let members: Vec<NodeId> = self.ast.siblings(first_member).collect();
                let enum_sym = self
                    .table
                    .declare(
                        SymbolId::ROOT,
                        name,
                        SymbolKind::EnumType {
                            type_id,
                            num_members: members.len() as u32,
                        },
                    )
                    .ok_or_else(|| {
                        self.err(
                            CompileErrorKind::DuplicateSymbol,
                            format!("duplicate symbol `{}`", self.name_str(name)),
                            stmt,
                        )
                    })?;
                for (idx, member) in members.into_iter().enumerate() {
                    let NodeHead::EnumMemberDecl { name: member_name } = *self.ast.head(member)
                    else {
                        continue;
                    };
                    self.table
                        .declare(
                            enum_sym,
                            member_name,
                            SymbolKind::EnumMember {
                                enum_type: type_id,
                                member_idx: idx as u32,
                            },
                        )
                        .ok_or_else(|| {
                            self.err(
                                CompileErrorKind::DuplicateSymbol,
                                format!("duplicate enum member `{}`", self.name_str(member_name)),
                                member,
                            )
                        })?;
                }
            }
            NodeHead::UseDecl { name } => {
                let Some(sym) = self.table.lookup(SymbolId::ROOT, name) else {
                    return Err(self.err(
                        CompileErrorKind::UnknownSymbol,
                        format!("unknown module `{}`", self.name_str(name)),
                        stmt,
                    ));
                };
                if !matches!(self.table.sym(sym).kind, SymbolKind::Module(_)) {
                    return Err(self.err(
                        CompileErrorKind::UnknownSymbol,
                        format!("`{}` is not a module", self.name_str(name)),
                        stmt,
                    ));
                }
                self.out.using_modules.push(sym);
            }
            NodeHead::HostFuncDecl {
                name,
                first_param,
                num_params,
                ret_spec,
            } => {
                let func = self.declare_func_under(
                    SymbolId::ROOT,
                    name,
                    first_param,
                    num_params,
                    ret_spec,
                    stmt,
                )?;
                let name_s = self.name_str(name);
                let result = self
                    .host
                    .load_func(crate::sym::ModuleId(0), &name_s, num_params)
                    .ok_or_else(|| {
                        self.err(
                            CompileErrorKind::UnknownSymbol,
                            format!("host function `{name_s}` not provided"),
                            stmt,
                        )
                    })?;
                self.out.host_funcs.push((func, result));
                self.out.res[stmt.index()] = NodeRes::Sym(CompactSymbolId::from_func_sym(func));
            }
            NodeHead::HostTypeDecl { name } => {
                let name_s = self.name_str(name);
                let result = self
                    .host
                    .load_type(crate::sym::ModuleId(0), &name_s)
                    .ok_or_else(|| {
                        self.err(
                            CompileErrorKind::UnknownSymbol,
                            format!("host type `{name_s}` not provided"),
                            stmt,
                        )
                    })?;
                let type_id = result
                    .type_id
                    .unwrap_or_else(|| self.lattice.alloc_object_type());
                self.table
                    .declare(
                        SymbolId::ROOT,
                        name,
                        SymbolKind::Object {
                            type_id,
                            module: crate::sym::ModuleId(0),
                        },
                    )
                    .ok_or_else(|| {
                        self.err(
                            CompileErrorKind::DuplicateSymbol,
                            format!("duplicate symbol `{name_s}`"),
                            stmt,
                        )
                    })?;
            }
            NodeHead::HostVarDecl { name, type_spec } => {
                let type_id = self.resolve_type_spec(type_spec)?;
                let name_s = self.name_str(name);
                let value = self
                    .host
                    .load_var(crate::sym::ModuleId(0), &name_s)
                    .ok_or_else(|| {
                        self.err(
                            CompileErrorKind::UnknownSymbol,
                            format!("host variable `{name_s}` not provided"),
                            stmt,
                        )
                    })?;
                let sym = self
                    .table
                    .declare(
                        SymbolId::ROOT,
                        name,
                        SymbolKind::Variable {
                            type_id,
                            decl_chunk: self.chunk_id,
                            decl_node: stmt,
                        },
                    )
                    .ok_or_else(|| {
                        self.err(
                            CompileErrorKind::DuplicateSymbol,
                            format!("duplicate symbol `{name_s}`"),
                            stmt,
                        )
                    })?;
                let var_id = self.table.ensure_static_var_id(sym);
                self.out.host_vars.push((var_id, value));
            }
            _ => {}
        }
        Ok(())
    }

    /// Declare a function (or method) symbol plus its overload entry.
    fn declare_func_under(
        &mut self,
        parent: SymbolId,
        name: NameId,
        first_param: NodeId,
        _num_params: u8,
        ret_spec: NodeId,
        decl: NodeId,
    ) -> SableResult<FuncSymId> {
        let params = self.param_types(first_param)?;
        let ret = if ret_spec.is_null() {
            TypeId::ANY
        } else {
            self.resolve_type_spec(ret_spec)?
        };
        let sig = self.table.ensure_func_sig(&params, ret);

        let sym = match self.table.lookup(parent, name) {
            Some(existing) => {
                if !matches!(self.table.sym(existing).kind, SymbolKind::Function { .. }) {
                    return Err(self.err(
                        CompileErrorKind::DuplicateSymbol,
                        format!("duplicate symbol `{}`", self.name_str(name)),
                        decl,
                    ));
                }
                existing
            }
            None => self
                .table
                .declare(
                    parent,
                    name,
                    SymbolKind::Function {
                        func_sym: FuncSymId::MANY,
                    },
                )
                .expect("absence checked above"),
        };

        self.table
            .declare_func(sym, sig, self.chunk_id, decl, ret)
            .ok_or_else(|| {
                self.err(
                    CompileErrorKind::DuplicateSymbol,
                    format!(
                        "`{}` already declared with signature {}",
                        self.name_str(name),
                        self.table.sig_display(sig)
                    ),
                    decl,
                )
            })
    }

    fn declare_object(
        &mut self,
        stmt: NodeId,
        name: NameId,
        first_field: NodeId,
        first_func: NodeId,
    ) -> SableResult<()> {
        let type_id = self.lattice.alloc_object_type();
        let obj_sym = self
            .table
            .declare(
                SymbolId::ROOT,
                name,
                SymbolKind::Object {
                    type_id,
                    module: crate::sym::ModuleId(0),
                },
            )
            .ok_or_else(|| {
                self.err(
                    CompileErrorKind::DuplicateSymbol,
                    format!("duplicate symbol `{}`", self.name_str(name)),
                    stmt,
                )
            })?;

        // Field order defines the object layout.
        let mut fields: Vec<FieldSymId> = Vec::new();
        for field in self.ast.siblings(first_field) {
            let NodeHead::ObjectFieldDecl { name: field_name, .. } = *self.ast.head(field) else {
                continue;
            };
            fields.push(self.table.ensure_field_sym(field_name));
        }
        self.table.set_object_fields(type_id, fields.into());

        // Methods occupy a separate namespace keyed by (type, group).
        for func in self.ast.siblings(first_func) {
            let NodeHead::FuncDecl {
                name: func_name,
                first_param,
                num_params,
                ret_spec,
                ..
            } = *self.ast.head(func)
            else {
                continue;
            };
            let func_sym = self.declare_func_under(
                obj_sym,
                func_name,
                first_param,
                num_params,
                ret_spec,
                func,
            )?;
            // The group arity excludes the implicit receiver.
            let group = self
                .table
                .ensure_method_group(func_name, num_params.saturating_sub(1));
            let sig = self.table.func_sym(func_sym).sig;
            self.table
                .declare_method(type_id, group, MethodEntry { sig, func_sym });
            self.out.res[func.index()] = NodeRes::Sym(CompactSymbolId::from_func_sym(func_sym));
        }
        Ok(())
    }

    fn param_types(&mut self, first_param: NodeId) -> SableResult<Vec<TypeId>> {
        let mut params = Vec::new();
        for param in self.ast.siblings(first_param) {
            match *self.ast.head(param) {
                NodeHead::Param { type_spec, .. } => {
                    params.push(if type_spec.is_null() {
                        TypeId::ANY
                    } else {
                        self.resolve_type_spec(type_spec)?
                    });
                }
                NodeHead::GenericParams => {
                    return Err(self.err(
                        CompileErrorKind::UnsupportedNode,
                        "generic type parameters are not supported",
                        param,
                    ));
                }
                _ => {
                    return Err(self.err(
                        CompileErrorKind::UnsupportedNode,
                        "unexpected node in parameter list",
                        param,
                    ));
                }
            }
        }
        Ok(params)
    }

    fn resolve_type_spec(&mut self, spec: NodeId) -> SableResult<TypeId> {
        if spec.is_null() {
            return Ok(TypeId::DYNAMIC);
        }
        let NodeHead::TypeSpec(name) = *self.ast.head(spec) else {
            return Err(self.err(
                CompileErrorKind::UnsupportedNode,
                "expected a type annotation",
                spec,
            ));
        };
        let name_s = self.name_str(name);
        let builtin = match name_s.as_str() {
            "any" => Some(TypeId::ANY),
            "boolean" => Some(TypeId::BOOLEAN),
            "float" => Some(TypeId::FLOAT),
            "int" => Some(TypeId::INTEGER),
            "string" => Some(TypeId::STRING),
            "rawstring" => Some(TypeId::RAWSTRING),
            "symbol" => Some(TypeId::SYMBOL),
            "List" => Some(TypeId::LIST),
            "Map" => Some(TypeId::MAP),
            "pointer" => Some(TypeId::POINTER),
            "none" => Some(TypeId::NONE),
            "error" => Some(TypeId::ERROR),
            "Fiber" => Some(TypeId::FIBER),
            "dynamic" => Some(TypeId::DYNAMIC),
            _ => None,
        };
        if let Some(t) = builtin {
            return Ok(t);
        }
        // A user object or enum type declared earlier.
        if let Some(sym) = self.table.lookup(SymbolId::ROOT, name) {
            match self.table.sym(sym).kind {
                SymbolKind::Object { type_id, .. } | SymbolKind::EnumType { type_id, .. } => {
                    return Ok(type_id)
                }
                SymbolKind::BuiltinType(t) => return Ok(t),
                _ => {}
            }
        }
        Err(self.err(
            CompileErrorKind::UnknownSymbol,
            format!("unknown type `{name_s}`"),
            spec,
        ))
    }

    // =========================================================================
    // Pass 2: bodies
    // =========================================================================

    fn bodies_pass(&mut self, root_stmt: NodeId) -> SableResult<()> {
        self.sub_blocks.push(SubBlock::new(0, false));
        self.ret_types.push(TypeId::ANY);
        let stmts: Vec<NodeId> = self.ast.siblings(root_stmt).collect();
        for stmt in stmts {
            match *self.ast.head(stmt) {
                NodeHead::FuncDecl {
                    first_param,
                    ret_spec,
                    first_stmt,
                    ..
                } => {
                    let ret = if ret_spec.is_null() {
                        TypeId::ANY
                    } else {
                        self.resolve_type_spec(ret_spec)?
                    };
                    self.analyze_func_body(stmt, first_param, first_stmt, ret, true, None)?;
                }
                NodeHead::ObjectDecl { name, first_func, .. } => {
                    let obj_sym = self.table.lookup(SymbolId::ROOT, name).expect("declared");
                    let SymbolKind::Object { type_id, .. } = self.table.sym(obj_sym).kind else {
                        unreachable!()
                    };
                    let funcs: Vec<NodeId> = self.ast.siblings(first_func).collect();
                    for func in funcs {
                        let NodeHead::FuncDecl {
                            first_param,
                            ret_spec,
                            first_stmt,
                            ..
                        } = *self.ast.head(func)
                        else {
                            continue;
                        };
                        let ret = if ret_spec.is_null() {
                            TypeId::ANY
                        } else {
                            self.resolve_type_spec(ret_spec)?
                        };
                        self.analyze_func_body(
                            func,
                            first_param,
                            first_stmt,
                            ret,
                            true,
                            Some(type_id),
                        )?;
                    }
                }
                NodeHead::VarDecl { name, type_spec, init } => {
                    let sym = self.table.lookup(SymbolId::ROOT, name).expect("declared");
                    self.static_init_sym = Some(sym);
                    let init_type = self.analyze_expr(init)?;
                    self.static_init_sym = None;

                    // Write-once inference for untyped statics: later
                    // references see the initializer's type.
                    let declared = self.resolve_type_spec(type_spec)?;
                    if declared == TypeId::DYNAMIC {
                        if let SymbolKind::Variable { type_id, .. } = self.table.sym_kind_mut(sym) {
                            *type_id = init_type;
                        }
                    } else if !TypeLattice::is_compat(init_type, declared) {
                        return Err(self.err(
                            CompileErrorKind::TypeMismatch,
                            format!(
                                "expected `{declared}`, initializer has type `{init_type}`"
                            ),
                            init,
                        ));
                    }
                    self.out.types[stmt.index()] = init_type;
                }
                NodeHead::EnumDecl { .. }
                | NodeHead::UseDecl { .. }
                | NodeHead::HostFuncDecl { .. }
                | NodeHead::HostTypeDecl { .. }
                | NodeHead::HostVarDecl { .. } => {}
                _ => self.analyze_stmt(stmt)?,
            }
        }
        self.sub_blocks.pop();
        self.ret_types.pop();
        Ok(())
    }

    /// Analyze a function, lambda, or method body in a fresh block.
    fn analyze_func_body(
        &mut self,
        decl: NodeId,
        first_param: NodeId,
        first_stmt: NodeId,
        ret_type: TypeId,
        is_static_func: bool,
        recv_type: Option<TypeId>,
    ) -> SableResult<BlockId> {
        let block_id = BlockId(self.out.blocks.len() as u32);
        let mut block = Block::new(Some(self.cur_block), decl, is_static_func);
        if let Some(recv) = recv_type {
            block.is_method = true;
            block.recv_type = recv;
        }
        self.out.blocks.push(block);
        self.out.block_of.insert(decl, block_id);
        self.out.stats.blocks_analyzed += 1;

        let prev_block = self.cur_block;
        let prev_subs = std::mem::take(&mut self.sub_blocks);
        self.cur_block = block_id;
        self.sub_blocks.push(SubBlock::new(0, false));
        self.ret_types.push(ret_type);

        // Parameters, including a method's implicit `self` (the parser
        // supplies it as the first param node).
        let params: Vec<NodeId> = self.ast.siblings(first_param).collect();
        for param in params {
            let NodeHead::Param { name, type_spec } = *self.ast.head(param) else {
                continue;
            };
            let declared = self.resolve_type_spec(type_spec)?;
            let mut flags = LocalVarFlags::empty();
            if declared == TypeId::DYNAMIC {
                flags |= LocalVarFlags::DYNAMIC;
            }
            if TypeLattice::is_rc_candidate(declared) {
                flags |= LocalVarFlags::RC_CANDIDATE;
            }
            let var = LocalVar {
                name,
                kind: LocalVarKind::Param,
                declared_type: declared,
                current_type: declared,
                flags,
                capture_idx: 0,
                static_sym: CompactSymbolId::NULL,
                register_slot: 0,
            };
            let block = &mut self.out.blocks[block_id.0 as usize];
            let (idx, _) = block.add_var(var);
            block.params.push(idx);
            self.out.res[param.index()] = NodeRes::Local(idx);
        }

        let stmts: Vec<NodeId> = self.ast.siblings(first_stmt).collect();
        for stmt in stmts {
            self.analyze_stmt(stmt)?;
        }

        self.ret_types.pop();
        self.sub_blocks = prev_subs;
        self.cur_block = prev_block;
        Ok(block_id)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn analyze_stmt(&mut self, stmt: NodeId) -> SableResult<()> {
        match *self.ast.head(stmt) {
            NodeHead::ExprStmt { expr } => {
                self.analyze_expr(expr)?;
            }
            NodeHead::VarDecl { name, type_spec, init } => {
                let init_type = self.analyze_expr(init)?;
                let declared = self.resolve_type_spec(type_spec)?;
                if declared != TypeId::DYNAMIC && !TypeLattice::is_compat(init_type, declared) {
                    return Err(self.err(
                        CompileErrorKind::TypeMismatch,
                        format!("expected `{declared}`, initializer has type `{init_type}`"),
                        init,
                    ));
                }
                let idx = self.declare_local(name, declared, init_type);
                self.out.res[stmt.index()] = NodeRes::Local(idx);
            }
            NodeHead::FuncDecl {
                name,
                first_param,
                ret_spec,
                first_stmt,
                ..
            } => {
                // A nested `func` declares a local bound to a function
                // value; unlike top-level functions it may capture.
                let ret = if ret_spec.is_null() {
                    TypeId::ANY
                } else {
                    self.resolve_type_spec(ret_spec)?
                };
                let idx = self.declare_local(name, TypeId::ANY, TypeId::ANY);
                self.out.res[stmt.index()] = NodeRes::Local(idx);
                self.analyze_func_body(stmt, first_param, first_stmt, ret, false, None)?;
            }
            NodeHead::Assign { target, value } => {
                let value_type = self.analyze_expr(value)?;
                self.analyze_assign_target(target, value_type)?;
            }
            NodeHead::OpAssign { op, target, value } => {
                let value_type = self.analyze_expr(value)?;
                let target_type = self.analyze_assign_target(target, TypeId::UNDEFINED)?;
                let (result, strategy) = self.type_binary(op, target_type, value_type);
                self.out.strategies[stmt.index()] = strategy;
                self.out.types[stmt.index()] = result;
                // The merged value flows back into the target.
                self.note_narrow(target, result);
            }
            NodeHead::If {
                cond,
                first_stmt,
                else_clause,
            } => {
                self.analyze_expr(cond)?;
                self.analyze_sub_block(first_stmt, false)?;
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
                    if !cond.is_null() {
                        self.analyze_expr(cond)?;
                    }
                    self.analyze_sub_block(first_stmt, false)?;
                    clause = next_clause;
                }
            }
            NodeHead::WhileCond { cond, first_stmt } => {
                self.analyze_expr(cond)?;
                self.analyze_sub_block(first_stmt, true)?;
            }
            NodeHead::WhileInf { first_stmt } => {
                self.analyze_sub_block(first_stmt, true)?;
            }
            NodeHead::ForRange {
                each,
                start,
                end,
                step,
                first_stmt,
            } => {
                let start_t = self.analyze_expr(start)?;
                let end_t = self.analyze_expr(end)?;
                if !step.is_null() {
                    self.analyze_expr(step)?;
                }
                let each_type = if start_t == TypeId::INTEGER && end_t == TypeId::INTEGER {
                    TypeId::INTEGER
                } else {
                    TypeId::ANY
                };
                self.push_sub_block(true);
                let idx = self.declare_local(each, each_type, each_type);
                self.out.res[stmt.index()] = NodeRes::Local(idx);
                let stmts: Vec<NodeId> = self.ast.siblings(first_stmt).collect();
                for s in stmts {
                    self.analyze_stmt(s)?;
                }
                self.pop_sub_block();
            }
            NodeHead::ForIter {
                iterable,
                each,
                each_val,
                first_stmt,
            } => {
                self.analyze_expr(iterable)?;
                self.push_sub_block(true);
                let idx = self.declare_local(each, TypeId::DYNAMIC, TypeId::ANY);
                self.out.res[stmt.index()] = NodeRes::Local(idx);
                if !each_val.is_null() {
                    // Pair iteration: the second variable's index follows
                    // the first, which the emitter relies on.
                    self.declare_local(each_val, TypeId::DYNAMIC, TypeId::ANY);
                }
                let stmts: Vec<NodeId> = self.ast.siblings(first_stmt).collect();
                for s in stmts {
                    self.analyze_stmt(s)?;
                }
                self.pop_sub_block();
            }
            NodeHead::Break | NodeHead::Continue => {}
            NodeHead::Return { expr } => {
                if !expr.is_null() {
                    if !self.ast.next(expr).is_null() {
                        return Err(self.err(
                            CompileErrorKind::UnsupportedNode,
                            "multiple return values are not supported",
                            stmt,
                        ));
                    }
                    let t = self.analyze_expr(expr)?;
                    let expected = *self.ret_types.last().expect("inside a block");
                    if expected != TypeId::ANY
                        && expected != TypeId::DYNAMIC
                        && !TypeLattice::is_compat(t, expected)
                    {
                        return Err(self.err(
                            CompileErrorKind::TypeMismatch,
                            format!("expected return type `{expected}`, found `{t}`"),
                            expr,
                        ));
                    }
                }
            }
            NodeHead::Match { expr, first_case } => {
                self.analyze_expr(expr)?;
                let cases: Vec<NodeId> = self.ast.siblings(first_case).collect();
                for case in cases {
                    let NodeHead::MatchCase {
                        first_cond,
                        first_stmt,
                        ..
                    } = *self.ast.head(case)
                    else {
                        continue;
                    };
                    let conds: Vec<NodeId> = self.ast.siblings(first_cond).collect();
                    for cond in conds {
                        self.analyze_expr(cond)?;
                    }
                    self.analyze_sub_block(first_stmt, false)?;
                }
            }
            NodeHead::TryStmt {
                first_stmt,
                catch_name,
                first_catch_stmt,
            } => {
                self.analyze_sub_block(first_stmt, false)?;
                self.push_sub_block(false);
                if !catch_name.is_null() {
                    let idx = self.declare_local(catch_name, TypeId::ERROR, TypeId::ERROR);
                    self.out.res[stmt.index()] = NodeRes::Local(idx);
                }
                let stmts: Vec<NodeId> = self.ast.siblings(first_catch_stmt).collect();
                for s in stmts {
                    self.analyze_stmt(s)?;
                }
                self.pop_sub_block();
            }
            NodeHead::Throw { expr } => {
                self.analyze_expr(expr)?;
            }
            NodeHead::Coyield => {}
            NodeHead::ObjectDecl { .. } | NodeHead::EnumDecl { .. } => {
                return Err(self.err(
                    CompileErrorKind::UnsupportedNode,
                    "type declarations must be at the top level",
                    stmt,
                ));
            }
            _ => {
                return Err(self.err(
                    CompileErrorKind::UnsupportedNode,
                    "unexpected node in statement position",
                    stmt,
                ));
            }
        }
        Ok(())
    }

    /// Analyze an assignment target, returning its pre-assignment type.
    fn analyze_assign_target(&mut self, target: NodeId, value_type: TypeId) -> SableResult<TypeId> {
        match *self.ast.head(target) {
            NodeHead::Ident(name) => match self.get_or_lookup_var(name, true, target)? {
                VarLookup::Local(idx) => {
                    self.out.res[target.index()] = NodeRes::Local(idx);
                    let (entry_type, kind) = {
                        let var = self.out.blocks[self.cur_block.0 as usize].var(idx);
                        (var.current_type, var.kind)
                    };
                    self.out.types[target.index()] = entry_type;
                    if kind == LocalVarKind::StaticAlias {
                        return Ok(entry_type);
                    }
                    if value_type != TypeId::UNDEFINED {
                        self.narrow_var(idx, value_type);
                    }
                    Ok(entry_type)
                }
                VarLookup::NotFound => Err(self.err(
                    CompileErrorKind::UnknownSymbol,
                    format!("unknown symbol `{}`", self.name_str(name)),
                    target,
                )),
            },
            NodeHead::AccessExpr { left, name } => {
                self.analyze_expr(left)?;
                let field = self.table.ensure_field_sym(name);
                self.out.res[target.index()] = NodeRes::Field(field);
                self.out.types[target.index()] = TypeId::DYNAMIC;
                Ok(TypeId::DYNAMIC)
            }
            NodeHead::IndexExpr { left, index } => {
                self.analyze_expr(left)?;
                self.analyze_expr(index)?;
                self.out.types[target.index()] = TypeId::DYNAMIC;
                Ok(TypeId::DYNAMIC)
            }
            _ => Err(self.err(
                CompileErrorKind::InvalidAssignmentTarget,
                "expression is not assignable",
                target,
            )),
        }
    }

    /// Record a narrowing after an op-assign resolved its result type.
    fn note_narrow(&mut self, target: NodeId, result: TypeId) {
        if let NodeRes::Local(idx) = self.out.res(target) {
            let block = &self.out.blocks[self.cur_block.0 as usize];
            if block.var(idx).kind != LocalVarKind::StaticAlias {
                self.narrow_var(idx, result);
            }
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn analyze_expr(&mut self, expr: NodeId) -> SableResult<TypeId> {
        let inferred = match *self.ast.head(expr) {
            NodeHead::IntLit { .. } => TypeId::INTEGER,
            NodeHead::FloatLit(_) => TypeId::FLOAT,
            NodeHead::StringLit(_) => TypeId::STATIC_STRING,
            NodeHead::TrueLit | NodeHead::FalseLit => TypeId::BOOLEAN,
            NodeHead::NoneLit => TypeId::NONE,
            NodeHead::SymbolLit(_) => TypeId::SYMBOL,
            NodeHead::Ident(name) => self.analyze_ident(expr, name)?,
            NodeHead::StringTemplate { first_part, .. } => {
                let parts: Vec<NodeId> = self.ast.siblings(first_part).collect();
                for part in parts {
                    if !matches!(self.ast.head(part), NodeHead::StringLit(_)) {
                        self.analyze_expr(part)?;
                    }
                }
                TypeId::STRING
            }
            NodeHead::BinExpr { op, left, right } => {
                let lt = self.analyze_expr(left)?;
                let rt = self.analyze_expr(right)?;
                let (result, strategy) = self.type_binary(op, lt, rt);
                self.out.strategies[expr.index()] = strategy;
                result
            }
            NodeHead::UnaryExpr { op, child } => {
                let ct = self.analyze_expr(child)?;
                match op {
                    UnaryOp::Neg => {
                        if ct == TypeId::INTEGER || ct == TypeId::FLOAT {
                            self.out.strategies[expr.index()] = OpStrategy::Specialized;
                            ct
                        } else {
                            self.out.strategies[expr.index()] = OpStrategy::Generic;
                            TypeId::DYNAMIC
                        }
                    }
                    UnaryOp::Not => TypeId::BOOLEAN,
                }
            }
            NodeHead::CallExpr {
                callee,
                first_arg,
                num_args,
            } => self.analyze_call(expr, callee, first_arg, num_args)?,
            NodeHead::NamedArg { .. } => {
                return Err(self.err(
                    CompileErrorKind::UnsupportedNode,
                    "named arguments are not supported",
                    expr,
                ));
            }
            NodeHead::AccessExpr { left, name } => self.analyze_access(expr, left, name)?,
            NodeHead::IndexExpr { left, index }
            | NodeHead::ReverseIndexExpr { left, index } => {
                self.analyze_expr(left)?;
                self.analyze_expr(index)?;
                TypeId::DYNAMIC
            }
            NodeHead::SliceExpr { left, start, end } => {
                self.analyze_expr(left)?;
                if !start.is_null() {
                    self.analyze_expr(start)?;
                }
                if !end.is_null() {
                    self.analyze_expr(end)?;
                }
                TypeId::DYNAMIC
            }
            NodeHead::ListLit { first_elem, .. } => {
                let elems: Vec<NodeId> = self.ast.siblings(first_elem).collect();
                for elem in elems {
                    self.analyze_expr(elem)?;
                }
                TypeId::LIST
            }
            NodeHead::MapLit { first_entry, .. } => {
                let entries: Vec<NodeId> = self.ast.siblings(first_entry).collect();
                for entry in entries {
                    let NodeHead::MapEntry { value, .. } = *self.ast.head(entry) else {
                        continue;
                    };
                    self.analyze_expr(value)?;
                }
                TypeId::MAP
            }
            NodeHead::ObjectInit {
                name, first_entry, ..
            } => self.analyze_object_init(expr, name, first_entry)?,
            NodeHead::Lambda {
                first_param,
                body,
                body_is_stmts,
                ..
            } => {
                if body_is_stmts {
                    self.analyze_func_body(expr, first_param, body, TypeId::ANY, false, None)?;
                } else {
                    // An expression body behaves as an implicit return.
                    self.analyze_lambda_expr_body(expr, first_param, body)?;
                }
                TypeId::ANY
            }
            NodeHead::CoinitExpr { call } => {
                let NodeHead::CallExpr {
                    callee,
                    first_arg,
                    num_args,
                } = *self.ast.head(call)
                else {
                    return Err(self.err(
                        CompileErrorKind::UnsupportedNode,
                        "coinit expects a call expression",
                        call,
                    ));
                };
                self.analyze_call(call, callee, first_arg, num_args)?;
                TypeId::FIBER
            }
            NodeHead::CoresumeExpr { fiber } => {
                self.analyze_expr(fiber)?;
                TypeId::DYNAMIC
            }
            _ => {
                return Err(self.err(
                    CompileErrorKind::UnsupportedNode,
                    "unexpected node in expression position",
                    expr,
                ));
            }
        };
        self.out.types[expr.index()] = inferred;
        Ok(inferred)
    }

    fn analyze_lambda_expr_body(
        &mut self,
        decl: NodeId,
        first_param: NodeId,
        body_expr: NodeId,
    ) -> SableResult<BlockId> {
        // An expression-bodied lambda behaves as `return expr`.
        let block_id = BlockId(self.out.blocks.len() as u32);
        let block = Block::new(Some(self.cur_block), decl, false);
        self.out.blocks.push(block);
        self.out.block_of.insert(decl, block_id);
        self.out.stats.blocks_analyzed += 1;

        let prev_block = self.cur_block;
        let prev_subs = std::mem::take(&mut self.sub_blocks);
        self.cur_block = block_id;
        self.sub_blocks.push(SubBlock::new(0, false));
        self.ret_types.push(TypeId::ANY);

        let params: Vec<NodeId> = self.ast.siblings(first_param).collect();
        for param in params {
            let NodeHead::Param { name, type_spec } = *self.ast.head(param) else {
                continue;
            };
            let declared = self.resolve_type_spec(type_spec)?;
            let mut flags = LocalVarFlags::empty();
            if declared == TypeId::DYNAMIC {
                flags |= LocalVarFlags::DYNAMIC;
            }
            if TypeLattice::is_rc_candidate(declared) {
                flags |= LocalVarFlags::RC_CANDIDATE;
            }
            let var = LocalVar {
                name,
                kind: LocalVarKind::Param,
                declared_type: declared,
                current_type: declared,
                flags,
                capture_idx: 0,
                static_sym: CompactSymbolId::NULL,
                register_slot: 0,
            };
            let block = &mut self.out.blocks[block_id.0 as usize];
            let (idx, _) = block.add_var(var);
            block.params.push(idx);
            self.out.res[param.index()] = NodeRes::Local(idx);
        }

        self.analyze_expr(body_expr)?;

        self.ret_types.pop();
        self.sub_blocks = prev_subs;
        self.cur_block = prev_block;
        Ok(block_id)
    }

    fn analyze_ident(&mut self, expr: NodeId, name: NameId) -> SableResult<TypeId> {
        match self.get_or_lookup_var(name, true, expr)? {
            VarLookup::Local(idx) => {
                self.out.res[expr.index()] = NodeRes::Local(idx);
                let block = &self.out.blocks[self.cur_block.0 as usize];
                let var = block.var(idx);
                if var.kind == LocalVarKind::StaticAlias {
                    let compact = var.static_sym;
                    if compact.is_func_sym() {
                        return Ok(TypeId::ANY);
                    }
                    let sym = SymbolId(compact.id());
                    self.record_init_dep(sym);
                    return Ok(match self.table.sym(sym).kind {
                        SymbolKind::Variable { type_id, .. } => type_id,
                        SymbolKind::EnumType { .. }
                        | SymbolKind::Object { .. }
                        | SymbolKind::BuiltinType(_) => TypeId::METATYPE,
                        _ => TypeId::ANY,
                    });
                }
                Ok(var.current_type)
            }
            VarLookup::NotFound => Err(self.err(
                CompileErrorKind::UnknownSymbol,
                format!("unknown symbol `{}`", self.name_str(name)),
                expr,
            )),
        }
    }

    fn analyze_access(&mut self, expr: NodeId, left: NodeId, name: NameId) -> SableResult<TypeId> {
        // Enum member or module member access resolves statically.
        if let NodeHead::Ident(left_name) = *self.ast.head(left) {
            if self.lookup_in_block(left_name).is_none() {
                if let Ok(Some(sym)) = self.table.resolve_distinct(SymbolId::ROOT, left_name) {
                    match self.table.sym(sym).kind {
                        SymbolKind::EnumType { type_id, .. } => {
                            let Some(member) = self.table.lookup(sym, name) else {
                                return Err(self.err(
                                    CompileErrorKind::UnknownSymbol,
                                    format!("unknown enum member `{}`", self.name_str(name)),
                                    expr,
                                ));
                            };
                            let SymbolKind::EnumMember { member_idx, .. } =
                                self.table.sym(member).kind
                            else {
                                unreachable!("enum children are members");
                            };
                            self.out.res[expr.index()] = NodeRes::EnumMember {
                                enum_type: type_id,
                                member_idx,
                            };
                            self.out.types[left.index()] = TypeId::METATYPE;
                            return Ok(type_id);
                        }
                        SymbolKind::Module(_) => {
                            let Some(member) = self.table.lookup(sym, name) else {
                                return Err(self.err(
                                    CompileErrorKind::UnknownSymbol,
                                    format!("unknown member `{}`", self.name_str(name)),
                                    expr,
                                ));
                            };
                            self.out.res[expr.index()] =
                                NodeRes::Sym(CompactSymbolId::from_sym(member));
                            self.out.types[left.index()] = TypeId::METATYPE;
                            return Ok(match self.table.sym(member).kind {
                                SymbolKind::Variable { type_id, .. } => type_id,
                                _ => TypeId::ANY,
                            });
                        }
                        _ => {}
                    }
                }
            }
        }

        self.analyze_expr(left)?;
        let field = self.table.ensure_field_sym(name);
        self.out.res[expr.index()] = NodeRes::Field(field);
        Ok(TypeId::DYNAMIC)
    }

    fn analyze_call(
        &mut self,
        call: NodeId,
        callee: NodeId,
        first_arg: NodeId,
        num_args: u8,
    ) -> SableResult<TypeId> {
        // Argument types first; they drive overload matching.
        let args: Vec<NodeId> = self.ast.siblings(first_arg).collect();
        let mut arg_types: SmallVec<[TypeId; 4]> = SmallVec::new();
        for &arg in &args {
            if matches!(self.ast.head(arg), NodeHead::NamedArg { .. }) {
                return Err(self.err(
                    CompileErrorKind::UnsupportedNode,
                    "named arguments are not supported",
                    arg,
                ));
            }
            arg_types.push(self.analyze_expr(arg)?);
        }
        debug_assert_eq!(args.len(), num_args as usize);
        let has_dynamic_arg = arg_types.iter().any(|&t| t == TypeId::DYNAMIC);

        match *self.ast.head(callee) {
            NodeHead::Ident(name) => {
                // A local holding a function value shadows static
                // resolution.
                if let Some(idx) = self.lookup_in_block(name) {
                    self.check_static_init_local(callee, idx)?;
                    self.out.res[callee.index()] = NodeRes::Local(idx);
                    self.out.types[callee.index()] = TypeId::ANY;
                    return Ok(TypeId::DYNAMIC);
                }

                let usings = self.out.using_modules.clone();
                match self.table.resolve_for_call(
                    SymbolId::ROOT,
                    name,
                    &arg_types,
                    has_dynamic_arg,
                    &usings,
                ) {
                    Ok(CallResolution::Func(func)) => {
                        self.out.res[call.index()] =
                            NodeRes::Sym(CompactSymbolId::from_func_sym(func));
                        Ok(self.table.func_sym(func).ret_type)
                    }
                    Ok(CallResolution::Dynamic(sym)) => {
                        self.out.res[call.index()] = NodeRes::Sym(CompactSymbolId::from_sym(sym));
                        Ok(TypeId::DYNAMIC)
                    }
                    Ok(CallResolution::None) => {
                        // A static variable holding a callable value
                        // lowers to a function-value call.
                        if let Ok(Some(sym)) = self.table.resolve_distinct(SymbolId::ROOT, name) {
                            if matches!(self.table.sym(sym).kind, SymbolKind::Variable { .. }) {
                                if let VarLookup::Local(idx) =
                                    self.get_or_lookup_var(name, true, callee)?
                                {
                                    self.out.res[callee.index()] = NodeRes::Local(idx);
                                    self.out.types[callee.index()] = TypeId::ANY;
                                    return Ok(TypeId::DYNAMIC);
                                }
                            }
                        }
                        Err(self.err(
                            CompileErrorKind::UnknownSymbol,
                            format!("unknown symbol `{}`", self.name_str(name)),
                            callee,
                        ))
                    }
                    Err(CallError::Ambiguous { num_overloads }) => Err(self.err(
                        CompileErrorKind::AmbiguousOverload,
                        format!(
                            "multiple overloads named `{}` ({num_overloads} candidates)",
                            self.name_str(name)
                        ),
                        call,
                    )),
                    Err(CallError::WrongSignature { sig }) => Err(self.err(
                        CompileErrorKind::IncompatibleSignature,
                        format!(
                            "`{}` expects {}",
                            self.name_str(name),
                            self.table.sig_display(sig)
                        ),
                        call,
                    )),
                }
            }
            NodeHead::AccessExpr { left, name } => {
                // Method call: lowered to runtime dispatch on the
                // receiver's type through a method-group id.
                self.analyze_expr(left)?;
                let group = self.table.ensure_method_group(name, num_args);
                let sig = self.table.ensure_untyped_func_sig(num_args as usize + 1);
                self.out.res[call.index()] = NodeRes::MethodCall { group, sig };
                self.out.types[callee.index()] = TypeId::DYNAMIC;
                Ok(TypeId::DYNAMIC)
            }
            _ => {
                // Calling an arbitrary expression's value.
                self.analyze_expr(callee)?;
                Ok(TypeId::DYNAMIC)
            }
        }
    }

    fn analyze_object_init(
        &mut self,
        expr: NodeId,
        name: NameId,
        first_entry: NodeId,
    ) -> SableResult<TypeId> {
        let Some(sym) = self.table.lookup(SymbolId::ROOT, name) else {
            return Err(self.err(
                CompileErrorKind::UnknownSymbol,
                format!("unknown type `{}`", self.name_str(name)),
                expr,
            ));
        };
        let SymbolKind::Object { type_id, .. } = self.table.sym(sym).kind else {
            return Err(self.err(
                CompileErrorKind::UnknownSymbol,
                format!("`{}` is not an object type", self.name_str(name)),
                expr,
            ));
        };

        let entries: Vec<NodeId> = self.ast.siblings(first_entry).collect();
        for entry in entries {
            let NodeHead::MapEntry { key, value } = *self.ast.head(entry) else {
                continue;
            };
            let NodeHead::Ident(field_name) = *self.ast.head(key) else {
                return Err(self.err(
                    CompileErrorKind::UnsupportedNode,
                    "object initializer keys must be field names",
                    key,
                ));
            };
            let field = self.table.ensure_field_sym(field_name);
            if self.table.object_field_offset(type_id, field).is_none() {
                return Err(self.err(
                    CompileErrorKind::UnknownSymbol,
                    format!(
                        "`{}` has no field `{}`",
                        self.name_str(name),
                        self.name_str(field_name)
                    ),
                    key,
                ));
            }
            self.out.res[key.index()] = NodeRes::Field(field);
            self.analyze_expr(value)?;
        }
        self.out.res[expr.index()] = NodeRes::Sym(CompactSymbolId::from_sym(sym));
        Ok(type_id)
    }

    // =========================================================================
    // Operator typing
    // =========================================================================

    fn type_binary(&self, op: BinaryOp, lt: TypeId, rt: TypeId) -> (TypeId, OpStrategy) {
        if op.is_arith() {
            return if lt == TypeId::INTEGER && rt == TypeId::INTEGER {
                (TypeId::INTEGER, OpStrategy::Specialized)
            } else if lt == TypeId::FLOAT && rt == TypeId::FLOAT {
                (TypeId::FLOAT, OpStrategy::Specialized)
            } else if (lt == TypeId::FLOAT && rt == TypeId::INTEGER)
                || (lt == TypeId::INTEGER && rt == TypeId::FLOAT)
            {
                (TypeId::FLOAT, OpStrategy::Generic)
            } else {
                (TypeId::DYNAMIC, OpStrategy::Generic)
            };
        }
        if op.is_bitwise() {
            return if lt == TypeId::INTEGER && rt == TypeId::INTEGER {
                (TypeId::INTEGER, OpStrategy::Specialized)
            } else {
                (TypeId::DYNAMIC, OpStrategy::Generic)
            };
        }
        if op.is_compare() {
            let strategy = if (lt == TypeId::INTEGER || lt == TypeId::FLOAT) && lt == rt {
                OpStrategy::Specialized
            } else {
                OpStrategy::Generic
            };
            return (TypeId::BOOLEAN, strategy);
        }
        // Logical and/or: the common type of both sides, else `any`.
        debug_assert!(op.is_logic());
        let result = if lt == rt { lt } else { TypeId::ANY };
        (result, OpStrategy::None)
    }

    // =========================================================================
    // Variable lookup
    // =========================================================================

    fn lookup_in_block(&self, name: NameId) -> Option<u16> {
        self.out.blocks[self.cur_block.0 as usize].lookup(name)
    }

    fn check_static_init_local(&self, node: NodeId, idx: u16) -> SableResult<()> {
        if self.static_init_sym.is_none() {
            return Ok(());
        }
        let var = self.out.blocks[self.cur_block.0 as usize].var(idx);
        if var.kind != LocalVarKind::StaticAlias {
            return Err(self.err(
                CompileErrorKind::LocalReferencedFromStaticInit,
                format!(
                    "cannot reference local `{}` from a static initializer",
                    self.name_str(var.name)
                ),
                node,
            ));
        }
        Ok(())
    }

    /// Variable lookup with synthesis, in order: current block, the
    /// method receiver's fields, a capture from the parent block, then a
    /// static-symbol alias.
    fn get_or_lookup_var(
        &mut self,
        name: NameId,
        allow_static: bool,
        node: NodeId,
    ) -> SableResult<VarLookup> {
        // 1. Current block.
        if let Some(idx) = self.lookup_in_block(name) {
            self.check_static_init_local(node, idx)?;
            return Ok(VarLookup::Local(idx));
        }

        // 2. Method receiver field.
        let (is_method, recv_type) = {
            let cur = &self.out.blocks[self.cur_block.0 as usize];
            (cur.is_method, cur.recv_type)
        };
        if is_method {
            let has_field = self.table.object_fields(recv_type).is_some_and(|fields| {
                fields
                    .iter()
                    .any(|&f| self.table.field_sym_name(f) == name)
            });
            if has_field {
                return Ok(VarLookup::Local(self.add_synth_var(
                    name,
                    LocalVarKind::ObjectMemberAlias,
                    TypeId::DYNAMIC,
                    CompactSymbolId::NULL,
                    0,
                )));
            }
        }

        // 3. One block up: synthesize a capture. Intermediate blocks
        // thread the capture through their own alias vars, so a deeply
        // nested lambda still reaches the defining frame.
        if let Some(parent_id) = self.out.blocks[self.cur_block.0 as usize].parent {
            if let Some(parent_idx) = self.lookup_capturable(parent_id, name) {
                if self.out.blocks[self.cur_block.0 as usize].is_static_func {
                    return Err(self.err(
                        CompileErrorKind::CaptureInStaticFunc,
                        format!(
                            "static function cannot capture local `{}`",
                            self.name_str(name)
                        ),
                        node,
                    ));
                }
                if self.static_init_sym.is_some() {
                    return Err(self.err(
                        CompileErrorKind::LocalReferencedFromStaticInit,
                        format!(
                            "cannot reference local `{}` from a static initializer",
                            self.name_str(name)
                        ),
                        node,
                    ));
                }
                let idx = self.synth_capture(self.cur_block, parent_id, parent_idx, name);
                return Ok(VarLookup::Local(idx));
            }
        }

        // 4. Static symbol alias.
        if allow_static {
            match self.table.resolve_distinct(SymbolId::ROOT, name) {
                Ok(Some(sym)) => {
                    let compact = match self.table.sym(sym).kind {
                        SymbolKind::Function { func_sym } => {
                            CompactSymbolId::from_func_sym(func_sym)
                        }
                        _ => CompactSymbolId::from_sym(sym),
                    };
                    let idx = self.add_synth_var(
                        name,
                        LocalVarKind::StaticAlias,
                        TypeId::ANY,
                        compact,
                        0,
                    );
                    return Ok(VarLookup::Local(idx));
                }
                Ok(None) => {}
                Err(count) => {
                    return Err(self.err(
                        CompileErrorKind::AmbiguousOverload,
                        format!(
                            "multiple overloads named `{}` ({count} candidates)",
                            self.name_str(name)
                        ),
                        node,
                    ));
                }
            }
        }
        Ok(VarLookup::NotFound)
    }

    /// Find a capturable var named `name` in `block_id`, synthesizing
    /// alias vars down the ancestor chain as needed. Static-function
    /// blocks never thread a capture.
    fn lookup_capturable(&mut self, block_id: BlockId, name: NameId) -> Option<u16> {
        if let Some(idx) = self.out.blocks[block_id.0 as usize].lookup(name) {
            let kind = self.out.blocks[block_id.0 as usize].var(idx).kind;
            return matches!(
                kind,
                LocalVarKind::Local | LocalVarKind::Param | LocalVarKind::ParentLocalAlias
            )
            .then_some(idx);
        }
        let parent_id = self.out.blocks[block_id.0 as usize].parent?;
        if self.out.blocks[block_id.0 as usize].is_static_func {
            return None;
        }
        let parent_idx = self.lookup_capturable(parent_id, name)?;
        Some(self.synth_capture(block_id, parent_id, parent_idx, name))
    }

    /// Record a capture of `parent_idx` (a var of `parent_id`) into
    /// `block_id`: the origin var is forced into a box, and an alias var
    /// lands in the capturing block.
    fn synth_capture(
        &mut self,
        block_id: BlockId,
        parent_id: BlockId,
        parent_idx: u16,
        name: NameId,
    ) -> u16 {
        let (parent_kind, declared) = {
            let var = self.out.blocks[parent_id.0 as usize].var(parent_idx);
            (var.kind, var.declared_type)
        };
        // An alias already holds a box; only the defining frame's var
        // needs the upgrade.
        if matches!(parent_kind, LocalVarKind::Local | LocalVarKind::Param) {
            self.out.blocks[parent_id.0 as usize]
                .var_mut(parent_idx)
                .flags |= LocalVarFlags::BOXED | LocalVarFlags::RC_CANDIDATE;
        }

        let block = &mut self.out.blocks[block_id.0 as usize];
        let capture_idx = block.captures.len() as u8;
        block.captures.push(parent_idx);
        self.out.stats.captures_created += 1;

        let var = LocalVar {
            name,
            kind: LocalVarKind::ParentLocalAlias,
            declared_type: declared,
            current_type: declared,
            flags: LocalVarFlags::RC_CANDIDATE,
            capture_idx,
            static_sym: CompactSymbolId::NULL,
            register_slot: 0,
        };
        let (idx, _) = self.out.blocks[block_id.0 as usize].add_var(var);
        idx
    }

    fn add_synth_var(
        &mut self,
        name: NameId,
        kind: LocalVarKind,
        declared: TypeId,
        static_sym: CompactSymbolId,
        capture_idx: u8,
    ) -> u16 {
        let mut flags = LocalVarFlags::empty();
        if declared == TypeId::DYNAMIC {
            flags |= LocalVarFlags::DYNAMIC;
        }
        let var = LocalVar {
            name,
            kind,
            declared_type: declared,
            current_type: declared,
            flags,
            capture_idx,
            static_sym,
            register_slot: 0,
        };
        let block = &mut self.out.blocks[self.cur_block.0 as usize];
        let (idx, prev) = block.add_var(var);
        if let Some(sub) = self.sub_blocks.last_mut() {
            sub.shadowed.push((name, prev));
        }
        idx
    }

    fn declare_local(&mut self, name: NameId, declared: TypeId, init_type: TypeId) -> u16 {
        let mut flags = LocalVarFlags::empty();
        if declared == TypeId::DYNAMIC {
            flags |= LocalVarFlags::DYNAMIC;
        }
        let effective = if declared == TypeId::DYNAMIC {
            init_type
        } else {
            declared
        };
        if TypeLattice::is_rc_candidate(effective) || declared == TypeId::DYNAMIC {
            // Dynamic vars may hold heap values later even when the
            // initializer is a primitive.
            flags |= LocalVarFlags::RC_CANDIDATE | LocalVarFlags::GEN_INITIALIZER;
        }
        let var = LocalVar {
            name,
            kind: LocalVarKind::Local,
            declared_type: declared,
            current_type: effective,
            flags,
            capture_idx: 0,
            static_sym: CompactSymbolId::NULL,
            register_slot: 0,
        };
        let block = &mut self.out.blocks[self.cur_block.0 as usize];
        let (idx, prev) = block.add_var(var);
        if let Some(sub) = self.sub_blocks.last_mut() {
            sub.shadowed.push((name, prev));
        }
        idx
    }

    // =========================================================================
    // Sub-blocks & narrowing
    // =========================================================================

    fn push_sub_block(&mut self, is_loop: bool) {
        let block = &self.out.blocks[self.cur_block.0 as usize];
        let mut sub = SubBlock::new(block.vars.len() as u16, is_loop);
        if is_loop {
            // Widen dynamic vars to `any` for the loop body; restored on
            // exit if the body never assigns them.
            let num_vars = block.vars.len();
            for idx in 0..num_vars {
                let var = self.out.blocks[self.cur_block.0 as usize].var(idx as u16);
                if var.flags.contains(LocalVarFlags::DYNAMIC)
                    && matches!(var.kind, LocalVarKind::Local | LocalVarKind::Param)
                    && var.current_type != TypeId::ANY
                {
                    sub.loop_saves.push((idx as u16, var.current_type));
                    self.out.blocks[self.cur_block.0 as usize]
                        .var_mut(idx as u16)
                        .current_type = TypeId::ANY;
                }
            }
        }
        self.sub_blocks.push(sub);
    }

    fn pop_sub_block(&mut self) {
        let sub = self.sub_blocks.pop().expect("sub-block underflow");

        // Merge dynamic-var types back into the parent scope: a type that
        // changed inside a conditional scope is unreliable afterwards.
        for &(idx, entry_type) in &sub.changed_types {
            if idx < sub.declared_start {
                let var = self.out.blocks[self.cur_block.0 as usize].var_mut(idx);
                if var.current_type != entry_type {
                    var.current_type = TypeId::ANY;
                }
            }
        }

        // Loop restores win over merges for unassigned vars.
        for &(idx, saved) in &sub.loop_saves {
            if !sub.assigned.contains(&idx) {
                self.out.blocks[self.cur_block.0 as usize]
                    .var_mut(idx)
                    .current_type = saved;
            }
        }

        // Unbind names declared here and restore shadowed bindings.
        let block = &mut self.out.blocks[self.cur_block.0 as usize];
        for &(name, prev) in sub.shadowed.iter().rev() {
            match prev {
                Some(idx) => {
                    block.name_to_var.insert(name, idx);
                }
                None => {
                    block.name_to_var.remove(&name);
                }
            }
        }
    }

    fn analyze_sub_block(&mut self, first_stmt: NodeId, is_loop: bool) -> SableResult<()> {
        self.push_sub_block(is_loop);
        let stmts: Vec<NodeId> = self.ast.siblings(first_stmt).collect();
        for stmt in stmts {
            self.analyze_stmt(stmt)?;
        }
        self.pop_sub_block();
        Ok(())
    }

    fn narrow_var(&mut self, idx: u16, new_type: TypeId) {
        let block = &mut self.out.blocks[self.cur_block.0 as usize];
        let var = block.var_mut(idx);
        if !var.flags.contains(LocalVarFlags::DYNAMIC) {
            return;
        }
        let entry_type = var.current_type;
        var.current_type = new_type;
        if let Some(sub) = self.sub_blocks.last_mut() {
            sub.note_assign(idx, entry_type);
        }
    }

    // =========================================================================
    // Static-initializer dependencies
    // =========================================================================

    fn record_init_dep(&mut self, used: SymbolId) {
        let Some(inited) = self.static_init_sym else {
            return;
        };
        if inited == used {
            return;
        }
        if !matches!(self.table.sym(used).kind, SymbolKind::Variable { .. }) {
            return;
        }
        if !self.dep_seen.insert((inited, used)) {
            return;
        }
        self.out.init_deps.entry(inited).or_default().push(used);
        self.out.stats.dep_edges += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoHost;
    use sable_core::{Ast, Span};

    fn local_var(name: NameId, current: TypeId) -> LocalVar {
        LocalVar {
            name,
            kind: LocalVarKind::Local,
            declared_type: TypeId::DYNAMIC,
            current_type: current,
            flags: LocalVarFlags::DYNAMIC,
            capture_idx: 0,
            static_sym: CompactSymbolId::NULL,
            register_slot: 0,
        }
    }

    #[test]
    fn test_static_func_block_cannot_capture() {
        let mut table = SymbolTable::new();
        let mut lattice = TypeLattice::new();
        let mut host = NoHost;
        let mut ast = Ast::new();
        let node = ast.push(NodeHead::TrueLit, Span::dummy());
        let name = table.intern_name("x");

        let mut sema = SemanticAnalyzer::new(&mut table, &mut lattice, &mut host, ChunkId(0), &ast);
        sema.out.blocks.push(Block::new(None, NodeId::NULL, true));
        sema.out.blocks[0].add_var(local_var(name, TypeId::ANY));
        sema.out
            .blocks
            .push(Block::new(Some(BlockId::MAIN), NodeId::NULL, true));
        sema.cur_block = BlockId(1);

        let err = sema.get_or_lookup_var(name, true, node).unwrap_err();
        match err {
            SableError::Compile { kind, .. } => {
                assert_eq!(kind, CompileErrorKind::CaptureInStaticFunc);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_static_init_cannot_reference_local() {
        let mut table = SymbolTable::new();
        let mut lattice = TypeLattice::new();
        let mut host = NoHost;
        let mut ast = Ast::new();
        let node = ast.push(NodeHead::TrueLit, Span::dummy());
        let name = table.intern_name("x");
        let var_name = table.intern_name("a");
        let sym = table
            .declare(
                SymbolId::ROOT,
                var_name,
                SymbolKind::Variable {
                    type_id: TypeId::ANY,
                    decl_chunk: ChunkId(0),
                    decl_node: NodeId::NULL,
                },
            )
            .unwrap();

        let mut sema = SemanticAnalyzer::new(&mut table, &mut lattice, &mut host, ChunkId(0), &ast);
        sema.out.blocks.push(Block::new(None, NodeId::NULL, true));
        sema.out.blocks[0].add_var(local_var(name, TypeId::ANY));
        sema.static_init_sym = Some(sym);

        let err = sema.get_or_lookup_var(name, true, node).unwrap_err();
        match err {
            SableError::Compile { kind, .. } => {
                assert_eq!(kind, CompileErrorKind::LocalReferencedFromStaticInit);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_loop_widens_and_restores_unassigned_dynamic_vars() {
        let mut table = SymbolTable::new();
        let mut lattice = TypeLattice::new();
        let mut host = NoHost;
        let ast = Ast::new();
        let name = table.intern_name("x");

        let mut sema = SemanticAnalyzer::new(&mut table, &mut lattice, &mut host, ChunkId(0), &ast);
        sema.out.blocks.push(Block::new(None, NodeId::NULL, true));
        let (idx, _) = sema.out.blocks[0].add_var(local_var(name, TypeId::INTEGER));
        sema.sub_blocks.push(SubBlock::new(0, false));

        sema.push_sub_block(true);
        assert_eq!(sema.out.blocks[0].var(idx).current_type, TypeId::ANY);
        sema.pop_sub_block();
        // Unassigned in the loop: the saved type comes back.
        assert_eq!(sema.out.blocks[0].var(idx).current_type, TypeId::INTEGER);
    }

    #[test]
    fn test_conditional_assignment_merges_to_any() {
        let mut table = SymbolTable::new();
        let mut lattice = TypeLattice::new();
        let mut host = NoHost;
        let ast = Ast::new();
        let name = table.intern_name("x");

        let mut sema = SemanticAnalyzer::new(&mut table, &mut lattice, &mut host, ChunkId(0), &ast);
        sema.out.blocks.push(Block::new(None, NodeId::NULL, true));
        let (idx, _) = sema.out.blocks[0].add_var(local_var(name, TypeId::INTEGER));
        sema.sub_blocks.push(SubBlock::new(0, false));

        sema.push_sub_block(false);
        sema.narrow_var(idx, TypeId::LIST);
        assert_eq!(sema.out.blocks[0].var(idx).current_type, TypeId::LIST);
        sema.pop_sub_block();
        // The branch may not run: neither type is reliable afterwards.
        assert_eq!(sema.out.blocks[0].var(idx).current_type, TypeId::ANY);
    }
}
