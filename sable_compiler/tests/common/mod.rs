//! Shared helpers for compiler integration tests: a hand-rolled AST
//! builder standing in for the parser, and a host environment providing
//! every requested host function.

use sable_compiler::{
    compile_chunk, ChunkSema, CompiledChunk, HostEnv, HostFuncKind, HostFuncResult,
    HostTypeResult, ModuleId, OpCode, SymbolTable,
};
use sable_core::{
    Ast, BinaryOp, IntRadix, NameId, NodeHead, NodeId, SableResult, Span, TypeLattice, Value,
};

/// Host that resolves every function request with a fresh token.
#[derive(Default)]
pub struct TestHost {
    next_id: u32,
}

impl HostEnv for TestHost {
    fn load_type(&mut self, _module: ModuleId, _name: &str) -> Option<HostTypeResult> {
        Some(HostTypeResult { type_id: None })
    }

    fn load_func(
        &mut self,
        _module: ModuleId,
        _name: &str,
        _num_params: u8,
    ) -> Option<HostFuncResult> {
        let host_id = self.next_id;
        self.next_id += 1;
        Some(HostFuncResult {
            host_id,
            kind: HostFuncKind::Standard,
        })
    }

    fn load_var(&mut self, _module: ModuleId, _name: &str) -> Option<Value> {
        Some(Value::NONE)
    }
}

/// AST construction helper; every node gets a dummy span.
pub struct Builder {
    pub ast: Ast,
    pub table: SymbolTable,
    pub lattice: TypeLattice,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            ast: Ast::new(),
            table: SymbolTable::new(),
            lattice: TypeLattice::new(),
        }
    }

    pub fn name(&self, s: &str) -> NameId {
        self.table.intern_name(s)
    }

    pub fn node(&mut self, head: NodeHead) -> NodeId {
        self.ast.push(head, Span::dummy())
    }

    pub fn ident(&mut self, s: &str) -> NodeId {
        let name = self.name(s);
        self.node(NodeHead::Ident(name))
    }

    pub fn int(&mut self, v: u64) -> NodeId {
        self.node(NodeHead::IntLit {
            value: v,
            radix: IntRadix::Dec,
        })
    }

    pub fn bin(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.node(NodeHead::BinExpr { op, left, right })
    }

    /// `var name = init` (untyped).
    pub fn var_decl(&mut self, name: &str, init: NodeId) -> NodeId {
        let name = self.name(name);
        self.node(NodeHead::VarDecl {
            name,
            type_spec: NodeId::NULL,
            init,
        })
    }

    pub fn expr_stmt(&mut self, expr: NodeId) -> NodeId {
        self.node(NodeHead::ExprStmt { expr })
    }

    /// `callee(args…)` with an identifier callee.
    pub fn call(&mut self, callee: &str, args: &[NodeId]) -> NodeId {
        let callee = self.ident(callee);
        let first_arg = self.ast.chain(args);
        self.node(NodeHead::CallExpr {
            callee,
            first_arg,
            num_args: args.len() as u8,
        })
    }

    pub fn ret(&mut self, expr: NodeId) -> NodeId {
        self.node(NodeHead::Return { expr })
    }

    pub fn param(&mut self, name: &str) -> NodeId {
        let name = self.name(name);
        self.node(NodeHead::Param {
            name,
            type_spec: NodeId::NULL,
        })
    }

    /// `func name(params…):` with untyped params and return.
    pub fn func_decl(&mut self, name: &str, params: &[NodeId], body: &[NodeId]) -> NodeId {
        let name = self.name(name);
        let first_param = self.ast.chain(params);
        let first_stmt = self.ast.chain(body);
        self.node(NodeHead::FuncDecl {
            name,
            first_param,
            num_params: params.len() as u8,
            ret_spec: NodeId::NULL,
            first_stmt,
        })
    }

    /// `@host func name(params…)`, optionally with a declared return
    /// type.
    pub fn host_func(&mut self, name: &str, num_params: u8, ret: Option<&str>) -> NodeId {
        let params: Vec<NodeId> = (0..num_params)
            .map(|i| {
                let pname = format!("p{i}");
                self.param(&pname)
            })
            .collect();
        let first_param = self.ast.chain(&params);
        let ret_spec = match ret {
            Some(t) => {
                let tname = self.name(t);
                self.node(NodeHead::TypeSpec(tname))
            }
            None => NodeId::NULL,
        };
        let name = self.name(name);
        self.node(NodeHead::HostFuncDecl {
            name,
            first_param,
            num_params,
            ret_spec,
        })
    }

    /// Run analysis and emission over the given top-level statements.
    pub fn compile(mut self, stmts: &[NodeId]) -> SableResult<(ChunkSema, CompiledChunk)> {
        let root = self.ast.chain(stmts);
        let mut host = TestHost::default();
        compile_chunk(
            &mut self.table,
            &mut self.lattice,
            &mut host,
            &self.ast,
            root,
        )
    }
}

/// Decode the instruction stream into `(pc, opcode)` pairs.
pub fn decode_ops(chunk: &CompiledChunk) -> Vec<(usize, OpCode)> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    let ops = &chunk.buf.ops;
    while pc < ops.len() {
        let op = OpCode::from_u8(ops[pc]).expect("valid opcode");
        out.push((pc, op));
        pc += sable_compiler::inst_len(ops, pc);
    }
    out
}

/// All pcs at which `op` occurs.
pub fn find_op(chunk: &CompiledChunk, op: OpCode) -> Vec<usize> {
    decode_ops(chunk)
        .into_iter()
        .filter(|&(_, o)| o == op)
        .map(|(pc, _)| pc)
        .collect()
}
