//! The AST node model.
//!
//! The parser (an external collaborator) produces an immutable pool of
//! nodes. Each node has a typed head payload, a `next` link forming
//! sibling chains, and a source span. The compiler only ever reads
//! nodes; analysis results live in side tables indexed by [`NodeId`].
//!
//! Child lists (call arguments, block statements, list elements) are
//! sibling chains: the parent stores the first child's id and a count
//! where the emitter needs one up front.

use crate::intern::NameId;
use crate::span::Span;
use std::fmt;

/// Index of a node in its chunk's node pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel for "no node" (absent child, end of a sibling chain).
    pub const NULL: NodeId = NodeId(u32::MAX);

    /// Check whether this is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    /// Index into the node pool.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NodeId(NULL)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `^`
    Pow,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `||`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `and`
    And,
    /// `or`
    Or,
}

impl BinaryOp {
    /// Check for an arithmetic operator.
    #[inline]
    #[must_use]
    pub const fn is_arith(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod | Self::Pow
        )
    }

    /// Check for a bitwise or shift operator.
    #[inline]
    #[must_use]
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            Self::BitAnd | Self::BitOr | Self::BitXor | Self::Shl | Self::Shr
        )
    }

    /// Check for a comparison operator.
    #[inline]
    #[must_use]
    pub const fn is_compare(self) -> bool {
        matches!(
            self,
            Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne
        )
    }

    /// Check for a short-circuit logical operator.
    #[inline]
    #[must_use]
    pub const fn is_logic(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `not`
    Not,
}

/// Radix marker on integer literals.
///
/// Nonzero-base literals parse as unsigned 64-bit and coerce at emission;
/// `Char` carries the UTF-8 code point of a `0u'X'` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntRadix {
    /// Plain decimal.
    Dec,
    /// `0x…`
    Hex,
    /// `0o…`
    Oct,
    /// `0b…`
    Bin,
    /// `0u'X'`
    Char,
}

/// Typed head payload of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeHead {
    // -- atoms ---------------------------------------------------------------
    /// Identifier reference.
    Ident(NameId),
    /// Integer literal with its radix marker.
    IntLit {
        /// Unsigned payload as lexed.
        value: u64,
        /// Source radix.
        radix: IntRadix,
    },
    /// Float literal.
    FloatLit(f64),
    /// String literal (interned).
    StringLit(NameId),
    /// `true`
    TrueLit,
    /// `false`
    FalseLit,
    /// `none`
    NoneLit,
    /// `#name` symbol literal.
    SymbolLit(NameId),
    /// String template. Parts alternate string literals and expressions,
    /// starting and ending with a literal (possibly empty).
    StringTemplate {
        /// First part in the sibling chain.
        first_part: NodeId,
        /// Number of interpolated expressions.
        num_exprs: u8,
    },

    // -- expressions ---------------------------------------------------------
    /// Binary expression.
    BinExpr {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: NodeId,
        /// Right operand.
        right: NodeId,
    },
    /// Unary expression.
    UnaryExpr {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        child: NodeId,
    },
    /// Call expression. The callee may be an identifier (symbol call) or
    /// an access expression (method call).
    CallExpr {
        /// Callee expression.
        callee: NodeId,
        /// First argument in the sibling chain.
        first_arg: NodeId,
        /// Number of arguments.
        num_args: u8,
    },
    /// Named call argument. Not supported; reported at analysis.
    NamedArg {
        /// Argument name.
        name: NameId,
        /// Argument value.
        value: NodeId,
    },
    /// Field access `left.name`.
    AccessExpr {
        /// Receiver expression.
        left: NodeId,
        /// Field name.
        name: NameId,
    },
    /// Index `left[index]`.
    IndexExpr {
        /// Receiver.
        left: NodeId,
        /// Index expression.
        index: NodeId,
    },
    /// Backwards index `left[-index]` counted from the end.
    ReverseIndexExpr {
        /// Receiver.
        left: NodeId,
        /// Index expression.
        index: NodeId,
    },
    /// Slice `left[start..end]`; either bound may be `NULL` for open.
    SliceExpr {
        /// Receiver.
        left: NodeId,
        /// Start bound or `NULL`.
        start: NodeId,
        /// End bound or `NULL`.
        end: NodeId,
    },
    /// List literal.
    ListLit {
        /// First element.
        first_elem: NodeId,
        /// Element count.
        num_elems: u8,
    },
    /// Map literal.
    MapLit {
        /// First entry (`MapEntry` chain).
        first_entry: NodeId,
        /// Entry count.
        num_entries: u8,
    },
    /// One `key: value` entry of a map literal or object initializer.
    MapEntry {
        /// Key node (ident, string, or int literal).
        key: NodeId,
        /// Value expression.
        value: NodeId,
    },
    /// Object initializer `Name{field: expr, …}`.
    ObjectInit {
        /// Object type name.
        name: NameId,
        /// First entry (`MapEntry` chain with ident keys).
        first_entry: NodeId,
        /// Entry count.
        num_entries: u8,
    },
    /// Lambda. The body is a single expression, or a statement chain when
    /// `body_is_stmts` is set.
    Lambda {
        /// First parameter (`Param` chain).
        first_param: NodeId,
        /// Parameter count.
        num_params: u8,
        /// Body expression or first body statement.
        body: NodeId,
        /// Whether `body` is a statement chain.
        body_is_stmts: bool,
    },
    /// `coinit f(args)` fiber creation.
    CoinitExpr {
        /// The wrapped call expression.
        call: NodeId,
    },
    /// `coresume fiber`.
    CoresumeExpr {
        /// Fiber expression.
        fiber: NodeId,
    },

    // -- statements ----------------------------------------------------------
    /// Expression statement.
    ExprStmt {
        /// The discarded expression.
        expr: NodeId,
    },
    /// `var name = init`, with an optional declared type. A chunk-level
    /// declaration defines a static variable; inside a block it declares
    /// a local.
    VarDecl {
        /// Variable name.
        name: NameId,
        /// Declared type (`TypeSpec`) or `NULL`.
        type_spec: NodeId,
        /// Initializer expression.
        init: NodeId,
    },
    /// Assignment `target = value`.
    Assign {
        /// Target (ident, access, or index expression).
        target: NodeId,
        /// Value expression.
        value: NodeId,
    },
    /// Compound assignment `target op= value`.
    OpAssign {
        /// The underlying binary operator.
        op: BinaryOp,
        /// Target (ident, access, or index expression).
        target: NodeId,
        /// Value expression.
        value: NodeId,
    },
    /// `if cond:` with an optional else-clause chain.
    If {
        /// Condition.
        cond: NodeId,
        /// First body statement.
        first_stmt: NodeId,
        /// First `ElseClause` or `NULL`.
        else_clause: NodeId,
    },
    /// One `else cond:` / `else:` clause.
    ElseClause {
        /// Condition, or `NULL` for a plain else.
        cond: NodeId,
        /// First body statement.
        first_stmt: NodeId,
        /// Next clause in the chain or `NULL`.
        next_clause: NodeId,
    },
    /// `while cond:` loop.
    WhileCond {
        /// Condition.
        cond: NodeId,
        /// First body statement.
        first_stmt: NodeId,
    },
    /// `while:` infinite loop.
    WhileInf {
        /// First body statement.
        first_stmt: NodeId,
    },
    /// `for start..end each i:` range loop.
    ForRange {
        /// Loop variable name.
        each: NameId,
        /// Start expression.
        start: NodeId,
        /// End expression.
        end: NodeId,
        /// Step expression or `NULL`.
        step: NodeId,
        /// First body statement.
        first_stmt: NodeId,
    },
    /// `for iterable each v:` / `for iterable each k, v:` loop.
    ForIter {
        /// Iterable expression.
        iterable: NodeId,
        /// Loop variable name.
        each: NameId,
        /// Second loop variable for pair iteration, or `NULL`.
        each_val: NameId,
        /// First body statement.
        first_stmt: NodeId,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `return` with optional expression. A second sibling expression
    /// marks a multi-return, which is not supported.
    Return {
        /// Returned expression or `NULL`.
        expr: NodeId,
    },
    /// `match expr:` with case chain.
    Match {
        /// Scrutinee.
        expr: NodeId,
        /// First `MatchCase`.
        first_case: NodeId,
    },
    /// One match case: a chain of condition expressions, or the else case.
    MatchCase {
        /// First condition in the sibling chain; `NULL` for else.
        first_cond: NodeId,
        /// First body statement.
        first_stmt: NodeId,
        /// Whether this is the else case.
        is_else: bool,
    },
    /// `try:` / `catch err:` statement.
    TryStmt {
        /// First statement of the try body.
        first_stmt: NodeId,
        /// Name binding the caught error, or `NULL`.
        catch_name: NameId,
        /// First statement of the catch body.
        first_catch_stmt: NodeId,
    },
    /// `throw expr`.
    Throw {
        /// Thrown expression.
        expr: NodeId,
    },
    /// `coyield`.
    Coyield,
    /// `func name(params) ret:` declaration.
    FuncDecl {
        /// Function name.
        name: NameId,
        /// First parameter (`Param` chain).
        first_param: NodeId,
        /// Parameter count.
        num_params: u8,
        /// Return type (`TypeSpec`) or `NULL`.
        ret_spec: NodeId,
        /// First body statement.
        first_stmt: NodeId,
    },
    /// One function parameter.
    Param {
        /// Parameter name.
        name: NameId,
        /// Declared type (`TypeSpec`) or `NULL`.
        type_spec: NodeId,
    },
    /// Generic type parameter list marker. Not supported; reported at
    /// analysis when present in a declaration's param chain.
    GenericParams,
    /// A named type annotation.
    TypeSpec(NameId),
    /// `object Name:` declaration with fields and methods.
    ObjectDecl {
        /// Type name.
        name: NameId,
        /// First field (`ObjectFieldDecl` chain).
        first_field: NodeId,
        /// Field count.
        num_fields: u8,
        /// First method (`FuncDecl` chain).
        first_func: NodeId,
    },
    /// One object field declaration.
    ObjectFieldDecl {
        /// Field name.
        name: NameId,
        /// Declared type (`TypeSpec`) or `NULL`.
        type_spec: NodeId,
    },
    /// `enum Name:` declaration.
    EnumDecl {
        /// Enum type name.
        name: NameId,
        /// First member (`EnumMemberDecl` chain).
        first_member: NodeId,
    },
    /// One enum member.
    EnumMemberDecl {
        /// Member name.
        name: NameId,
    },
    /// `use mod` import of a host-provided module into call resolution.
    UseDecl {
        /// Module name.
        name: NameId,
    },
    /// `@host func name(params) ret` declaration resolved by the host
    /// func-loader callback.
    HostFuncDecl {
        /// Function name.
        name: NameId,
        /// First parameter (`Param` chain).
        first_param: NodeId,
        /// Parameter count.
        num_params: u8,
        /// Return type (`TypeSpec`) or `NULL`.
        ret_spec: NodeId,
    },
    /// `@host type Name` declaration resolved by the host type-loader.
    HostTypeDecl {
        /// Type name.
        name: NameId,
    },
    /// `@host var name Type` declaration resolved by the host var-loader.
    HostVarDecl {
        /// Variable name.
        name: NameId,
        /// Declared type (`TypeSpec`) or `NULL`.
        type_spec: NodeId,
    },
}

/// A single AST node: typed head, sibling link, source span.
#[derive(Debug, Clone, Copy)]
pub struct Node {
    /// Typed payload.
    pub head: NodeHead,
    /// Next sibling or `NULL`.
    pub next: NodeId,
    /// Source span.
    pub span: Span,
}

/// An immutable pool of nodes for one chunk.
///
/// The pool is append-only while the parser builds it; the compiler
/// treats it as read-only.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Append a node, returning its id.
    pub fn push(&mut self, head: NodeHead, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            head,
            next: NodeId::NULL,
            span,
        });
        id
    }

    /// Link `id`'s next sibling.
    pub fn set_next(&mut self, id: NodeId, next: NodeId) {
        self.nodes[id.index()].next = next;
    }

    /// Get a node.
    #[inline]
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Get a node's head payload.
    #[inline]
    #[must_use]
    pub fn head(&self, id: NodeId) -> &NodeHead {
        &self.nodes[id.index()].head
    }

    /// Get a node's next sibling.
    #[inline]
    #[must_use]
    pub fn next(&self, id: NodeId) -> NodeId {
        self.nodes[id.index()].next
    }

    /// Get a node's span.
    #[inline]
    #[must_use]
    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    /// Number of nodes in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate a sibling chain starting at `first`.
    #[must_use]
    pub fn siblings(&self, first: NodeId) -> SiblingIter<'_> {
        SiblingIter { ast: self, cur: first }
    }

    /// Link a slice of node ids into a sibling chain, returning the head.
    pub fn chain(&mut self, ids: &[NodeId]) -> NodeId {
        for pair in ids.windows(2) {
            self.set_next(pair[0], pair[1]);
        }
        ids.first().copied().unwrap_or(NodeId::NULL)
    }
}

/// Iterator over a sibling chain.
pub struct SiblingIter<'a> {
    ast: &'a Ast,
    cur: NodeId,
}

impl Iterator for SiblingIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.cur.is_null() {
            return None;
        }
        let id = self.cur;
        self.cur = self.ast.next(id);
        Some(id)
    }
}
