//! Per-function block state: local variables, parameters, captures.
//!
//! One [`Block`] exists per function, lambda, or chunk top level. The
//! analyzer creates its local variables (kinds, types, capture and
//! boxing decisions); the emitter later assigns register slots in the
//! same order. Lexical scopes inside a block are tracked by
//! [`SubBlock`]s, which record watermarks so shadowing and dynamic-type
//! narrowing can be undone on scope exit.

use crate::sym::CompactSymbolId;
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use sable_core::{NameId, NodeId, TypeId};
use smallvec::SmallVec;

/// Index of a block within one chunk's analysis output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The chunk's top-level block.
    pub const MAIN: BlockId = BlockId(0);
}

bitflags! {
    /// Flags on a local variable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LocalVarFlags: u8 {
        /// Promoted to a heap box because a child block captures it.
        const BOXED = 1 << 0;
        /// Declared without a type; its current type narrows per scope.
        const DYNAMIC = 1 << 1;
        /// May hold a refcounted value at some point in its lifetime.
        const RC_CANDIDATE = 1 << 2;
        /// Must be zero-initialized on frame entry so unwinders can
        /// release it unconditionally.
        const GEN_INITIALIZER = 1 << 3;
        /// The emitter has assigned its register slot.
        const SLOT_ASSIGNED = 1 << 4;
    }
}

/// How a name in a block resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalVarKind {
    /// A plain local declared in this block.
    Local,
    /// A parameter.
    Param,
    /// An alias of a static symbol, synthesized at first use.
    StaticAlias,
    /// A captured local of the parent block, shared through a box.
    ParentLocalAlias,
    /// A field of the method receiver, synthesized at first use.
    ObjectMemberAlias,
    /// A receiver field reached through a captured `self`.
    ParentObjectMemberAlias,
}

/// One local variable (or synthesized alias) of a block.
#[derive(Debug, Clone, Copy)]
pub struct LocalVar {
    /// Variable name.
    pub name: NameId,
    /// Resolution kind.
    pub kind: LocalVarKind,
    /// Declared type (`dynamic` when untyped).
    pub declared_type: TypeId,
    /// Narrowed type in the current scope; static vars never mutate it.
    pub current_type: TypeId,
    /// Flag set.
    pub flags: LocalVarFlags,
    /// For `ParentLocalAlias`: index into the block's capture list.
    pub capture_idx: u8,
    /// For `StaticAlias`: the aliased symbol.
    pub static_sym: CompactSymbolId,
    /// Register slot, assigned during emission.
    pub register_slot: u8,
}

impl LocalVar {
    /// Check whether assignments to this var need retain/release traffic.
    #[inline]
    #[must_use]
    pub fn is_rc_candidate(&self) -> bool {
        self.flags.contains(LocalVarFlags::RC_CANDIDATE)
    }

    /// Check whether reads go through a box.
    #[inline]
    #[must_use]
    pub fn is_boxed(&self) -> bool {
        self.flags.contains(LocalVarFlags::BOXED)
    }
}

/// The emission scope of a single function, lambda, or the top level.
#[derive(Debug)]
pub struct Block {
    /// Enclosing block, if any.
    pub parent: Option<BlockId>,
    /// The declaring `FuncDecl`/`Lambda` node, or `NULL` for the top
    /// level.
    pub func_node: NodeId,
    /// Name to variable index.
    pub name_to_var: FxHashMap<NameId, u16>,
    /// All variables, in creation order.
    pub vars: Vec<LocalVar>,
    /// Parameter variable indices, in order.
    pub params: SmallVec<[u16; 4]>,
    /// Captured parent-variable indices, in order.
    pub captures: SmallVec<[u16; 2]>,
    /// Whether this is a named static function (captures are an error)
    /// rather than a lambda.
    pub is_static_func: bool,
    /// Whether the first parameter is an implicit `self`.
    pub is_method: bool,
    /// Receiver type for methods.
    pub recv_type: TypeId,
    /// Frame size requirement; filled by the emitter.
    pub max_locals: u8,
    /// Pc of the block-end release sequence; filled by the emitter.
    pub end_locals_pc: u32,
}

impl Block {
    /// Create a block.
    #[must_use]
    pub fn new(parent: Option<BlockId>, func_node: NodeId, is_static_func: bool) -> Self {
        Self {
            parent,
            func_node,
            name_to_var: FxHashMap::default(),
            vars: Vec::new(),
            params: SmallVec::new(),
            captures: SmallVec::new(),
            is_static_func,
            is_method: false,
            recv_type: TypeId::NONE,
            max_locals: 0,
            end_locals_pc: crate::bytecode::END_LOCALS_NONE,
        }
    }

    /// Add a variable, binding its name. Returns the previous binding for
    /// the name so a sub-block can record the shadow.
    pub fn add_var(&mut self, var: LocalVar) -> (u16, Option<u16>) {
        let idx = self.vars.len() as u16;
        let prev = self.name_to_var.insert(var.name, idx);
        self.vars.push(var);
        (idx, prev)
    }

    /// Look up a name in this block.
    #[must_use]
    pub fn lookup(&self, name: NameId) -> Option<u16> {
        self.name_to_var.get(&name).copied()
    }

    /// Get a variable.
    #[inline]
    #[must_use]
    pub fn var(&self, idx: u16) -> &LocalVar {
        &self.vars[idx as usize]
    }

    /// Mutable variable access.
    pub fn var_mut(&mut self, idx: u16) -> &mut LocalVar {
        &mut self.vars[idx as usize]
    }
}

/// A lexical scope inside a block (loop body, if-branch, match arm,
/// try/catch body).
#[derive(Debug, Default)]
pub struct SubBlock {
    /// Variable-count watermark at entry; vars above were declared here.
    pub declared_start: u16,
    /// Previous name bindings shadowed in this scope.
    pub shadowed: SmallVec<[(NameId, Option<u16>); 2]>,
    /// First-change entry types for dynamic vars assigned here, so the
    /// parent can merge on exit.
    pub changed_types: SmallVec<[(u16, TypeId); 4]>,
    /// Pre-loop type saves: dynamic vars widened to `any` at loop entry,
    /// restored on exit if the body never assigned them.
    pub loop_saves: SmallVec<[(u16, TypeId); 4]>,
    /// Vars assigned at least once in this scope.
    pub assigned: SmallVec<[u16; 4]>,
    /// Whether this scope is a loop body.
    pub is_loop: bool,
}

impl SubBlock {
    /// Create a sub-block scope.
    #[must_use]
    pub fn new(declared_start: u16, is_loop: bool) -> Self {
        Self {
            declared_start,
            is_loop,
            ..Default::default()
        }
    }

    /// Record an assignment, noting the entry type on first change.
    pub fn note_assign(&mut self, var_idx: u16, entry_type: TypeId) {
        if !self.assigned.contains(&var_idx) {
            self.assigned.push(var_idx);
            self.changed_types.push((var_idx, entry_type));
        }
    }
}
