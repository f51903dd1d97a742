//! The global symbol graph.
//!
//! Symbols are keyed by `(parent, name)`: one entry per pair, with the
//! root acting as a distinguished null parent. Function symbols fan out
//! into per-signature func-syms so a single name can carry several
//! overloads; an overloaded family stores the [`FuncSymId::MANY`]
//! sentinel in place of a single func-sym.
//!
//! Signatures, field names, and method groups are interned here as well:
//! two call sites with the same argument-type vector obtain the same
//! signature id, which is what makes overload resolution deterministic.

use rustc_hash::FxHashMap;
use sable_core::{NameId, NameInterner, NodeId, TypeId};
use std::fmt;
use std::sync::Arc;

/// Index of a compile unit (one source file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ChunkId(pub u32);

/// Index of a symbol in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// The distinguished null parent of root-level symbols.
    pub const ROOT: SymbolId = SymbolId(u32::MAX);
}

/// Index of a function symbol (one per `(symbol, signature)` pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FuncSymId(pub u32);

impl FuncSymId {
    /// Sentinel stored on a `Symbol` whose name is overloaded; callers
    /// must resolve through the signature-keyed map instead.
    pub const MANY: FuncSymId = FuncSymId(u32::MAX);
}

/// Index of an interned function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct FuncSigId(pub u32);

/// Index of a host-provided module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ModuleId(pub u32);

/// Index of a globally-reserved field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FieldSymId(pub u32);

/// Index of an interned `(name, num_params)` method group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MethodGroupId(pub u32);

/// A 31-bit symbol id plus one flag bit distinguishing func-syms from
/// plain symbols. The all-bits-set pattern is the null sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CompactSymbolId(u32);

const COMPACT_FUNC_BIT: u32 = 1 << 31;

impl CompactSymbolId {
    /// Null sentinel: all bits set.
    pub const NULL: CompactSymbolId = CompactSymbolId(u32::MAX);

    /// Wrap a plain symbol id.
    #[inline]
    #[must_use]
    pub const fn from_sym(id: SymbolId) -> Self {
        debug_assert!(id.0 < COMPACT_FUNC_BIT);
        CompactSymbolId(id.0)
    }

    /// Wrap a func-sym id.
    #[inline]
    #[must_use]
    pub const fn from_func_sym(id: FuncSymId) -> Self {
        debug_assert!(id.0 < COMPACT_FUNC_BIT - 1);
        CompactSymbolId(id.0 | COMPACT_FUNC_BIT)
    }

    /// Check for the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    /// Check whether this wraps a func-sym.
    #[inline]
    #[must_use]
    pub const fn is_func_sym(self) -> bool {
        !self.is_null() && self.0 & COMPACT_FUNC_BIT != 0
    }

    /// The wrapped 31-bit id.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0 & !COMPACT_FUNC_BIT
    }
}

impl fmt::Debug for CompactSymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "CompactSymbolId(NULL)")
        } else if self.is_func_sym() {
            write!(f, "CompactSymbolId(func#{})", self.id())
        } else {
            write!(f, "CompactSymbolId(sym#{})", self.id())
        }
    }
}

/// What a symbol is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolKind {
    /// A static variable.
    Variable {
        /// Declared or inferred type.
        type_id: TypeId,
        /// Declaring chunk.
        decl_chunk: ChunkId,
        /// Declaring node.
        decl_node: NodeId,
    },
    /// A function family. `func_sym` is [`FuncSymId::MANY`] once a second
    /// overload registers.
    Function {
        /// The sole func-sym, or the overloaded sentinel.
        func_sym: FuncSymId,
    },
    /// A user or host object type.
    Object {
        /// Runtime type id.
        type_id: TypeId,
        /// Owning module.
        module: ModuleId,
    },
    /// An enum type.
    EnumType {
        /// Runtime type id.
        type_id: TypeId,
        /// Number of members.
        num_members: u32,
    },
    /// One member of an enum.
    EnumMember {
        /// The owning enum's runtime type id.
        enum_type: TypeId,
        /// Member ordinal.
        member_idx: u32,
    },
    /// A host-provided module namespace.
    Module(ModuleId),
    /// A built-in type name.
    BuiltinType(TypeId),
    /// Compiler-internal symbol.
    Internal,
}

/// One entry in the symbol graph.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    /// Owning symbol, or [`SymbolId::ROOT`].
    pub parent: SymbolId,
    /// Interned name.
    pub name: NameId,
    /// Payload.
    pub kind: SymbolKind,
}

/// One function overload: a `(symbol, signature)` pair.
#[derive(Debug, Clone, Copy)]
pub struct FuncSym {
    /// The owning function symbol.
    pub sym: SymbolId,
    /// Interned signature.
    pub sig: FuncSigId,
    /// Declaring chunk.
    pub chunk: ChunkId,
    /// Declaring node ([`NodeId::NULL`] for host funcs).
    pub decl_node: NodeId,
    /// Return type.
    pub ret_type: TypeId,
    /// Whether a static initializer must run before first call.
    pub has_static_initializer: bool,
}

/// An interned function signature.
#[derive(Debug, Clone)]
pub struct FuncSig {
    /// Parameter types.
    pub params: Arc<[TypeId]>,
    /// Return type.
    pub ret: TypeId,
    /// True iff any parameter type is neither `any` nor `dynamic`, so
    /// calls through a dynamic callee must type-check at runtime.
    pub req_call_type_check: bool,
}

/// A method table entry, keyed by `(type_id, method_group)`.
#[derive(Debug, Clone, Copy)]
pub struct MethodEntry {
    /// Signature of the method.
    pub sig: FuncSigId,
    /// The backing func-sym.
    pub func_sym: FuncSymId,
}

/// Result of call resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResolution {
    /// An exact overload.
    Func(FuncSymId),
    /// The callee exists but dispatch must happen at runtime (a dynamic
    /// argument prevented an exact match).
    Dynamic(SymbolId),
    /// The name is completely unknown.
    None,
}

/// Why a call failed to resolve. Reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// More than one overload shares the name and none matched.
    Ambiguous {
        /// Number of overloads.
        num_overloads: u32,
    },
    /// Exactly one overload exists and it does not match.
    WrongSignature {
        /// The sole existing signature.
        sig: FuncSigId,
    },
}

/// The global symbol table.
///
/// Written during analysis; the emitter and runtime treat it as
/// read-only afterwards.
pub struct SymbolTable {
    /// Name interner shared by the whole compilation.
    pub names: NameInterner,

    syms: Vec<Symbol>,
    sym_map: FxHashMap<(SymbolId, NameId), SymbolId>,

    func_syms: Vec<FuncSym>,
    func_sym_map: FxHashMap<(SymbolId, FuncSigId), FuncSymId>,
    /// Overload count per function symbol, for diagnostics.
    overload_counts: FxHashMap<SymbolId, u32>,

    sigs: Vec<FuncSig>,
    sig_map: FxHashMap<(Arc<[TypeId]>, TypeId), FuncSigId>,
    /// Untyped signatures (`any` params, `any` ret) cached by arity.
    untyped_by_arity: Vec<FuncSigId>,

    field_syms: Vec<NameId>,
    field_map: FxHashMap<NameId, FieldSymId>,

    method_groups: Vec<(NameId, u8)>,
    method_group_map: FxHashMap<(NameId, u8), MethodGroupId>,
    methods: FxHashMap<(TypeId, MethodGroupId), MethodEntry>,

    modules: Vec<SymbolId>,

    /// Dense runtime slots for static variables, in declaration order.
    static_var_syms: Vec<SymbolId>,
    static_var_ids: FxHashMap<SymbolId, u16>,

    /// Field order per object type, for offset resolution.
    object_fields: FxHashMap<TypeId, Arc<[FieldSymId]>>,
}

impl SymbolTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            names: NameInterner::new(),
            syms: Vec::new(),
            sym_map: FxHashMap::default(),
            func_syms: Vec::new(),
            func_sym_map: FxHashMap::default(),
            overload_counts: FxHashMap::default(),
            sigs: Vec::new(),
            sig_map: FxHashMap::default(),
            untyped_by_arity: Vec::new(),
            field_syms: Vec::new(),
            field_map: FxHashMap::default(),
            method_groups: Vec::new(),
            method_group_map: FxHashMap::default(),
            methods: FxHashMap::default(),
            modules: Vec::new(),
            static_var_syms: Vec::new(),
            static_var_ids: FxHashMap::default(),
            object_fields: FxHashMap::default(),
        }
    }

    /// Intern a name.
    pub fn intern_name(&self, name: &str) -> NameId {
        self.names.intern(name)
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Register a symbol under `(parent, name)`. Returns `None` if the
    /// pair already exists with an incompatible kind.
    pub fn declare(&mut self, parent: SymbolId, name: NameId, kind: SymbolKind) -> Option<SymbolId> {
        if self.sym_map.contains_key(&(parent, name)) {
            return None;
        }
        let id = SymbolId(self.syms.len() as u32);
        self.syms.push(Symbol { parent, name, kind });
        self.sym_map.insert((parent, name), id);
        id.into()
    }

    /// Look up a symbol by `(parent, name)`.
    #[must_use]
    pub fn lookup(&self, parent: SymbolId, name: NameId) -> Option<SymbolId> {
        self.sym_map.get(&(parent, name)).copied()
    }

    /// Get a symbol.
    #[inline]
    #[must_use]
    pub fn sym(&self, id: SymbolId) -> &Symbol {
        &self.syms[id.0 as usize]
    }

    /// Mutable access to a symbol's kind.
    pub fn sym_kind_mut(&mut self, id: SymbolId) -> &mut SymbolKind {
        &mut self.syms[id.0 as usize].kind
    }

    /// Number of symbols.
    #[must_use]
    pub fn num_syms(&self) -> usize {
        self.syms.len()
    }

    /// Resolve a name for a value-context use (variable read, import).
    ///
    /// Fails with `Err(num_overloads)` if the name exists only as an
    /// overloaded function family: a value context needs one distinct
    /// entity, and the sentinel must never escape.
    pub fn resolve_distinct(
        &self,
        parent: SymbolId,
        name: NameId,
    ) -> Result<Option<SymbolId>, u32> {
        let Some(id) = self.lookup(parent, name) else {
            return Ok(None);
        };
        if let SymbolKind::Function { func_sym } = self.sym(id).kind {
            if func_sym == FuncSymId::MANY {
                let count = self.overload_counts.get(&id).copied().unwrap_or(2);
                return Err(count);
            }
        }
        Ok(Some(id))
    }

    // =========================================================================
    // Function symbols & signatures
    // =========================================================================

    /// Intern a signature.
    pub fn ensure_func_sig(&mut self, params: &[TypeId], ret: TypeId) -> FuncSigId {
        let key = (Arc::<[TypeId]>::from(params), ret);
        if let Some(&id) = self.sig_map.get(&key) {
            return id;
        }
        let req_call_type_check = params
            .iter()
            .any(|&t| t != TypeId::ANY && t != TypeId::DYNAMIC);
        let id = FuncSigId(self.sigs.len() as u32);
        self.sigs.push(FuncSig {
            params: key.0.clone(),
            ret,
            req_call_type_check,
        });
        self.sig_map.insert(key, id);
        id
    }

    /// Intern the all-`any` signature of a given arity, cached by arity
    /// for fast lookup.
    pub fn ensure_untyped_func_sig(&mut self, num_params: usize) -> FuncSigId {
        while self.untyped_by_arity.len() <= num_params {
            let arity = self.untyped_by_arity.len();
            let params = vec![TypeId::ANY; arity];
            let id = self.ensure_func_sig(&params, TypeId::ANY);
            self.untyped_by_arity.push(id);
        }
        self.untyped_by_arity[num_params]
    }

    /// Get a signature.
    #[inline]
    #[must_use]
    pub fn sig(&self, id: FuncSigId) -> &FuncSig {
        &self.sigs[id.0 as usize]
    }

    /// Render a signature for diagnostics.
    #[must_use]
    pub fn sig_display(&self, id: FuncSigId) -> String {
        let sig = self.sig(id);
        let params: Vec<String> = sig.params.iter().map(|t| t.to_string()).collect();
        format!("({}) {}", params.join(", "), sig.ret)
    }

    /// Register a function overload under `sym`. Returns `None` if the
    /// `(sym, sig)` pair already exists.
    pub fn declare_func(
        &mut self,
        sym: SymbolId,
        sig: FuncSigId,
        chunk: ChunkId,
        decl_node: NodeId,
        ret_type: TypeId,
    ) -> Option<FuncSymId> {
        if self.func_sym_map.contains_key(&(sym, sig)) {
            return None;
        }
        let id = FuncSymId(self.func_syms.len() as u32);
        self.func_syms.push(FuncSym {
            sym,
            sig,
            chunk,
            decl_node,
            ret_type,
            has_static_initializer: false,
        });
        self.func_sym_map.insert((sym, sig), id);

        let count = self.overload_counts.entry(sym).or_insert(0);
        *count += 1;
        let new_entry = if *count == 1 { id } else { FuncSymId::MANY };
        if let SymbolKind::Function { func_sym } = self.sym_kind_mut(sym) {
            *func_sym = new_entry;
        }
        Some(id)
    }

    /// Get a func-sym.
    #[inline]
    #[must_use]
    pub fn func_sym(&self, id: FuncSymId) -> &FuncSym {
        &self.func_syms[id.0 as usize]
    }

    /// Mutable func-sym access.
    pub fn func_sym_mut(&mut self, id: FuncSymId) -> &mut FuncSym {
        &mut self.func_syms[id.0 as usize]
    }

    /// Number of func-syms.
    #[must_use]
    pub fn num_func_syms(&self) -> usize {
        self.func_syms.len()
    }

    /// Look up an overload by exact signature.
    #[must_use]
    pub fn lookup_func(&self, sym: SymbolId, sig: FuncSigId) -> Option<FuncSymId> {
        self.func_sym_map.get(&(sym, sig)).copied()
    }

    /// Resolve a call of `name` under `parent` with the given argument
    /// types.
    ///
    /// Matching walks, in order: an exact overload on the resolved
    /// symbol; the `$call` magic member when the name resolves to a
    /// non-function; the receiver module and then each using-imported
    /// module. Returns `Ok(CallResolution::None)` only when the name is
    /// completely unknown.
    pub fn resolve_for_call(
        &mut self,
        parent: SymbolId,
        name: NameId,
        arg_types: &[TypeId],
        has_dynamic_arg: bool,
        search_modules: &[SymbolId],
    ) -> Result<CallResolution, CallError> {
        // Gather the scopes to try: the given parent, then fallbacks.
        let mut found_family: Option<SymbolId> = None;
        let mut scopes: smallvec::SmallVec<[SymbolId; 4]> = smallvec::smallvec![parent];
        scopes.extend(search_modules.iter().copied());

        for &scope in &scopes {
            let Some(sym_id) = self.lookup(scope, name) else {
                continue;
            };
            let target = match self.sym(sym_id).kind {
                SymbolKind::Function { .. } => sym_id,
                // A callable non-function resolves through `$call`.
                _ => {
                    let call_name = self.names.intern("$call");
                    match self.lookup(sym_id, call_name) {
                        Some(magic) => magic,
                        None => continue,
                    }
                }
            };
            found_family = Some(target);

            if let Some(func) = self.match_overload(target, arg_types) {
                return Ok(CallResolution::Func(func));
            }
            if has_dynamic_arg {
                // Late dispatch: the runtime re-resolves per call.
                return Ok(CallResolution::Dynamic(target));
            }
        }

        match found_family {
            None => Ok(CallResolution::None),
            Some(family) => {
                let count = self.overload_counts.get(&family).copied().unwrap_or(0);
                if count == 1 {
                    let sole = self
                        .func_sym_map
                        .iter()
                        .find(|((s, _), _)| *s == family)
                        .map(|((_, sig), _)| *sig)
                        .expect("overload count 1 implies an entry");
                    Err(CallError::WrongSignature { sig: sole })
                } else {
                    Err(CallError::Ambiguous {
                        num_overloads: count,
                    })
                }
            }
        }
    }

    /// Find an overload of `sym` accepting `arg_types` exactly (modulo
    /// `any`/`dynamic` parameters and integer-to-float narrowing).
    fn match_overload(&self, sym: SymbolId, arg_types: &[TypeId]) -> Option<FuncSymId> {
        // Fast path: the untyped signature of this arity.
        if let Some(&untyped) = self.untyped_by_arity.get(arg_types.len()) {
            if let Some(&func) = self.func_sym_map.get(&(sym, untyped)) {
                return Some(func);
            }
        }
        // Scan this family's overloads for a compatible signature.
        for ((owner, sig_id), &func) in &self.func_sym_map {
            if *owner != sym {
                continue;
            }
            let sig = self.sig(*sig_id);
            if sig.params.len() != arg_types.len() {
                continue;
            }
            let ok = sig
                .params
                .iter()
                .zip(arg_types)
                .all(|(&p, &a)| sable_core::TypeLattice::is_compat(a, p));
            if ok {
                return Some(func);
            }
        }
        None
    }

    // =========================================================================
    // Fields & method groups
    // =========================================================================

    /// Reserve a field-symbol index for a name; idempotent.
    pub fn ensure_field_sym(&mut self, name: NameId) -> FieldSymId {
        if let Some(&id) = self.field_map.get(&name) {
            return id;
        }
        let id = FieldSymId(self.field_syms.len() as u32);
        self.field_syms.push(name);
        self.field_map.insert(name, id);
        id
    }

    /// Number of reserved field syms.
    #[must_use]
    pub fn num_field_syms(&self) -> usize {
        self.field_syms.len()
    }

    /// Name behind a field sym.
    #[must_use]
    pub fn field_sym_name(&self, id: FieldSymId) -> NameId {
        self.field_syms[id.0 as usize]
    }

    /// Intern a `(name, num_params)` method group; idempotent.
    pub fn ensure_method_group(&mut self, name: NameId, num_params: u8) -> MethodGroupId {
        if let Some(&id) = self.method_group_map.get(&(name, num_params)) {
            return id;
        }
        let id = MethodGroupId(self.method_groups.len() as u32);
        self.method_groups.push((name, num_params));
        self.method_group_map.insert((name, num_params), id);
        id
    }

    /// Register a method under `(type_id, group)`.
    pub fn declare_method(&mut self, type_id: TypeId, group: MethodGroupId, entry: MethodEntry) {
        self.methods.insert((type_id, group), entry);
    }

    /// Look up a method.
    #[must_use]
    pub fn lookup_method(&self, type_id: TypeId, group: MethodGroupId) -> Option<&MethodEntry> {
        self.methods.get(&(type_id, group))
    }

    /// Allocate (or look up) the dense runtime slot of a static variable.
    pub fn ensure_static_var_id(&mut self, sym: SymbolId) -> u16 {
        if let Some(&id) = self.static_var_ids.get(&sym) {
            return id;
        }
        let id = self.static_var_syms.len() as u16;
        self.static_var_syms.push(sym);
        self.static_var_ids.insert(sym, id);
        id
    }

    /// Number of static variable slots.
    #[must_use]
    pub fn num_static_vars(&self) -> usize {
        self.static_var_syms.len()
    }

    /// Record the field order of an object type.
    pub fn set_object_fields(&mut self, type_id: TypeId, fields: Arc<[FieldSymId]>) {
        self.object_fields.insert(type_id, fields);
    }

    /// Field order of an object type.
    #[must_use]
    pub fn object_fields(&self, type_id: TypeId) -> Option<&Arc<[FieldSymId]>> {
        self.object_fields.get(&type_id)
    }

    /// Offset of a field within an object type, if declared.
    #[must_use]
    pub fn object_field_offset(&self, type_id: TypeId, field: FieldSymId) -> Option<u8> {
        self.object_fields
            .get(&type_id)?
            .iter()
            .position(|&f| f == field)
            .map(|i| i as u8)
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// Register a host module namespace, returning its id.
    pub fn declare_module(&mut self, name: NameId) -> Option<(ModuleId, SymbolId)> {
        let mod_id = ModuleId(self.modules.len() as u32);
        let sym = self.declare(SymbolId::ROOT, name, SymbolKind::Module(mod_id))?;
        self.modules.push(sym);
        Some((mod_id, sym))
    }

    /// Symbol backing a module.
    #[must_use]
    pub fn module_sym(&self, id: ModuleId) -> SymbolId {
        self.modules[id.0 as usize]
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::new()
    }

    #[test]
    fn test_declare_rejects_duplicates() {
        let mut t = table();
        let name = t.intern_name("x");
        assert!(t.declare(SymbolId::ROOT, name, SymbolKind::Internal).is_some());
        assert!(t.declare(SymbolId::ROOT, name, SymbolKind::Internal).is_none());
    }

    #[test]
    fn test_sig_interning() {
        let mut t = table();
        let a = t.ensure_func_sig(&[TypeId::INTEGER, TypeId::FLOAT], TypeId::ANY);
        let b = t.ensure_func_sig(&[TypeId::INTEGER, TypeId::FLOAT], TypeId::ANY);
        let c = t.ensure_func_sig(&[TypeId::INTEGER], TypeId::ANY);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_req_call_type_check() {
        let mut t = table();
        let untyped = t.ensure_func_sig(&[TypeId::ANY, TypeId::DYNAMIC], TypeId::ANY);
        assert!(!t.sig(untyped).req_call_type_check);
        let typed = t.ensure_func_sig(&[TypeId::INTEGER], TypeId::ANY);
        assert!(t.sig(typed).req_call_type_check);
    }

    #[test]
    fn test_untyped_sig_cache() {
        let mut t = table();
        let two = t.ensure_untyped_func_sig(2);
        assert_eq!(t.sig(two).params.len(), 2);
        assert_eq!(t.ensure_untyped_func_sig(2), two);
        assert_eq!(t.ensure_func_sig(&[TypeId::ANY, TypeId::ANY], TypeId::ANY), two);
    }

    #[test]
    fn test_overload_sets_many_sentinel() {
        let mut t = table();
        let name = t.intern_name("f");
        let sym = t
            .declare(
                SymbolId::ROOT,
                name,
                SymbolKind::Function {
                    func_sym: FuncSymId::MANY,
                },
            )
            .unwrap();
        let sig1 = t.ensure_untyped_func_sig(1);
        let sig2 = t.ensure_untyped_func_sig(2);
        let f1 = t
            .declare_func(sym, sig1, ChunkId(0), NodeId(0), TypeId::ANY)
            .unwrap();

        // One overload: the symbol points straight at it.
        match t.sym(sym).kind {
            SymbolKind::Function { func_sym } => assert_eq!(func_sym, f1),
            _ => panic!("expected function"),
        }
        assert!(t.resolve_distinct(SymbolId::ROOT, name).is_ok());

        t.declare_func(sym, sig2, ChunkId(0), NodeId(1), TypeId::ANY)
            .unwrap();

        // Two overloads: sentinel installed, distinct resolution fails.
        match t.sym(sym).kind {
            SymbolKind::Function { func_sym } => assert_eq!(func_sym, FuncSymId::MANY),
            _ => panic!("expected function"),
        }
        assert_eq!(t.resolve_distinct(SymbolId::ROOT, name), Err(2));
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let mut t = table();
        let name = t.intern_name("f");
        let sym = t
            .declare(
                SymbolId::ROOT,
                name,
                SymbolKind::Function {
                    func_sym: FuncSymId::MANY,
                },
            )
            .unwrap();
        let sig = t.ensure_untyped_func_sig(0);
        assert!(t.declare_func(sym, sig, ChunkId(0), NodeId(0), TypeId::ANY).is_some());
        assert!(t.declare_func(sym, sig, ChunkId(0), NodeId(1), TypeId::ANY).is_none());
    }

    #[test]
    fn test_resolve_for_call_exact_and_deterministic() {
        let mut t = table();
        let name = t.intern_name("add");
        let sym = t
            .declare(
                SymbolId::ROOT,
                name,
                SymbolKind::Function {
                    func_sym: FuncSymId::MANY,
                },
            )
            .unwrap();
        let sig_ii = t.ensure_func_sig(&[TypeId::INTEGER, TypeId::INTEGER], TypeId::INTEGER);
        let sig_ff = t.ensure_func_sig(&[TypeId::FLOAT, TypeId::FLOAT], TypeId::FLOAT);
        let f_ii = t
            .declare_func(sym, sig_ii, ChunkId(0), NodeId(0), TypeId::INTEGER)
            .unwrap();
        t.declare_func(sym, sig_ff, ChunkId(0), NodeId(1), TypeId::FLOAT)
            .unwrap();

        let args = [TypeId::INTEGER, TypeId::INTEGER];
        let r1 = t
            .resolve_for_call(SymbolId::ROOT, name, &args, false, &[])
            .unwrap();
        let r2 = t
            .resolve_for_call(SymbolId::ROOT, name, &args, false, &[])
            .unwrap();
        assert_eq!(r1, CallResolution::Func(f_ii));
        assert_eq!(r1, r2);
    }

    #[test]
    fn test_resolve_for_call_unknown_name() {
        let mut t = table();
        let name = t.intern_name("ghost");
        let r = t
            .resolve_for_call(SymbolId::ROOT, name, &[], false, &[])
            .unwrap();
        assert_eq!(r, CallResolution::None);
    }

    #[test]
    fn test_resolve_for_call_wrong_signature_reports_sole_overload() {
        let mut t = table();
        let name = t.intern_name("f");
        let sym = t
            .declare(
                SymbolId::ROOT,
                name,
                SymbolKind::Function {
                    func_sym: FuncSymId::MANY,
                },
            )
            .unwrap();
        let sig = t.ensure_func_sig(&[TypeId::INTEGER], TypeId::ANY);
        t.declare_func(sym, sig, ChunkId(0), NodeId(0), TypeId::ANY)
            .unwrap();

        let err = t
            .resolve_for_call(SymbolId::ROOT, name, &[TypeId::LIST, TypeId::LIST], false, &[])
            .unwrap_err();
        assert_eq!(err, CallError::WrongSignature { sig });
    }

    #[test]
    fn test_resolve_for_call_dynamic_arg_defers() {
        let mut t = table();
        let name = t.intern_name("f");
        let sym = t
            .declare(
                SymbolId::ROOT,
                name,
                SymbolKind::Function {
                    func_sym: FuncSymId::MANY,
                },
            )
            .unwrap();
        let sig = t.ensure_func_sig(&[TypeId::INTEGER], TypeId::ANY);
        t.declare_func(sym, sig, ChunkId(0), NodeId(0), TypeId::ANY)
            .unwrap();

        let r = t
            .resolve_for_call(SymbolId::ROOT, name, &[TypeId::DYNAMIC], false, &[])
            .unwrap();
        // `dynamic` is compatible with every param type, so this matches.
        assert_eq!(r, CallResolution::Func(FuncSymId(0)));

        let r = t
            .resolve_for_call(SymbolId::ROOT, name, &[TypeId::LIST, TypeId::DYNAMIC], true, &[])
            .unwrap();
        assert_eq!(r, CallResolution::Dynamic(sym));
    }

    #[test]
    fn test_call_magic_member() {
        let mut t = table();
        let obj_name = t.intern_name("Counter");
        let obj = t
            .declare(
                SymbolId::ROOT,
                obj_name,
                SymbolKind::Object {
                    type_id: TypeId::FIRST_USER,
                    module: ModuleId(0),
                },
            )
            .unwrap();
        let call_name = t.intern_name("$call");
        let magic = t
            .declare(
                obj,
                call_name,
                SymbolKind::Function {
                    func_sym: FuncSymId::MANY,
                },
            )
            .unwrap();
        let sig = t.ensure_untyped_func_sig(0);
        let f = t
            .declare_func(magic, sig, ChunkId(0), NodeId(0), TypeId::FIRST_USER)
            .unwrap();

        let r = t
            .resolve_for_call(SymbolId::ROOT, obj_name, &[], false, &[])
            .unwrap();
        assert_eq!(r, CallResolution::Func(f));
    }

    #[test]
    fn test_field_syms_reserved_once_per_name() {
        let mut t = table();
        let x = t.intern_name("x");
        let y = t.intern_name("y");
        let fx = t.ensure_field_sym(x);
        assert_eq!(t.ensure_field_sym(x), fx);
        assert_ne!(t.ensure_field_sym(y), fx);
        assert_eq!(t.field_sym_name(fx), x);
    }

    #[test]
    fn test_method_groups() {
        let mut t = table();
        let name = t.intern_name("next");
        let g1 = t.ensure_method_group(name, 1);
        assert_eq!(t.ensure_method_group(name, 1), g1);
        assert_ne!(t.ensure_method_group(name, 2), g1);

        let sig = t.ensure_untyped_func_sig(1);
        t.declare_method(
            TypeId::FIRST_USER,
            g1,
            MethodEntry {
                sig,
                func_sym: FuncSymId(0),
            },
        );
        assert!(t.lookup_method(TypeId::FIRST_USER, g1).is_some());
        assert!(t.lookup_method(TypeId::LIST, g1).is_none());
    }

    #[test]
    fn test_resolve_for_call_searches_using_modules() {
        let mut t = table();
        let mod_name = t.intern_name("math");
        let (_, mod_sym) = t.declare_module(mod_name).unwrap();

        let f_name = t.intern_name("abs");
        let f_sym = t
            .declare(
                mod_sym,
                f_name,
                SymbolKind::Function {
                    func_sym: FuncSymId::MANY,
                },
            )
            .unwrap();
        let sig = t.ensure_untyped_func_sig(1);
        let f = t
            .declare_func(f_sym, sig, ChunkId(0), NodeId(0), TypeId::ANY)
            .unwrap();

        // Unknown without the module in scope.
        let r = t
            .resolve_for_call(SymbolId::ROOT, f_name, &[TypeId::INTEGER], false, &[])
            .unwrap();
        assert_eq!(r, CallResolution::None);

        // Found once the module is imported.
        let r = t
            .resolve_for_call(SymbolId::ROOT, f_name, &[TypeId::INTEGER], false, &[mod_sym])
            .unwrap();
        assert_eq!(r, CallResolution::Func(f));
    }

    #[test]
    fn test_compact_symbol_id() {
        assert!(CompactSymbolId::NULL.is_null());
        let s = CompactSymbolId::from_sym(SymbolId(5));
        assert!(!s.is_func_sym());
        assert_eq!(s.id(), 5);
        let f = CompactSymbolId::from_func_sym(FuncSymId(9));
        assert!(f.is_func_sym());
        assert_eq!(f.id(), 9);
    }
}
