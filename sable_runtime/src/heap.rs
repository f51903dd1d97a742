//! The ARC heap.
//!
//! Every heap-allocating operation returns a value with refcount 1;
//! retains and releases are explicit, emitted as bytecode or run by the
//! unwinders. A release that drops the count to zero frees the cell
//! immediately and releases its children. Execution is single-threaded
//! cooperative, so counts live in plain `Cell`s.

use crate::fiber::Fiber;
use crate::module::ModuleEnv;
use rustc_hash::FxHashMap;
use sable_core::{TypeId, Value};
use std::cell::{Cell, RefCell};

/// One heap allocation: a refcount header plus the payload.
#[derive(Debug)]
pub struct HeapCell {
    /// Reference count; the cell frees at zero.
    pub rc: Cell<u32>,
    /// Payload.
    pub kind: HeapKind,
}

/// Heap payload variants.
#[derive(Debug)]
pub enum HeapKind {
    /// Heap string.
    String(Box<str>),
    /// List of values.
    List(RefCell<Vec<Value>>),
    /// Map keyed by raw value bits (interned or primitive keys).
    Map(RefCell<FxHashMap<u64, Value>>),
    /// A captured variable's shared box.
    BoxVal(Cell<Value>),
    /// Instance of a user object type.
    Object {
        /// Runtime type id.
        type_id: TypeId,
        /// Field values in layout order.
        fields: RefCell<Vec<Value>>,
    },
    /// List iterator: a retained list plus a cursor.
    ListIter {
        /// The iterated list.
        list: Value,
        /// Next element index.
        idx: Cell<usize>,
    },
    /// Opaque host pointer.
    Pointer(usize),
    /// A stackful fiber.
    Fiber(RefCell<Fiber>),
}

impl HeapKind {
    /// Runtime type id of this payload.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        match self {
            Self::String(_) => TypeId::STRING,
            Self::List(_) => TypeId::LIST,
            Self::Map(_) => TypeId::MAP,
            // Boxes are invisible to the language; reads go through them.
            Self::BoxVal(_) => TypeId::ANY,
            Self::Object { type_id, .. } => *type_id,
            Self::ListIter { .. } => TypeId::LIST_ITERATOR,
            Self::Pointer(_) => TypeId::POINTER,
            Self::Fiber(_) => TypeId::FIBER,
        }
    }
}

/// The allocator and refcount bookkeeping.
///
/// Tracks live and total allocations so tests can assert the
/// retain/release balance.
#[derive(Debug, Default)]
pub struct Heap {
    live: usize,
    total_allocs: usize,
}

impl Heap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a cell with refcount 1.
    pub fn alloc(&mut self, kind: HeapKind) -> Value {
        self.live += 1;
        self.total_allocs += 1;
        let cell = Box::new(HeapCell {
            rc: Cell::new(1),
            kind,
        });
        Value::heap_ptr(Box::into_raw(cell).cast())
    }

    /// Borrow the cell behind a heap value.
    ///
    /// # Panics
    /// Panics if `v` is not a heap value.
    #[must_use]
    pub fn cell(v: Value) -> &'static HeapCell {
        let ptr = v.as_heap_ptr().expect("heap value");
        // Safety: heap values are only created by `alloc` and stay valid
        // until their count reaches zero; the single-threaded runtime
        // never frees a cell while a borrow is outstanding.
        unsafe { &*ptr.cast::<HeapCell>() }
    }

    /// Current refcount of a heap value.
    #[must_use]
    pub fn refcount(v: Value) -> u32 {
        Self::cell(v).rc.get()
    }

    /// Runtime type id of a value.
    #[must_use]
    pub fn type_of(v: Value) -> TypeId {
        if v.is_heap() {
            Self::cell(v).kind.type_id()
        } else if v.is_none() {
            TypeId::NONE
        } else if v.as_bool().is_some() {
            TypeId::BOOLEAN
        } else if v.is_int() {
            TypeId::INTEGER
        } else if v.as_symbol().is_some() {
            TypeId::SYMBOL
        } else if v.is_error() {
            TypeId::ERROR
        } else if v.as_static_string().is_some() {
            TypeId::STATIC_STRING
        } else {
            TypeId::FLOAT
        }
    }

    /// Increment a heap value's count. No-op for non-heap values.
    pub fn retain(&self, v: Value) {
        if v.is_heap() {
            let cell = Self::cell(v);
            cell.rc.set(cell.rc.get() + 1);
        }
    }

    /// Decrement a heap value's count, freeing at zero and releasing the
    /// cell's children. No-op for non-heap values.
    pub fn release(&mut self, v: Value, module: &ModuleEnv<'_>) {
        let Some(ptr) = v.as_heap_ptr() else {
            return;
        };
        let cell = unsafe { &*ptr.cast::<HeapCell>() };
        let rc = cell.rc.get();
        debug_assert!(rc > 0, "release of a dead cell");
        if rc > 1 {
            cell.rc.set(rc - 1);
            return;
        }

        // Safety: count reached zero, so this is the last reference; the
        // box was produced by `alloc`.
        let boxed = unsafe { Box::from_raw(ptr.cast::<HeapCell>()) };
        self.live -= 1;
        match boxed.kind {
            HeapKind::String(_) | HeapKind::Pointer(_) => {}
            HeapKind::List(items) => {
                for item in items.into_inner() {
                    self.release(item, module);
                }
            }
            HeapKind::Map(entries) => {
                for (_, value) in entries.into_inner() {
                    self.release(value, module);
                }
            }
            HeapKind::BoxVal(inner) => {
                self.release(inner.into_inner(), module);
            }
            HeapKind::Object { fields, .. } => {
                for field in fields.into_inner() {
                    self.release(field, module);
                }
            }
            HeapKind::ListIter { list, .. } => {
                self.release(list, module);
            }
            HeapKind::Fiber(fiber) => {
                // An abandoned fiber unwinds its stack so no heap value
                // it still references leaks.
                crate::unwind::release_fiber_stack(self, module, fiber.into_inner());
            }
        }
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Total allocations made.
    #[must_use]
    pub fn total_allocs(&self) -> usize {
        self.total_allocs
    }

    // =========================================================================
    // Convenience constructors
    // =========================================================================

    /// Allocate a heap string.
    pub fn new_string(&mut self, s: &str) -> Value {
        self.alloc(HeapKind::String(s.into()))
    }

    /// Allocate a list, taking ownership of the elements.
    pub fn new_list(&mut self, items: Vec<Value>) -> Value {
        self.alloc(HeapKind::List(RefCell::new(items)))
    }

    /// Allocate an empty map.
    pub fn new_map(&mut self) -> Value {
        self.alloc(HeapKind::Map(RefCell::new(FxHashMap::default())))
    }

    /// Allocate a box holding `inner`, taking ownership.
    pub fn new_box(&mut self, inner: Value) -> Value {
        self.alloc(HeapKind::BoxVal(Cell::new(inner)))
    }

    /// Allocate an object instance, taking ownership of the fields.
    pub fn new_object(&mut self, type_id: TypeId, fields: Vec<Value>) -> Value {
        self.alloc(HeapKind::Object {
            type_id,
            fields: RefCell::new(fields),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_compiler::{CodeBuffer, DebugSymbolTable, RuntimeTables};

    fn empty_module() -> (CodeBuffer, DebugSymbolTable, RuntimeTables) {
        (CodeBuffer::new(), DebugSymbolTable::new(), RuntimeTables::new())
    }

    macro_rules! module_env {
        ($parts:ident) => {
            ModuleEnv {
                ops: &$parts.0.ops,
                debug: &$parts.1,
                tables: &$parts.2,
            }
        };
    }

    #[test]
    fn test_alloc_starts_at_one() {
        let mut heap = Heap::new();
        let v = heap.new_string("hi");
        assert_eq!(Heap::refcount(v), 1);
        assert_eq!(heap.live(), 1);
    }

    #[test]
    fn test_retain_release_balance() {
        let parts = empty_module();
        let module = module_env!(parts);
        let mut heap = Heap::new();
        let v = heap.new_string("hi");
        heap.retain(v);
        assert_eq!(Heap::refcount(v), 2);
        heap.release(v, &module);
        assert_eq!(Heap::refcount(v), 1);
        assert_eq!(heap.live(), 1);
        heap.release(v, &module);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_release_frees_children() {
        let parts = empty_module();
        let module = module_env!(parts);
        let mut heap = Heap::new();
        let a = heap.new_string("a");
        let b = heap.new_string("b");
        let list = heap.new_list(vec![a, b]);
        assert_eq!(heap.live(), 3);
        heap.release(list, &module);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_shared_child_survives_parent() {
        let parts = empty_module();
        let module = module_env!(parts);
        let mut heap = Heap::new();
        let shared = heap.new_string("shared");
        heap.retain(shared);
        let list = heap.new_list(vec![shared]);
        heap.release(list, &module);
        // The list's reference dropped; ours remains.
        assert_eq!(heap.live(), 1);
        assert_eq!(Heap::refcount(shared), 1);
        heap.release(shared, &module);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_box_round_trip() {
        let parts = empty_module();
        let module = module_env!(parts);
        let mut heap = Heap::new();
        let v = Value::int(42).unwrap();
        let boxed = heap.new_box(v);
        let HeapKind::BoxVal(inner) = &Heap::cell(boxed).kind else {
            panic!("expected a box");
        };
        assert_eq!(inner.get(), v);
        heap.release(boxed, &module);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_release_ignores_primitives() {
        let parts = empty_module();
        let module = module_env!(parts);
        let mut heap = Heap::new();
        heap.release(Value::int(3).unwrap(), &module);
        heap.release(Value::NONE, &module);
        heap.retain(Value::TRUE);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_type_of() {
        let mut heap = Heap::new();
        assert_eq!(Heap::type_of(Value::int(1).unwrap()), TypeId::INTEGER);
        assert_eq!(Heap::type_of(Value::float(1.0)), TypeId::FLOAT);
        assert_eq!(Heap::type_of(Value::NONE), TypeId::NONE);
        let list = heap.new_list(vec![]);
        assert_eq!(Heap::type_of(list), TypeId::LIST);
    }
}
