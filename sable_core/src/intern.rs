//! Name interning.
//!
//! Every identifier, field name, and string literal that participates in
//! symbol resolution is interned once and referred to by a dense
//! [`NameId`]. Dense ids (rather than pointer identity) let the symbol
//! graph key its maps off plain `u32` pairs.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// A handle to an interned name.
///
/// Ids are dense and allocated in interning order. Two `NameId`s are
/// equal if and only if the underlying byte slices are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NameId(pub u32);

impl NameId {
    /// Sentinel for "no name".
    pub const NULL: NameId = NameId(u32::MAX);

    /// Check whether this is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NameId(NULL)")
        } else {
            write!(f, "NameId({})", self.0)
        }
    }
}

/// Interner state behind the lock.
#[derive(Default)]
struct InternerInner {
    /// Map from name content to id.
    ids: FxHashMap<Arc<str>, NameId>,
    /// Name content by id.
    names: Vec<Arc<str>>,
}

/// Thread-safe name interner.
///
/// Interning the same name twice returns the same id. Lookup of the
/// content for an id is O(1).
pub struct NameInterner {
    inner: RwLock<InternerInner>,
}

impl NameInterner {
    /// Create a new, empty interner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(InternerInner::default()),
        }
    }

    /// Intern a name, returning its id.
    pub fn intern(&self, name: &str) -> NameId {
        // Fast path: already interned.
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.ids.get(name) {
                return id;
            }
        }

        let mut inner = self.inner.write();

        // Double-check after acquiring the write lock.
        if let Some(&id) = inner.ids.get(name) {
            return id;
        }

        let id = NameId(inner.names.len() as u32);
        let arc: Arc<str> = name.into();
        inner.names.push(arc.clone());
        inner.ids.insert(arc, id);
        id
    }

    /// Get an already-interned name's id without creating one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<NameId> {
        self.inner.read().ids.get(name).copied()
    }

    /// Get the content of an interned name.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this interner.
    #[must_use]
    pub fn resolve(&self, id: NameId) -> Arc<str> {
        self.inner.read().names[id.0 as usize].clone()
    }

    /// Number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    /// Check if the interner is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().names.is_empty()
    }
}

impl Default for NameInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NameInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameInterner")
            .field("count", &self.len())
            .finish()
    }
}
