//! The type lattice.
//!
//! Sable's lightweight inference works over a closed set of built-in type
//! ids at well-known small integers, plus user object type ids allocated
//! contiguously above them. The lattice answers two questions for the
//! emitter: is a source type compatible with a requested type, and may a
//! value of this type point at a refcounted heap object.

use std::fmt;

/// A type id in the lattice.
///
/// Built-in ids occupy `0..FIRST_USER`; user object types are allocated
/// upward from [`TypeId::FIRST_USER`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Top type; every value is assignable to `any`.
    pub const ANY: TypeId = TypeId(0);
    /// Boolean.
    pub const BOOLEAN: TypeId = TypeId(1);
    /// 64-bit float.
    pub const FLOAT: TypeId = TypeId(2);
    /// Integer.
    pub const INTEGER: TypeId = TypeId(3);
    /// Heap string.
    pub const STRING: TypeId = TypeId(4);
    /// String stored in the constant pool; never refcounted.
    pub const STATIC_STRING: TypeId = TypeId(5);
    /// Raw byte string.
    pub const RAWSTRING: TypeId = TypeId(6);
    /// Interned symbol literal (`#name`).
    pub const SYMBOL: TypeId = TypeId(7);
    /// List.
    pub const LIST: TypeId = TypeId(8);
    /// List iterator.
    pub const LIST_ITERATOR: TypeId = TypeId(9);
    /// Map.
    pub const MAP: TypeId = TypeId(10);
    /// Map iterator.
    pub const MAP_ITERATOR: TypeId = TypeId(11);
    /// Opaque host pointer.
    pub const POINTER: TypeId = TypeId(12);
    /// The `none` unit type.
    pub const NONE: TypeId = TypeId(13);
    /// Error value (a wrapped symbol).
    pub const ERROR: TypeId = TypeId(14);
    /// Fiber handle.
    pub const FIBER: TypeId = TypeId(15);
    /// A type used as a value.
    pub const METATYPE: TypeId = TypeId(16);
    /// Statically unknown; checked at runtime.
    pub const DYNAMIC: TypeId = TypeId(17);
    /// Not yet inferred.
    pub const UNDEFINED: TypeId = TypeId(18);
    /// First user object type id.
    pub const FIRST_USER: TypeId = TypeId(19);

    /// Check whether this id names a user object type.
    #[inline]
    #[must_use]
    pub const fn is_user_object(self) -> bool {
        self.0 >= Self::FIRST_USER.0
    }

    /// Name of a built-in type for diagnostics.
    #[must_use]
    pub const fn builtin_name(self) -> &'static str {
        match self.0 {
            0 => "any",
            1 => "boolean",
            2 => "float",
            3 => "int",
            4 => "string",
            5 => "staticstring",
            6 => "rawstring",
            7 => "symbol",
            8 => "List",
            9 => "ListIterator",
            10 => "Map",
            11 => "MapIterator",
            12 => "pointer",
            13 => "none",
            14 => "error",
            15 => "Fiber",
            16 => "metatype",
            17 => "dynamic",
            18 => "undefined",
            _ => "object",
        }
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_user_object() {
            write!(f, "TypeId(object#{})", self.0)
        } else {
            write!(f, "TypeId({})", self.builtin_name())
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.builtin_name())
    }
}

/// Allocator and oracle for the type lattice.
#[derive(Debug, Default)]
pub struct TypeLattice {
    /// Number of user object types allocated so far.
    num_user_types: u32,
}

impl TypeLattice {
    /// Create a lattice with no user types.
    #[must_use]
    pub fn new() -> Self {
        Self { num_user_types: 0 }
    }

    /// Allocate the next user object type id.
    pub fn alloc_object_type(&mut self) -> TypeId {
        let id = TypeId(TypeId::FIRST_USER.0 + self.num_user_types);
        self.num_user_types += 1;
        id
    }

    /// Total number of type ids in use (built-ins plus user types).
    #[must_use]
    pub fn num_types(&self) -> u32 {
        TypeId::FIRST_USER.0 + self.num_user_types
    }

    /// Check whether a value of type `src` satisfies a request for `tgt`.
    ///
    /// `dynamic` sources always pass; the runtime re-checks. An integer
    /// source narrows into a float request (literal coercion).
    #[inline]
    #[must_use]
    pub fn is_compat(src: TypeId, tgt: TypeId) -> bool {
        if tgt == TypeId::ANY || src == TypeId::DYNAMIC || src == tgt {
            return true;
        }
        src == TypeId::INTEGER && tgt == TypeId::FLOAT
    }

    /// Check whether values of this type may point at a refcounted heap
    /// object. Drives the emitter's retain/release decisions.
    #[inline]
    #[must_use]
    pub fn is_rc_candidate(t: TypeId) -> bool {
        matches!(
            t,
            TypeId::ANY
                | TypeId::DYNAMIC
                | TypeId::STRING
                | TypeId::RAWSTRING
                | TypeId::LIST
                | TypeId::LIST_ITERATOR
                | TypeId::MAP
                | TypeId::MAP_ITERATOR
                | TypeId::POINTER
                | TypeId::FIBER
        ) || t.is_user_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids_are_stable() {
        assert_eq!(TypeId::ANY.0, 0);
        assert_eq!(TypeId::INTEGER.0, 3);
        assert_eq!(TypeId::NONE.0, 13);
        assert_eq!(TypeId::DYNAMIC.0, 17);
        assert_eq!(TypeId::FIRST_USER.0, 19);
    }

    #[test]
    fn test_user_types_are_contiguous() {
        let mut lattice = TypeLattice::new();
        let a = lattice.alloc_object_type();
        let b = lattice.alloc_object_type();
        assert_eq!(a, TypeId::FIRST_USER);
        assert_eq!(b.0, TypeId::FIRST_USER.0 + 1);
        assert!(a.is_user_object());
        assert!(!TypeId::MAP.is_user_object());
    }

    #[test]
    fn test_compat_any_and_dynamic() {
        assert!(TypeLattice::is_compat(TypeId::INTEGER, TypeId::ANY));
        assert!(TypeLattice::is_compat(TypeId::DYNAMIC, TypeId::INTEGER));
        assert!(TypeLattice::is_compat(TypeId::LIST, TypeId::LIST));
        assert!(!TypeLattice::is_compat(TypeId::LIST, TypeId::MAP));
    }

    #[test]
    fn test_compat_int_narrows_to_float() {
        assert!(TypeLattice::is_compat(TypeId::INTEGER, TypeId::FLOAT));
        assert!(!TypeLattice::is_compat(TypeId::FLOAT, TypeId::INTEGER));
    }

    #[test]
    fn test_rc_candidacy() {
        assert!(TypeLattice::is_rc_candidate(TypeId::STRING));
        assert!(TypeLattice::is_rc_candidate(TypeId::LIST));
        assert!(TypeLattice::is_rc_candidate(TypeId::ANY));
        assert!(TypeLattice::is_rc_candidate(TypeId::FIBER));
        assert!(!TypeLattice::is_rc_candidate(TypeId::INTEGER));
        assert!(!TypeLattice::is_rc_candidate(TypeId::STATIC_STRING));
        assert!(!TypeLattice::is_rc_candidate(TypeId::SYMBOL));
        assert!(!TypeLattice::is_rc_candidate(TypeId::NONE));

        let mut lattice = TypeLattice::new();
        let obj = lattice.alloc_object_type();
        assert!(TypeLattice::is_rc_candidate(obj));
    }
}
