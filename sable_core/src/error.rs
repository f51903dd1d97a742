//! Error types and result definitions.
//!
//! Two families share one enum: compile-time errors, which carry the
//! offending [`NodeId`] for source-location recovery and abort the
//! current chunk, and runtime errors, which become thrown error values
//! that unwind through try frames. Fibers that unwind without a catching
//! frame end in a panic state tagged by [`PanicType`].

use crate::ast::NodeId;
use std::fmt;
use thiserror::Error;

/// The unified result type used throughout Sable.
pub type SableResult<T> = Result<T, SableError>;

/// Classification of compile-time failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    /// Name resolution found nothing.
    UnknownSymbol,
    /// A `(parent, name)` pair was declared twice.
    DuplicateSymbol,
    /// A value-context lookup hit an overloaded function family.
    AmbiguousOverload,
    /// A call matched a name but no signature.
    IncompatibleSignature,
    /// Assignment to a non-assignable expression.
    InvalidAssignmentTarget,
    /// Declared and inferred types are incompatible.
    TypeMismatch,
    /// A static function captured an enclosing local.
    CaptureInStaticFunc,
    /// A static initializer referenced a local variable.
    LocalReferencedFromStaticInit,
    /// A node kind this compiler deliberately rejects.
    UnsupportedNode,
}

impl CompileErrorKind {
    /// Diagnostic name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownSymbol => "UnknownSymbol",
            Self::DuplicateSymbol => "DuplicateSymbol",
            Self::AmbiguousOverload => "AmbiguousOverload",
            Self::IncompatibleSignature => "IncompatibleSignature",
            Self::InvalidAssignmentTarget => "InvalidAssignmentTarget",
            Self::TypeMismatch => "TypeMismatch",
            Self::CaptureInStaticFunc => "CaptureInStaticFunc",
            Self::LocalReferencedFromStaticInit => "LocalReferencedFromStaticInit",
            Self::UnsupportedNode => "UnsupportedNode",
        }
    }
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag describing what a fiber panic payload means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PanicType {
    /// No panic.
    #[default]
    None,
    /// An error value unwound past the last try frame; payload is the
    /// raw error value.
    UncaughtError,
    /// Payload is a constant-pool index of a static message.
    StaticMsg,
    /// Payload is a heap string pointer.
    Msg,
    /// A host function threw; payload is host-defined.
    NativeThrow,
    /// Allocation failed while unwinding.
    InflightOom,
}

/// Comprehensive error type covering all Sable error conditions.
#[derive(Error, Debug, Clone)]
pub enum SableError {
    /// Compile-time failure; aborts the chunk.
    #[error("{kind}: {message}")]
    Compile {
        /// Failure classification.
        kind: CompileErrorKind,
        /// Formatted description.
        message: String,
        /// Node the diagnostic points at.
        node: NodeId,
    },

    /// Wrong operand type or method not found in a specialized op.
    #[error("TypeError: {message}")]
    TypeError {
        /// Error description.
        message: String,
    },

    /// Field access on a type that has no such field.
    #[error("FieldMissing: {message}")]
    FieldMissing {
        /// Error description.
        message: String,
    },

    /// Integer division or modulus by zero.
    #[error("DivideByZero: division by zero")]
    DivideByZero,

    /// Index outside a container's bounds.
    #[error("IndexOutOfBounds: index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: i64,
        /// Container length.
        len: usize,
    },

    /// A fiber panicked.
    #[error("Panic: {panic_type:?}")]
    Panic {
        /// Payload interpretation.
        panic_type: PanicType,
        /// 64-bit payload; meaning depends on the tag.
        payload: u64,
    },

    /// Allocation failure.
    #[error("OutOfMemory")]
    OutOfMemory,
}

impl SableError {
    /// Create a compile error.
    #[must_use]
    pub fn compile(kind: CompileErrorKind, message: impl Into<String>, node: NodeId) -> Self {
        Self::Compile {
            kind,
            message: message.into(),
            node,
        }
    }

    /// Create a type error.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into(),
        }
    }

    /// Create a field-missing error.
    #[must_use]
    pub fn field_missing(message: impl Into<String>) -> Self {
        Self::FieldMissing {
            message: message.into(),
        }
    }

    /// Create a panic error.
    #[must_use]
    pub const fn panic(panic_type: PanicType, payload: u64) -> Self {
        Self::Panic {
            panic_type,
            payload,
        }
    }

    /// Get the compile-error node, if this is a compile error.
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Compile { node, .. } => Some(*node),
            _ => None,
        }
    }

    /// Check whether this error kind unwinds at runtime (as opposed to
    /// aborting compilation).
    #[must_use]
    pub const fn is_runtime(&self) -> bool {
        !matches!(self, Self::Compile { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_carries_node() {
        let err = SableError::compile(
            CompileErrorKind::UnknownSymbol,
            "unknown symbol `foo`",
            NodeId(7),
        );
        assert_eq!(err.node(), Some(NodeId(7)));
        assert!(!err.is_runtime());
        assert_eq!(err.to_string(), "UnknownSymbol: unknown symbol `foo`");
    }

    #[test]
    fn test_runtime_errors_have_no_node() {
        let err = SableError::type_error("expected int");
        assert_eq!(err.node(), None);
        assert!(err.is_runtime());
    }

    #[test]
    fn test_divide_by_zero_display() {
        assert_eq!(
            SableError::DivideByZero.to_string(),
            "DivideByZero: division by zero"
        );
    }

    #[test]
    fn test_index_out_of_bounds_display() {
        let err = SableError::IndexOutOfBounds { index: 5, len: 3 };
        assert_eq!(
            err.to_string(),
            "IndexOutOfBounds: index 5 out of bounds for length 3"
        );
    }

    #[test]
    fn test_panic_tags() {
        let err = SableError::panic(PanicType::UncaughtError, 0xdead);
        match err {
            SableError::Panic {
                panic_type,
                payload,
            } => {
                assert_eq!(panic_type, PanicType::UncaughtError);
                assert_eq!(payload, 0xdead);
            }
            _ => panic!("expected Panic"),
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            CompileErrorKind::CaptureInStaticFunc.as_str(),
            "CaptureInStaticFunc"
        );
        assert_eq!(
            CompileErrorKind::LocalReferencedFromStaticInit.to_string(),
            "LocalReferencedFromStaticInit"
        );
    }
}
