//! # Sable Core
//!
//! Core types shared across the Sable scripting-language implementation:
//!
//! - **AST node model**: immutable node pool with typed heads and sibling
//!   links, supplied by the (external) parser
//! - **Name interning**: dense `NameId`s for identifiers and literals
//! - **Type lattice**: built-in type ids, compatibility, rc-candidacy
//! - **Values**: NaN-boxed 64-bit runtime value representation
//! - **Errors**: the unified compile/runtime error enum

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod ast;
pub mod error;
pub mod intern;
pub mod span;
pub mod types;
pub mod value;

pub use ast::{Ast, BinaryOp, IntRadix, Node, NodeHead, NodeId, UnaryOp};
pub use error::{CompileErrorKind, PanicType, SableError, SableResult};
pub use intern::{NameId, NameInterner};
pub use span::Span;
pub use types::{TypeId, TypeLattice};
pub use value::Value;
