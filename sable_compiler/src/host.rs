//! Host-language interface.
//!
//! `@host` declarations are resolved at declaration time through loader
//! callbacks supplied by the embedder: a type loader fills in runtime
//! type ids, a func loader returns a host function (or a "quicken"
//! variant that may rewrite its call site's opcode on first execution),
//! and a var loader supplies initial values for host variables.

use crate::sym::ModuleId;
use sable_core::{TypeId, Value};

/// What kind of host function a loader returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFuncKind {
    /// A standard host function pointer.
    Standard,
    /// A function allowed to rewrite its call site on first execution.
    Quicken,
}

/// Result of the func loader.
#[derive(Debug, Clone, Copy)]
pub struct HostFuncResult {
    /// Host-side token identifying the function pointer.
    pub host_id: u32,
    /// Standard or quickening entry.
    pub kind: HostFuncKind,
}

/// Result of the type loader.
#[derive(Debug, Clone, Copy)]
pub struct HostTypeResult {
    /// The runtime type id the host assigned, or `None` to let the
    /// compiler allocate one.
    pub type_id: Option<TypeId>,
}

/// Loader callbacks invoked while declaring `@host` symbols.
pub trait HostEnv {
    /// Resolve a `@host type` marker.
    fn load_type(&mut self, module: ModuleId, name: &str) -> Option<HostTypeResult>;

    /// Resolve a `@host func` marker.
    fn load_func(&mut self, module: ModuleId, name: &str, num_params: u8)
        -> Option<HostFuncResult>;

    /// Resolve a `@host var` marker.
    fn load_var(&mut self, module: ModuleId, name: &str) -> Option<Value>;
}

/// A host environment that resolves nothing; `@host` declarations fail.
#[derive(Debug, Default)]
pub struct NoHost;

impl HostEnv for NoHost {
    fn load_type(&mut self, _module: ModuleId, _name: &str) -> Option<HostTypeResult> {
        None
    }

    fn load_func(
        &mut self,
        _module: ModuleId,
        _name: &str,
        _num_params: u8,
    ) -> Option<HostFuncResult> {
        None
    }

    fn load_var(&mut self, _module: ModuleId, _name: &str) -> Option<Value> {
        None
    }
}
