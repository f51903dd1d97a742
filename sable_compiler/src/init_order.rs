//! Static-initializer scheduling.
//!
//! Top-level variable initializers may forward-reference each other; the
//! analyzer records a dependency edge for every top-level symbol an
//! initializer touches. Emission order is a depth-first walk of that
//! graph, visiting each variable's dependencies before the variable
//! itself. Marking happens on entry, so a cycle's back edge simply skips
//! the symbol: its slot still holds `none` when the dependent
//! initializer runs, which is the documented behavior.

use crate::sym::SymbolId;
use rustc_hash::{FxHashMap, FxHashSet};
use sable_core::NodeId;

/// Depth-first scheduler over the initializer-dependency graph.
pub struct StaticInitScheduler<'a> {
    deps: &'a FxHashMap<SymbolId, Vec<SymbolId>>,
    visited: FxHashSet<SymbolId>,
    order: Vec<SymbolId>,
}

impl<'a> StaticInitScheduler<'a> {
    /// Create a scheduler over recorded dependency edges.
    #[must_use]
    pub fn new(deps: &'a FxHashMap<SymbolId, Vec<SymbolId>>) -> Self {
        Self {
            deps,
            visited: FxHashSet::default(),
            order: Vec::new(),
        }
    }

    /// Produce the emission order for the given variables (in
    /// declaration order, which makes the result deterministic).
    pub fn schedule(mut self, static_vars: &[(SymbolId, NodeId)]) -> Vec<SymbolId> {
        for &(sym, _) in static_vars {
            self.visit(sym);
        }
        self.order
    }

    fn visit(&mut self, sym: SymbolId) {
        // Mark on entry; a cyclic back edge sees the mark and stops.
        if !self.visited.insert(sym) {
            return;
        }
        if let Some(deps) = self.deps.get(&sym) {
            for &dep in deps {
                self.visit(dep);
            }
        }
        self.order.push(sym);
    }
}
