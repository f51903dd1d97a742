//! Register planning for one block.
//!
//! Each block owns a contiguous register window laid out as
//! `[ret, ret-info, ret-pc, ret-fp, params…, locals…, temps…]`. Temps are
//! allocated with stack discipline, with one twist: a temp may hold a
//! value produced at `+1` that must survive until the enclosing arc
//! expression ends. Those slots form the *arc-temp region* and are
//! released together when the statement finishes.
//!
//! The planner enforces the register discipline invariant: at every
//! statement boundary, the first free temp equals the number of reserved
//! locals. A violation means a retain leaked.

use smallvec::SmallVec;

/// Number of slots the call header occupies before the first parameter:
/// return value, return info, return pc, return frame pointer.
pub const CALL_HEADER_SLOTS: u8 = 4;

/// Opaque mark returned by [`RegisterPlanner::begin_arc_expr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcMark {
    /// Number of arc temps recorded at mark time.
    arc_len: usize,
    /// First free temp at mark time.
    first_free: u8,
}

/// Per-block register allocator.
#[derive(Debug)]
pub struct RegisterPlanner {
    /// Slots reserved for the header, params, and named locals so far.
    cur_num_locals: u8,
    /// Next temp slot with no live temp at or above it.
    first_free_temp: u8,
    /// High-water mark over every slot ever handed out.
    max_slot: u8,
    /// Slots holding retained values awaiting the end of the current arc
    /// expression, innermost last.
    arc_temps: SmallVec<[u8; 4]>,
    /// 256-bit bitmap of temp slots pinned by enclosing constructs
    /// (loop counters, iterators).
    reserved: [u64; 4],
}

impl RegisterPlanner {
    /// Create a planner for a block with `num_params` parameters.
    #[must_use]
    pub fn new(num_params: u8) -> Self {
        let base = CALL_HEADER_SLOTS + num_params;
        Self {
            cur_num_locals: base,
            first_free_temp: base,
            max_slot: base,
            arc_temps: SmallVec::new(),
            reserved: [0; 4],
        }
    }

    /// Slot of parameter `idx`.
    #[inline]
    #[must_use]
    pub fn param_slot(idx: u8) -> u8 {
        CALL_HEADER_SLOTS + idx
    }

    /// Slots currently reserved for the header, params, and named locals.
    #[inline]
    #[must_use]
    pub fn num_locals(&self) -> u8 {
        self.cur_num_locals
    }

    /// Frame size requirement: one past the highest slot ever used.
    #[inline]
    #[must_use]
    pub fn max_locals(&self) -> u8 {
        self.max_slot
    }

    /// Reserve the next slot for a named local.
    ///
    /// Must be called at a statement boundary (no live temps below the
    /// new slot).
    pub fn declare_local(&mut self) -> u8 {
        debug_assert_eq!(
            self.first_free_temp, self.cur_num_locals,
            "local declared with live temps"
        );
        let slot = self.cur_num_locals;
        self.cur_num_locals += 1;
        self.first_free_temp = self.cur_num_locals;
        self.track(slot);
        slot
    }

    // =========================================================================
    // Temps
    // =========================================================================

    /// Allocate the next free temp, skipping reserved slots.
    pub fn next_free_temp_local(&mut self) -> u8 {
        let mut slot = self.first_free_temp;
        while self.is_reserved(slot) {
            slot += 1;
        }
        self.first_free_temp = slot + 1;
        self.track(slot);
        slot
    }

    /// Reset the temp watermark to a per-expression mark.
    pub fn compute_next_temp_from(&mut self, mark: ArcMark) {
        // Never hand out a slot still holding a retained value.
        let floor = self
            .arc_temps
            .iter()
            .copied()
            .max()
            .map_or(mark.first_free, |m| (m + 1).max(mark.first_free));
        self.first_free_temp = floor;
    }

    /// Advance the temp watermark past every live arc temp and reserved
    /// slot, guaranteeing that subsequent temps are fresh and contiguous.
    /// Returns the first slot of the run.
    pub fn advance_next_temp_past_arc_temps(&mut self) -> u8 {
        let mut first = self.first_free_temp.max(self.cur_num_locals);
        if let Some(&m) = self.arc_temps.iter().max() {
            first = first.max(m + 1);
        }
        while self.is_reserved(first) {
            first += 1;
        }
        self.first_free_temp = first;
        self.track(first);
        first
    }

    /// Claim a contiguous run of `len` temps beginning at `first`
    /// (obtained from [`Self::advance_next_temp_past_arc_temps`]). The
    /// run's slots are fixed; intermediate temps of the expressions
    /// filling them allocate above the run.
    pub fn claim_temp_run(&mut self, first: u8, len: u8) {
        let end = first + len;
        self.first_free_temp = end;
        if end > self.max_slot {
            self.max_slot = end;
        }
    }

    /// After filling one run slot, drop that slot's expression
    /// intermediates while keeping the run and every live arc temp
    /// intact.
    pub fn settle_temp_run(&mut self, run_end: u8) {
        let floor = self
            .arc_temps
            .iter()
            .copied()
            .max()
            .map_or(run_end, |m| (m + 1).max(run_end));
        self.first_free_temp = floor;
    }

    // =========================================================================
    // Arc-temp region
    // =========================================================================

    /// Open an arc expression (a statement that may retain intermediate
    /// results).
    #[must_use]
    pub fn begin_arc_expr(&mut self) -> ArcMark {
        ArcMark {
            arc_len: self.arc_temps.len(),
            first_free: self.first_free_temp,
        }
    }

    /// Record that `slot` holds a retained value owned by the current
    /// arc expression.
    pub fn push_arc_temp(&mut self, slot: u8) {
        self.arc_temps.push(slot);
    }

    /// Close an arc expression, draining the slots retained since `mark`.
    /// The caller emits a `release` for each returned slot.
    pub fn end_arc_expr(&mut self, mark: ArcMark) -> SmallVec<[u8; 4]> {
        let drained: SmallVec<[u8; 4]> = self.arc_temps.drain(mark.arc_len..).collect();
        self.first_free_temp = mark.first_free;
        drained
    }

    /// Slots currently held by the arc-temp region, outermost first.
    #[must_use]
    pub fn arc_temps(&self) -> &[u8] {
        &self.arc_temps
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Pin a temp slot so nested expressions cannot steal it.
    pub fn set_reserved_temp_local(&mut self, slot: u8) {
        self.reserved[(slot >> 6) as usize] |= 1 << (slot & 63);
    }

    /// Unpin a temp slot.
    pub fn clear_reserved_temp_local(&mut self, slot: u8) {
        self.reserved[(slot >> 6) as usize] &= !(1 << (slot & 63));
    }

    /// Check whether a slot is pinned.
    #[inline]
    #[must_use]
    pub fn is_reserved(&self, slot: u8) -> bool {
        self.reserved[(slot >> 6) as usize] & (1 << (slot & 63)) != 0
    }

    /// Statement-boundary invariant check: every temp returned, every
    /// retain accounted for.
    pub fn assert_statement_boundary(&self) {
        debug_assert_eq!(
            self.first_free_temp, self.cur_num_locals,
            "temp leaked across a statement boundary"
        );
        debug_assert!(
            self.arc_temps.is_empty(),
            "arc temp leaked across a statement boundary"
        );
    }

    #[inline]
    fn track(&mut self, slot: u8) {
        if slot >= self.max_slot {
            self.max_slot = slot + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_starts_after_header_and_params() {
        let p = RegisterPlanner::new(2);
        assert_eq!(p.num_locals(), 6);
        assert_eq!(RegisterPlanner::param_slot(0), 4);
        assert_eq!(RegisterPlanner::param_slot(1), 5);
    }

    #[test]
    fn test_declare_local_is_dense() {
        let mut p = RegisterPlanner::new(0);
        assert_eq!(p.declare_local(), 4);
        assert_eq!(p.declare_local(), 5);
        assert_eq!(p.num_locals(), 6);
    }

    #[test]
    fn test_temps_allocate_above_locals() {
        let mut p = RegisterPlanner::new(0);
        p.declare_local();
        let mark = p.begin_arc_expr();
        assert_eq!(p.next_free_temp_local(), 5);
        assert_eq!(p.next_free_temp_local(), 6);
        let released = p.end_arc_expr(mark);
        assert!(released.is_empty());
        p.assert_statement_boundary();
    }

    #[test]
    fn test_arc_temps_drain_in_order() {
        let mut p = RegisterPlanner::new(0);
        let mark = p.begin_arc_expr();
        let a = p.next_free_temp_local();
        p.push_arc_temp(a);
        let b = p.next_free_temp_local();
        p.push_arc_temp(b);
        let released = p.end_arc_expr(mark);
        assert_eq!(released.as_slice(), &[a, b]);
        p.assert_statement_boundary();
    }

    #[test]
    fn test_nested_arc_exprs() {
        let mut p = RegisterPlanner::new(0);
        let outer = p.begin_arc_expr();
        let a = p.next_free_temp_local();
        p.push_arc_temp(a);

        let inner = p.begin_arc_expr();
        let b = p.next_free_temp_local();
        p.push_arc_temp(b);
        assert_eq!(p.end_arc_expr(inner).as_slice(), &[b]);

        assert_eq!(p.end_arc_expr(outer).as_slice(), &[a]);
    }

    #[test]
    fn test_advance_past_arc_temps_skips_live_retains() {
        let mut p = RegisterPlanner::new(0);
        let mark = p.begin_arc_expr();
        let a = p.next_free_temp_local();
        p.push_arc_temp(a);
        // A per-expression reset would normally hand slot 4 out again;
        // the arc temp must survive.
        p.compute_next_temp_from(mark);
        let first_arg = p.advance_next_temp_past_arc_temps();
        assert!(first_arg > a);
        p.end_arc_expr(mark);
    }

    #[test]
    fn test_reserved_slots_are_skipped() {
        let mut p = RegisterPlanner::new(0);
        let mark = p.begin_arc_expr();
        let counter = p.next_free_temp_local();
        p.set_reserved_temp_local(counter);
        p.compute_next_temp_from(mark);
        let next = p.next_free_temp_local();
        assert_ne!(next, counter);
        p.clear_reserved_temp_local(counter);
        p.end_arc_expr(mark);
    }

    #[test]
    #[should_panic(expected = "temp leaked")]
    #[cfg(debug_assertions)]
    fn test_leaked_temp_is_caught() {
        let mut p = RegisterPlanner::new(0);
        p.next_free_temp_local();
        p.assert_statement_boundary();
    }
}
