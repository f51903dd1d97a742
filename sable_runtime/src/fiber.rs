//! Stackful fibers and the cooperative switch protocol.
//!
//! Each fiber owns its stack allocation and a saved copy of the
//! execution state (`pc`, `fp`, try frames, panic state) while it is
//! not current. `prev_fiber` links form a stack of active fibers; at
//! most one fiber executes at any instant, and control only transfers
//! at explicit `coresume`/`coyield`/completion edges.

use crate::heap::HeapKind;
use crate::state::{
    RuntimeState, TraceEntry, TryFrame, FRAME_RET_PC, MIN_STACK, PARENT_DST_NONE, RAW_NULL,
};
use sable_compiler::NONE_DST;
use sable_core::{PanicType, Value};
use smallvec::SmallVec;

/// Life-cycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Created by `coinit`, never resumed.
    Init,
    /// Currently running, or suspended mid-resume of a child.
    Active,
    /// Suspended at a `coyield`.
    Yielded,
    /// Completed; resuming is a no-op.
    Done,
}

/// A first-class stackful coroutine.
#[derive(Debug)]
pub struct Fiber {
    /// The fiber's stack; owned exclusively by this fiber.
    pub stack: Vec<Value>,
    /// Saved pc while not current. For a yielded fiber this is the pc of
    /// the `coyield` op itself.
    pub pc_offset: u32,
    /// Saved frame pointer while not current.
    pub stack_offset: u32,
    /// Entry pc of the fiber's function.
    pub initial_pc: u32,
    /// Absolute slot in the parent fiber's stack receiving the yield or
    /// completion value, or [`PARENT_DST_NONE`].
    pub parent_dst_abs: u32,
    /// Argument count copied in at creation.
    pub num_args: u8,
    /// Life-cycle state.
    pub status: FiberStatus,
    /// The fiber that resumed this one; forms the active-fiber stack.
    pub prev_fiber: Value,
    /// Saved try frames while not current.
    pub try_stack: SmallVec<[TryFrame; 4]>,
    /// Saved throw trace while not current.
    pub throw_trace: Vec<TraceEntry>,
    /// Saved panic tag.
    pub panic_type: PanicType,
    /// Saved panic payload.
    pub panic_payload: u64,
}

impl Fiber {
    /// The implicit root fiber backing the main context. Its live state
    /// resides in [`RuntimeState`] until another fiber is resumed.
    #[must_use]
    pub fn root() -> Self {
        Self {
            stack: Vec::new(),
            pc_offset: 0,
            stack_offset: 0,
            initial_pc: 0,
            parent_dst_abs: PARENT_DST_NONE,
            num_args: 0,
            status: FiberStatus::Active,
            prev_fiber: Value::NONE,
            try_stack: SmallVec::new(),
            throw_trace: Vec::new(),
            panic_type: PanicType::None,
            panic_payload: 0,
        }
    }

    /// Check whether the fiber completed.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == FiberStatus::Done
    }

    /// Check whether the fiber is suspended at a `coyield`.
    #[inline]
    #[must_use]
    pub fn is_yielded(&self) -> bool {
        self.status == FiberStatus::Yielded
    }

    /// Check whether the fiber was created but never resumed.
    #[inline]
    #[must_use]
    pub fn is_unresumed(&self) -> bool {
        self.status == FiberStatus::Init
    }
}

/// Outcome of a `coresume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// Control transferred; continue dispatch at this pc (inside the
    /// target fiber).
    Switched {
        /// Pc to resume at.
        pc: u32,
    },
    /// The target was completed or already active; `none` was written to
    /// the destination and dispatch continues in place.
    NotSwitched,
}

impl RuntimeState {
    fn with_fiber<R>(fiber_val: Value, f: impl FnOnce(&mut Fiber) -> R) -> R {
        let HeapKind::Fiber(cell) = &crate::heap::Heap::cell(fiber_val).kind else {
            panic!("value is not a fiber");
        };
        f(&mut cell.borrow_mut())
    }

    /// `coinit`: create a fiber running `entry_pc` with the given
    /// arguments (ownership moves into the fiber). Returns the fiber
    /// handle at refcount 1.
    pub fn coinit(&mut self, entry_pc: u32, args: &[Value]) -> Value {
        // Slot 0 is reserved; the root frame starts at offset 1 so its
        // params land at slot 5.
        let len = (args.len() + 5).max(MIN_STACK);
        let mut stack = vec![Value::NONE; len];
        stack[(1 + FRAME_RET_PC) as usize] = Value::from_raw(RAW_NULL);
        stack[5..5 + args.len()].copy_from_slice(args);

        let fiber = Fiber {
            stack,
            pc_offset: entry_pc,
            stack_offset: 1,
            initial_pc: entry_pc,
            parent_dst_abs: PARENT_DST_NONE,
            num_args: args.len() as u8,
            status: FiberStatus::Init,
            prev_fiber: Value::NONE,
            try_stack: SmallVec::new(),
            throw_trace: Vec::new(),
            panic_type: PanicType::None,
            panic_payload: 0,
        };
        self.heap
            .alloc(HeapKind::Fiber(std::cell::RefCell::new(fiber)))
    }

    /// `coresume fiberSlot, dstSlot`: transfer control to `fiber_val`.
    /// `resume_pc` is the pc of the `coresume` op; the parent resumes
    /// just past it. A yielded target continues past its `coyield` op.
    pub fn coresume(&mut self, fiber_val: Value, dst: u8, resume_pc: u32) -> ResumeAction {
        let is_other_fiber = fiber_val.is_heap()
            && fiber_val != self.cur_fiber
            && matches!(crate::heap::Heap::cell(fiber_val).kind, HeapKind::Fiber(_));
        if !is_other_fiber {
            if dst != NONE_DST {
                self.set_slot(dst, Value::NONE);
            }
            return ResumeAction::NotSwitched;
        }
        let resumable = Self::with_fiber(fiber_val, |f| {
            matches!(f.status, FiberStatus::Init | FiberStatus::Yielded)
        });
        if !resumable {
            if dst != NONE_DST {
                self.set_slot(dst, Value::NONE);
            }
            return ResumeAction::NotSwitched;
        }

        // The runtime holds one reference to whichever fiber is current;
        // that reference moves into the child's prev link on switch.
        self.heap.retain(fiber_val);

        let parent_dst_abs = if dst == NONE_DST {
            PARENT_DST_NONE
        } else {
            self.fp + u32::from(dst)
        };

        // Save the current context into the current fiber's header.
        let parent_val = self.cur_fiber;
        Self::with_fiber(parent_val, |parent| {
            parent.pc_offset = resume_pc + 3;
            parent.stack_offset = self.fp;
            std::mem::swap(&mut parent.stack, &mut self.stack);
            parent.try_stack = std::mem::take(&mut self.try_stack);
            parent.throw_trace = std::mem::take(&mut self.throw_trace);
            parent.panic_type = self.panic_type;
            parent.panic_payload = self.panic_payload;
        });

        // Install the target.
        let pc = Self::with_fiber(fiber_val, |target| {
            target.parent_dst_abs = parent_dst_abs;
            target.prev_fiber = parent_val;
            std::mem::swap(&mut target.stack, &mut self.stack);
            self.fp = target.stack_offset;
            self.try_stack = std::mem::take(&mut target.try_stack);
            self.throw_trace = std::mem::take(&mut target.throw_trace);
            self.panic_type = target.panic_type;
            self.panic_payload = target.panic_payload;
            let pc = if target.status == FiberStatus::Yielded {
                // Skip the coyield op the fiber suspended on.
                target.pc_offset + 3
            } else {
                target.pc_offset
            };
            target.status = FiberStatus::Active;
            pc
        });
        self.cur_fiber = fiber_val;
        self.pc = pc;
        ResumeAction::Switched { pc }
    }

    /// `coyield`: suspend the current fiber at `yield_pc` (the pc of the
    /// coyield op) and return control to the fiber that resumed it.
    /// Writes `none` into the parent's destination slot. Returns the
    /// parent's resume pc.
    pub fn coyield(&mut self, yield_pc: u32, module: &crate::module::ModuleEnv<'_>) -> u32 {
        let child_val = self.cur_fiber;
        // Yielding from the root context has no parent; execution just
        // continues past the op.
        let has_parent = Self::with_fiber(child_val, |c| !c.prev_fiber.is_none());
        if !has_parent {
            return yield_pc + 3;
        }
        let (parent_val, parent_dst) = Self::with_fiber(child_val, |child| {
            child.pc_offset = yield_pc;
            child.stack_offset = self.fp;
            child.status = FiberStatus::Yielded;
            std::mem::swap(&mut child.stack, &mut self.stack);
            child.try_stack = std::mem::take(&mut self.try_stack);
            child.throw_trace = std::mem::take(&mut self.throw_trace);
            child.panic_type = self.panic_type;
            child.panic_payload = self.panic_payload;
            (std::mem::replace(&mut child.prev_fiber, Value::NONE), child.parent_dst_abs)
        });
        let pc = self.install_saved(parent_val);
        // Yield carries no value in this revision.
        if parent_dst != PARENT_DST_NONE {
            self.stack[parent_dst as usize] = Value::NONE;
        }
        // The runtime's reference to the suspended child drops.
        self.heap.release(child_val, module);
        pc
    }

    /// Fiber completion: pop back to the parent, depositing `ret_val`
    /// into the parent's destination slot (or releasing it when the
    /// destination is the drop sentinel). Returns the parent's resume
    /// pc, or `None` when the root fiber completed.
    pub fn coreturn(&mut self, ret_val: Value, module: &crate::module::ModuleEnv<'_>) -> Option<u32> {
        let child_val = self.cur_fiber;
        let (parent_val, parent_dst) = Self::with_fiber(child_val, |child| {
            child.status = FiberStatus::Done;
            child.stack = Vec::new();
            child.try_stack = SmallVec::new();
            (std::mem::replace(&mut child.prev_fiber, Value::NONE), child.parent_dst_abs)
        });
        if parent_val.is_none() {
            // Root completion: nothing to resume.
            self.heap.release(ret_val, module);
            return None;
        }
        let pc = self.install_saved(parent_val);
        if parent_dst != PARENT_DST_NONE {
            self.stack[parent_dst as usize] = ret_val;
        } else {
            self.heap.release(ret_val, module);
        }
        // The returning fiber object drops the runtime's reference.
        self.heap.release(child_val, module);
        Some(pc)
    }

    /// Restore a saved fiber context as current; returns its resume pc.
    fn install_saved(&mut self, fiber_val: Value) -> u32 {
        let pc = Self::with_fiber(fiber_val, |f| {
            std::mem::swap(&mut f.stack, &mut self.stack);
            self.fp = f.stack_offset;
            self.try_stack = std::mem::take(&mut f.try_stack);
            self.throw_trace = std::mem::take(&mut f.throw_trace);
            self.panic_type = f.panic_type;
            self.panic_payload = f.panic_payload;
            f.status = FiberStatus::Active;
            f.pc_offset
        });
        self.cur_fiber = fiber_val;
        self.pc = pc;
        pc
    }
}
