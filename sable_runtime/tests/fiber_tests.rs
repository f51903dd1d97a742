//! Fiber life-cycle tests: creation, resume/yield edges, completion,
//! and abandonment teardown.

use sable_compiler::{CodeBuffer, DebugSymbolTable, OpCode, RuntimeTables, NONE_DST};
use sable_core::Value;
use sable_runtime::{
    FiberStatus, Heap, HeapKind, ModuleEnv, ResumeAction, RuntimeState, MIN_STACK,
};

/// A module whose code consists of one `coyield` whose displacement
/// reaches a single `release %4` end-locals sequence.
struct YieldModule {
    buf: CodeBuffer,
    debug: DebugSymbolTable,
    tables: RuntimeTables,
    yield_pc: u32,
}

impl YieldModule {
    fn new() -> Self {
        let mut buf = CodeBuffer::new();
        let yield_pc = buf.pc();
        buf.push_op(OpCode::Coyield);
        buf.push_u16(0);
        let end_locals = buf.pc();
        buf.push_op1(OpCode::Release, 4);
        buf.push_op(OpCode::Ret0);
        buf.patch_jump(yield_pc, end_locals);
        Self {
            buf,
            debug: DebugSymbolTable::new(),
            tables: RuntimeTables::new(),
            yield_pc,
        }
    }

    fn env(&self) -> ModuleEnv<'_> {
        ModuleEnv {
            ops: &self.buf.ops,
            debug: &self.debug,
            tables: &self.tables,
        }
    }
}

fn fiber_status(v: Value) -> FiberStatus {
    let HeapKind::Fiber(cell) = &Heap::cell(v).kind else {
        panic!("not a fiber");
    };
    cell.borrow().status
}

#[test]
fn test_coinit_creates_fiber_at_refcount_one() {
    let mut state = RuntimeState::new();
    let fiber = state.coinit(0, &[]);
    assert_eq!(Heap::refcount(fiber), 1);
    assert_eq!(fiber_status(fiber), FiberStatus::Init);

    let HeapKind::Fiber(cell) = &Heap::cell(fiber).kind else {
        unreachable!();
    };
    let f = cell.borrow();
    assert!(f.is_unresumed());
    assert_eq!(f.stack.len(), MIN_STACK);
    assert_eq!(f.stack_offset, 1);
}

#[test]
fn test_coinit_copies_args_at_slot_five() {
    let mut state = RuntimeState::new();
    let args = [Value::int(7).unwrap(), Value::int(8).unwrap()];
    let fiber = state.coinit(40, &args);
    let HeapKind::Fiber(cell) = &Heap::cell(fiber).kind else {
        unreachable!();
    };
    let f = cell.borrow();
    assert_eq!(f.stack[5], args[0]);
    assert_eq!(f.stack[6], args[1]);
    assert_eq!(f.num_args, 2);
    assert_eq!(f.initial_pc, 40);
}

#[test]
fn test_resume_yield_resume_round_trip() {
    let module = YieldModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();
    let fiber = state.coinit(0, &[]);

    // First resume enters at the initial pc.
    let action = state.coresume(fiber, 6, 100);
    assert_eq!(action, ResumeAction::Switched { pc: 0 });
    assert_eq!(state.cur_fiber, fiber);
    assert_eq!(state.fp, 1);

    // The fiber reaches its coyield; control returns to the root just
    // past the coresume, with `none` in the destination slot.
    let resume_pc = state.coyield(module.yield_pc, &env);
    assert_eq!(resume_pc, 103);
    assert_eq!(fiber_status(fiber), FiberStatus::Yielded);
    assert!(state.stack[6].is_none());

    // Second resume continues past the coyield op.
    let action = state.coresume(fiber, 6, 120);
    assert_eq!(
        action,
        ResumeAction::Switched {
            pc: module.yield_pc + 3
        }
    );

    let resume_pc = state.coyield(module.yield_pc, &env);
    assert_eq!(resume_pc, 123);
}

/// Switching alone changes no refcounts beyond the fiber handle itself.
#[test]
fn test_fiber_switch_preserves_heap_refcounts() {
    let module = YieldModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();

    let shared = state.heap.new_string("payload");
    let fiber = state.coinit(0, &[]);
    let before = Heap::refcount(shared);

    state.coresume(fiber, NONE_DST, 100);
    state.coyield(module.yield_pc, &env);
    state.coresume(fiber, NONE_DST, 200);
    state.coyield(module.yield_pc, &env);

    assert_eq!(Heap::refcount(shared), before);
    assert_eq!(Heap::refcount(fiber), 1);
}

#[test]
fn test_completion_deposits_return_value() {
    let module = YieldModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();
    let fiber = state.coinit(0, &[]);
    state.heap.retain(fiber); // our handle, beyond the runtime's

    state.coresume(fiber, 9, 100);
    let ret = Value::int(42).unwrap();
    let resume_pc = state.coreturn(ret, &env).expect("root resumes");
    assert_eq!(resume_pc, 103);
    assert_eq!(state.stack[9], ret);
    assert_eq!(fiber_status(fiber), FiberStatus::Done);

    // A completed fiber does not resume again.
    let action = state.coresume(fiber, 9, 200);
    assert_eq!(action, ResumeAction::NotSwitched);
    assert!(state.stack[9].is_none());

    state.heap.release(fiber, &env);
}

/// Abandoning a yielded fiber unwinds its frames: the end-locals
/// sequence reached through the coyield op's displacement runs, so live
/// locals release.
#[test]
fn test_abandoned_yielded_fiber_releases_locals() {
    let module = YieldModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();
    let fiber = state.coinit(0, &[]);

    state.coresume(fiber, NONE_DST, 100);
    // The fiber owns a heap local in slot 4 (frame-relative; fp is 1).
    let local = state.heap.new_string("held by the fiber");
    state.stack[1 + 4] = local;
    state.coyield(module.yield_pc, &env);

    let live_before = state.heap.live();
    state.heap.release(fiber, &env);
    // Both the fiber and its local are gone.
    assert_eq!(state.heap.live(), live_before - 2);
}

/// A fiber abandoned before its first resume releases its argument
/// slots only.
#[test]
fn test_abandoned_unresumed_fiber_releases_args() {
    let module = YieldModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();

    let arg = state.heap.new_string("arg");
    let fiber = state.coinit(0, &[arg]);
    assert_eq!(state.heap.live(), 3); // root fiber + arg + fiber

    state.heap.release(fiber, &env);
    assert_eq!(state.heap.live(), 1); // only the root fiber remains
}

#[test]
fn test_resume_of_non_fiber_writes_none() {
    let mut state = RuntimeState::new();
    state.stack[6] = Value::int(1).unwrap();
    let action = state.coresume(Value::int(5).unwrap(), 6, 0);
    assert_eq!(action, ResumeAction::NotSwitched);
    assert!(state.stack[6].is_none());
}

#[test]
fn test_yield_from_root_continues_past_op() {
    let module = YieldModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();
    let pc = state.coyield(module.yield_pc, &env);
    assert_eq!(pc, module.yield_pc + 3);
}
