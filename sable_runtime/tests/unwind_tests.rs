//! Throw-unwinding tests: per-frame release exactly once, trace
//! recording, catch delivery, and the panic path.

use sable_compiler::{CodeBuffer, DebugSym, DebugSymbolTable, OpCode, RuntimeTables, NONE_DST};
use sable_core::{PanicType, Value};
use sable_runtime::{throw, Heap, ModuleEnv, RuntimeState, ThrowAction, TraceEntry};
use smallvec::smallvec;

/// Two frames' worth of release sequences plus debug symbols:
///
/// - the inner frame's debug symbol sits at `throw_pc` with one retained
///   temp (slot 6) and end-locals releasing slot 4;
/// - the outer frame's symbol sits at `call_pc` with end-locals
///   releasing slot 5.
struct UnwindModule {
    buf: CodeBuffer,
    debug: DebugSymbolTable,
    tables: RuntimeTables,
    throw_pc: u32,
    call_pc: u32,
    call_len: u8,
}

impl UnwindModule {
    fn new() -> Self {
        let mut buf = CodeBuffer::new();

        // Outer frame code region: a ten-byte call site at `call_pc`.
        let call_pc = buf.pc();
        for _ in 0..10 {
            buf.push_op(OpCode::End);
        }
        let outer_end_locals = buf.pc();
        buf.push_op1(OpCode::Release, 5);
        buf.push_op(OpCode::Ret0);

        // Inner frame code region with the throw site.
        let throw_pc = buf.pc();
        buf.push_op1(OpCode::Throw, 6);
        let inner_end_locals = buf.pc();
        buf.push_op1(OpCode::Release, 4);
        buf.push_op(OpCode::Ret0);

        let mut debug = DebugSymbolTable::new();
        debug.push(DebugSym {
            pc: call_pc,
            node: sable_core::NodeId(0),
            end_locals_pc: outer_end_locals,
            temp_releases: smallvec![],
        });
        debug.push(DebugSym {
            pc: throw_pc,
            node: sable_core::NodeId(1),
            end_locals_pc: inner_end_locals,
            temp_releases: smallvec![6],
        });

        Self {
            buf,
            debug,
            tables: RuntimeTables::new(),
            throw_pc,
            call_pc,
            call_len: 10,
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

/// Enter the inner frame from the outer (root) frame at the module's
/// call site.
fn enter_inner(state: &mut RuntimeState, module: &UnwindModule) {
    state.pc = module.call_pc;
    state.call_enter(8, 8, module.throw_pc, module.call_len);
}

#[test]
fn test_throw_caught_in_caller_releases_each_frame_once() {
    let module = UnwindModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();

    // Outer frame (fp 0) holds an rc local in slot 5 and a try region.
    let outer_local = state.heap.new_string("outer local");
    state.stack[5] = outer_local;
    state.push_try(900, 6);

    enter_inner(&mut state, &module);
    assert_eq!(state.fp, 8);

    // Inner frame holds an rc local (slot 4) and a retained temp
    // (slot 6).
    let inner_local = state.heap.new_string("inner local");
    let inner_temp = state.heap.new_string("inner temp");
    state.set_slot(4, inner_local);
    state.set_slot(6, inner_temp);

    let err = Value::error(3);
    let action = throw(&mut state, err, module.throw_pc, &env);
    assert_eq!(action, ThrowAction::Caught { pc: 900 });

    // The inner frame's temp and local released exactly once; the outer
    // frame keeps its local (it continues running).
    assert_eq!(Heap::refcount(outer_local), 1);
    // live: root fiber + outer_local.
    assert_eq!(state.heap.live(), 2);

    // The error landed in the catch slot of the outer frame.
    assert_eq!(state.fp, 0);
    assert_eq!(state.stack[6], err);
    assert_eq!(state.pc, 900);
    assert!(state.try_stack.is_empty());

    // The trace walks inner to outer.
    assert_eq!(
        state.throw_trace,
        vec![
            TraceEntry {
                pc: module.throw_pc,
                fp: 8
            },
            TraceEntry {
                pc: module.call_pc,
                fp: 0
            },
        ]
    );
}

/// A try frame in the throwing frame itself catches without popping
/// anything, releasing only the temps live at the throw point.
#[test]
fn test_throw_caught_in_same_frame() {
    let module = UnwindModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();

    enter_inner(&mut state, &module);
    state.push_try(950, 7);

    let inner_local = state.heap.new_string("stays");
    let inner_temp = state.heap.new_string("goes");
    state.set_slot(4, inner_local);
    state.set_slot(6, inner_temp);

    let err = Value::error(9);
    let action = throw(&mut state, err, module.throw_pc, &env);
    assert_eq!(action, ThrowAction::Caught { pc: 950 });

    // Only the temp released; the local survives because the frame does.
    assert_eq!(Heap::refcount(inner_local), 1);
    assert_eq!(state.fp, 8);
    assert_eq!(state.get_slot(7), err);
}

/// Without a try frame the fiber enters a panic state carrying the
/// error as payload.
#[test]
fn test_uncaught_throw_panics() {
    let module = UnwindModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();

    enter_inner(&mut state, &module);
    let inner_local = state.heap.new_string("inner local");
    state.set_slot(4, inner_local);

    let err = Value::error(1);
    let action = throw(&mut state, err, module.throw_pc, &env);
    assert_eq!(action, ThrowAction::Panicked);
    assert_eq!(state.panic_type, PanicType::UncaughtError);
    assert_eq!(state.panic_payload, err.raw());

    // Every frame released its locals on the way out.
    assert_eq!(state.heap.live(), 1); // root fiber only
    // Two traversed frames in the trace.
    assert_eq!(state.throw_trace.len(), 2);
}

/// A drop-destination catch releases the error instead of storing it.
#[test]
fn test_catch_without_destination_releases_error() {
    let module = UnwindModule::new();
    let env = module.env();
    let mut state = RuntimeState::new();
    state.push_try(900, NONE_DST);

    enter_inner(&mut state, &module);
    let err = state.heap.new_string("heap error payload");
    let live_before = state.heap.live();

    let action = throw(&mut state, err, module.throw_pc, &env);
    assert_eq!(action, ThrowAction::Caught { pc: 900 });
    assert_eq!(state.heap.live(), live_before - 1);
}
