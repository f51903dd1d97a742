//! The three unwinders.
//!
//! Normal return runs its releases inline in the emitted code. The two
//! remaining exit paths, thrown errors and fiber abandonment, share one
//! per-frame work unit: release the retained temps recorded by the
//! frame's debug symbol, then run the block-end `release` sequence at
//! the frame's end-locals pc. Each traversed frame receives that unit
//! exactly once.

use crate::fiber::{Fiber, FiberStatus};
use crate::heap::Heap;
use crate::module::ModuleEnv;
use crate::state::{RuntimeState, TraceEntry, FRAME_RET_FP, FRAME_RET_INFO, FRAME_RET_PC, RAW_NULL};
use sable_compiler::{DebugSym, OpCode, END_LOCALS_NONE, NONE_DST};
use sable_core::{PanicType, Value};

/// Outcome of a throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowAction {
    /// A try frame caught; continue dispatch at the catch pc.
    Caught {
        /// Pc of the catch body.
        pc: u32,
    },
    /// No try frame caught; the fiber entered a panic state and control
    /// returns to its host.
    Panicked,
}

/// Release the retained temps a debug symbol recorded for its pc.
pub fn run_temp_release_ops(
    heap: &mut Heap,
    stack: &mut [Value],
    fp: u32,
    sym: &DebugSym,
    module: &ModuleEnv<'_>,
) {
    for &slot in &sym.temp_releases {
        let idx = (fp + u32::from(slot)) as usize;
        heap.release(stack[idx], module);
        stack[idx] = Value::NONE;
    }
}

/// Run the `release` op run the emitter placed at a block's end.
pub fn run_block_end_release_ops(
    heap: &mut Heap,
    stack: &mut [Value],
    fp: u32,
    end_locals_pc: u32,
    module: &ModuleEnv<'_>,
) {
    if end_locals_pc == END_LOCALS_NONE {
        return;
    }
    let mut pc = end_locals_pc as usize;
    while pc < module.ops.len() && module.ops[pc] == OpCode::Release as u8 {
        let slot = module.ops[pc + 1];
        let idx = (fp + u32::from(slot)) as usize;
        heap.release(stack[idx], module);
        stack[idx] = Value::NONE;
        pc += 2;
    }
}

/// The shared per-frame release unit.
fn release_frame(
    heap: &mut Heap,
    stack: &mut [Value],
    fp: u32,
    frame_pc: u32,
    module: &ModuleEnv<'_>,
) {
    if let Some(sym) = module.debug.find(frame_pc) {
        let sym = sym.clone();
        run_temp_release_ops(heap, stack, fp, &sym, module);
        run_block_end_release_ops(heap, stack, fp, sym.end_locals_pc, module);
    }
}

/// Throw `err` from `throw_pc`.
///
/// Frames pop until the frame pointer equals the topmost try frame's
/// entry pointer; each intermediate frame runs the per-frame release
/// unit and appends a `(pc, fp)` trace entry. The target frame releases
/// only the temps live at the propagation point, receives the error in
/// its catch slot, and control jumps to the catch pc. With no try frame
/// left, the fiber enters a panic state.
pub fn throw(
    state: &mut RuntimeState,
    err: Value,
    throw_pc: u32,
    module: &ModuleEnv<'_>,
) -> ThrowAction {
    state.throw_trace.clear();
    state.throw_trace.push(TraceEntry {
        pc: throw_pc,
        fp: state.fp,
    });
    let mut frame_pc = throw_pc;

    loop {
        if let Some(&frame) = state.try_stack.last() {
            if frame.fp_at_entry == state.fp {
                state.try_stack.pop();
                // Only the temps live at the propagation point; the
                // frame itself keeps running.
                if let Some(sym) = module.debug.find(frame_pc) {
                    let sym = sym.clone();
                    run_temp_release_ops(&mut state.heap, &mut state.stack, state.fp, &sym, module);
                }
                if frame.catch_err_dst == NONE_DST {
                    state.heap.release(err, module);
                } else {
                    let idx = (state.fp + u32::from(frame.catch_err_dst)) as usize;
                    state.stack[idx] = err;
                }
                state.pc = frame.catch_pc;
                return ThrowAction::Caught { pc: frame.catch_pc };
            }
        }

        release_frame(&mut state.heap, &mut state.stack, state.fp, frame_pc, module);

        let ret_raw = state.stack[(state.fp + FRAME_RET_PC) as usize].raw();
        if ret_raw == RAW_NULL {
            // The fiber's root frame: no catcher anywhere.
            state.panic_type = PanicType::UncaughtError;
            state.panic_payload = err.raw();
            return ThrowAction::Panicked;
        }
        let call_len = state.stack[(state.fp + FRAME_RET_INFO) as usize].raw() as u32;
        let caller_pc = ret_raw as u32 - call_len;
        state.fp = state.stack[(state.fp + FRAME_RET_FP) as usize].raw() as u32;
        frame_pc = caller_pc;
        state.throw_trace.push(TraceEntry {
            pc: caller_pc,
            fp: state.fp,
        });
    }
}

/// Tear down an abandoned fiber (refcount reached zero while alive).
///
/// A fiber blocked on `coyield` unwinds from the saved pc, running the
/// end-locals releases of every frame; one blocked right after `coinit`
/// releases its argument slots only. The stack buffer frees when the
/// fiber drops at the end.
pub fn release_fiber_stack(heap: &mut Heap, module: &ModuleEnv<'_>, mut fiber: Fiber) {
    match fiber.status {
        FiberStatus::Done | FiberStatus::Active => {}
        FiberStatus::Init => {
            for i in 0..fiber.num_args {
                let idx = 5 + i as usize;
                heap.release(fiber.stack[idx], module);
                fiber.stack[idx] = Value::NONE;
            }
        }
        FiberStatus::Yielded => {
            let mut fp = fiber.stack_offset;
            // The coyield op carries the displacement to its frame's
            // end-locals sequence.
            let yield_pc = fiber.pc_offset as usize;
            debug_assert_eq!(module.ops[yield_pc], OpCode::Coyield as u8);
            let off = i16::from_le_bytes([module.ops[yield_pc + 1], module.ops[yield_pc + 2]]);
            let mut end_pc = (fiber.pc_offset as i64 + i64::from(off)) as u32;
            let mut frame_pc = fiber.pc_offset;

            loop {
                if let Some(sym) = module.debug.find(frame_pc) {
                    let sym = sym.clone();
                    run_temp_release_ops(heap, &mut fiber.stack, fp, &sym, module);
                }
                run_block_end_release_ops(heap, &mut fiber.stack, fp, end_pc, module);

                let ret_raw = fiber.stack[(fp + FRAME_RET_PC) as usize].raw();
                if ret_raw == RAW_NULL {
                    break;
                }
                let call_len = fiber.stack[(fp + FRAME_RET_INFO) as usize].raw() as u32;
                let caller_pc = ret_raw as u32 - call_len;
                fp = fiber.stack[(fp + FRAME_RET_FP) as usize].raw() as u32;
                frame_pc = caller_pc;
                end_pc = module
                    .debug
                    .find(caller_pc)
                    .map_or(END_LOCALS_NONE, |s| s.end_locals_pc);
            }
        }
    }
    // Frames below may still reference the fiber that resumed this one.
    if fiber.prev_fiber.is_heap() {
        heap.release(fiber.prev_fiber, module);
    }
}
