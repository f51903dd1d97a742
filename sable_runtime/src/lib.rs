//! # Sable Runtime
//!
//! The fiber runtime model the emitted bytecode targets: the ARC heap,
//! the per-fiber call stack with its frame-pointer chain, try frames,
//! cooperative fiber switching, and the unwinders for thrown errors and
//! fiber abandonment. The instruction-dispatch loop itself is an
//! external collaborator; it drives these operations and owns opcode
//! decoding.
//!
//! Scheduling is single-threaded cooperative: at most one fiber executes
//! at any instant, and control transfers only at explicit
//! `coresume`/`coyield` edges or fiber completion.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod fiber;
pub mod heap;
pub mod module;
pub mod state;
pub mod unwind;

pub use fiber::{Fiber, FiberStatus, ResumeAction};
pub use heap::{Heap, HeapCell, HeapKind};
pub use module::ModuleEnv;
pub use state::{
    RuntimeState, TraceEntry, TryFrame, FRAME_RET_FP, FRAME_RET_INFO, FRAME_RET_PC, FRAME_RET_VAL,
    MIN_STACK, PARENT_DST_NONE, RAW_NULL,
};
pub use unwind::{release_fiber_stack, run_block_end_release_ops, run_temp_release_ops, throw, ThrowAction};
