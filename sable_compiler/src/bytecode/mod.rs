//! Bytecode definitions: opcodes, the code buffer, debug symbols, and
//! the disassembler.

mod buffer;
mod debug;
mod disasm;
mod opcode;

pub use buffer::CodeBuffer;
pub use debug::{DebugSym, DebugSymbolTable, END_LOCALS_NONE};
pub use disasm::{disassemble, disassemble_at};
pub use opcode::{inst_len, OpCode, NONE_DST, NUM_OPCODES};
