//! Bytecode disassembler.
//!
//! Renders the variable-width byte stream one instruction per line, used
//! by tests and debugging dumps. The output is not a stable format.

use super::buffer::CodeBuffer;
use super::opcode::{inst_len, OpCode};
use std::fmt::Write as _;

/// Disassemble an entire buffer.
#[must_use]
pub fn disassemble(buf: &CodeBuffer) -> String {
    let mut out = String::new();
    let mut pc = 0usize;
    while pc < buf.ops.len() {
        let len = disassemble_at(buf, pc, &mut out);
        out.push('\n');
        pc += len;
    }
    out
}

/// Disassemble the instruction at `pc` into `out`, returning its length.
pub fn disassemble_at(buf: &CodeBuffer, pc: usize, out: &mut String) -> usize {
    let Some(op) = OpCode::from_u8(buf.ops[pc]) else {
        let _ = write!(out, "{pc:06} ??? 0x{:02x}", buf.ops[pc]);
        return 1;
    };
    let len = inst_len(&buf.ops, pc);
    let _ = write!(out, "{pc:06} {}", op.name());

    match op {
        OpCode::ConstOp => {
            let idx = buf.read_u16(pc + 1);
            let _ = write!(out, " [{idx}], %{}", buf.ops[pc + 3]);
        }
        OpCode::Jump | OpCode::PopTry | OpCode::Coyield => {
            let off = buf.read_u16(pc + 1) as i16;
            let _ = write!(out, " -> {}", pc as i64 + i64::from(off));
        }
        OpCode::JumpCond | OpCode::JumpNotCond | OpCode::JumpNotNone => {
            let off = buf.read_u16(pc + 2) as i16;
            let _ = write!(out, " %{}, -> {}", buf.ops[pc + 1], pc as i64 + i64::from(off));
        }
        OpCode::CallSym => {
            let _ = write!(
                out,
                " %{}, n={}, ret={}, func#{}, sig#{}",
                buf.ops[pc + 1],
                buf.ops[pc + 2],
                buf.ops[pc + 3],
                buf.read_u16(pc + 4),
                buf.read_u16(pc + 6),
            );
        }
        OpCode::CallObjSym => {
            let _ = write!(
                out,
                " %{}, n={}, ret={}, mg#{}, sig#{}",
                buf.ops[pc + 1],
                buf.ops[pc + 2],
                buf.ops[pc + 3],
                buf.read_u16(pc + 4),
                buf.read_u16(pc + 6),
            );
        }
        OpCode::StaticVar | OpCode::SetStaticVar | OpCode::StaticFunc | OpCode::TagLiteral => {
            let _ = write!(out, " #{}, %{}", buf.read_u16(pc + 1), buf.ops[pc + 3]);
        }
        OpCode::Field | OpCode::FieldRetain => {
            let _ = write!(
                out,
                " %{}, %{}, field#{}",
                buf.ops[pc + 1],
                buf.ops[pc + 2],
                buf.read_u16(pc + 3),
            );
        }
        _ => {
            // Generic rendering: raw operand bytes.
            for b in &buf.ops[pc + 1..pc + len] {
                let _ = write!(out, " {b}");
            }
        }
    }
    len
}
