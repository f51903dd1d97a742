//! Bytecode operation definitions.
//!
//! Instructions are variable-width: the first byte is the opcode and the
//! operand layout is fixed per opcode. Variable-length ops store a count
//! byte at a fixed position followed by that many extra operand bytes.
//! All 16-bit fields (constant indices, symbol ids, jump displacements,
//! absolute pcs) are stored little-endian.

use std::fmt;

/// Slot operand meaning "drop the value instead of storing it".
pub const NONE_DST: u8 = 255;

/// A bytecode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum OpCode {
    /// `[idx:u16, dst]`: load a constant-pool value.
    ConstOp = 0,
    /// `[src, dst]`: plain copy, no refcount traffic.
    Copy,
    /// `[src, dst]`: copy and retain the source.
    CopyRetainSrc,
    /// `[src, dst]`: release the old dst, then copy.
    CopyReleaseDst,
    /// `[src, dst]`: retain source, release old dst, copy.
    CopyRetainRelease,
    /// `[slot]`: increment a heap value's refcount.
    Retain,
    /// `[slot]`: decrement, freeing at zero. No-op on non-heap values.
    Release,
    /// `[slot]`: box a local in place for capture.
    BoxOp,
    /// `[box, dst]`: read through a box (borrowed).
    BoxValue,
    /// `[box, dst]`: read through a box, retaining the value.
    BoxValueRetain,
    /// `[box, src]`: write through a box.
    SetBoxValue,
    /// `[box, src]`: write through a box, releasing the old value.
    SetBoxValueRelease,

    /// `[left, right, dst]`: polymorphic add; may throw.
    Add,
    /// `[left, right, dst]`: integer add fast path.
    AddInt,
    /// `[left, right, dst]`: polymorphic subtract.
    Minus,
    /// `[left, right, dst]`: integer subtract fast path.
    MinusInt,
    /// `[left, right, dst]`
    Mul,
    /// `[left, right, dst]`
    Div,
    /// `[left, right, dst]`
    Mod,
    /// `[left, right, dst]`
    Pow,
    /// `[left, right, dst]`
    BitAnd,
    /// `[left, right, dst]`
    BitOr,
    /// `[left, right, dst]`
    BitXor,
    /// `[left, right, dst]`
    Shl,
    /// `[left, right, dst]`
    Shr,
    /// `[left, right, dst]`
    Lt,
    /// `[left, right, dst]`
    Le,
    /// `[left, right, dst]`
    Gt,
    /// `[left, right, dst]`
    Ge,
    /// `[left, right, dst]`
    Eq,
    /// `[left, right, dst]`
    Ne,
    /// `[src, dst]`: boolean not.
    Not,
    /// `[src, dst]`: numeric negate.
    Neg,
    /// `[dst]`
    TrueOp,
    /// `[dst]`
    FalseOp,
    /// `[dst]`
    NoneOp,

    /// `[cond, off:i16]`: jump if truthy.
    JumpCond,
    /// `[cond, off:i16]`: jump if falsy.
    JumpNotCond,
    /// `[src, off:i16]`: jump if the value is not `none`.
    JumpNotNone,
    /// `[off:i16]`: unconditional jump.
    Jump,

    /// `[callStart, numArgs, retFlag, sym:u16]`: call a function family
    /// whose overload is chosen at runtime by the argument types.
    Call,
    /// `[callStart, numArgs]`: function-value call discarding the result.
    Call0,
    /// `[callStart, numArgs]`: function-value call keeping the result.
    Call1,
    /// `[callStart, numArgs, retFlag, funcSym:u16, sig:u16, numLocals, _]`:
    /// call a static function symbol. Ten bytes.
    CallSym,
    /// `[callStart, numArgs, retFlag, methodGroup:u16, sig:u16]`: method
    /// dispatch on the receiver's runtime type.
    CallObjSym,

    /// `[sym:u16, dst]`: read a static variable.
    StaticVar,
    /// `[sym:u16, src]`: write a static variable.
    SetStaticVar,
    /// `[funcSym:u16, dst]`: materialize a function value.
    StaticFunc,

    /// `[recv, dst, fieldSym:u16]`: read a field (borrowed).
    Field,
    /// `[recv, dst, fieldSym:u16]`: read a field, retaining.
    FieldRetain,
    /// `[recv, fieldSym:u16, src]`: write a field.
    SetField,
    /// `[recv, fieldSym:u16, src]`: write a field, releasing the old
    /// value.
    SetFieldRelease,

    /// `[recv, idx, dst]`
    Index,
    /// `[recv, idx, dst]`: index counted from the end.
    ReverseIndex,
    /// `[recv, idx, src]`: write an element, releasing the old one.
    SetIndexRelease,
    /// `[recv, start, end, dst]`
    Slice,

    /// `[argStart, numElems, dst]`: build a list from contiguous slots.
    List,
    /// `[argStart, numEntries, dst, (keyConst:u16)*n]`: build a map.
    Map,
    /// `[dst]`: build an empty map.
    MapEmpty,
    /// `[type:u16, argStart, numFields, dst]`: construct an object.
    Object,
    /// `[type:u16, argStart, numFields, dst]`: construction fast path
    /// for objects with at most four fields.
    ObjectSmall,

    /// `[funcPc:u16, numParams, numLocals, sig:u16, dst]`: function
    /// value with no captures.
    Lambda,
    /// `[funcPc:u16, numParams, numLocals, sig:u16, numCaptured, dst,
    /// (capturedSlot)*n]`: closure carrying captured boxes.
    Closure,

    /// `[argStart, numExprs, dst, (strConst:u16)*(numExprs+1)]`:
    /// interpolate literal parts with stringified expression slots.
    StringTemplate,

    /// `[expr, numConds, (cond, off:i16)*n, elseOff:i16]`: dispatch on
    /// the first matching condition.
    Match,

    /// `[start, end, step, counter, userVar, off:i16]`: enter a range
    /// loop; jumps to the bottom `ForRange` on entry.
    ForRangeInit,
    /// `[counter, step, end, userVar, off:i16]`: advance and loop back.
    ForRange,

    /// `[src, dst, catchPc:u16]`: push a try frame.
    TryValue,
    /// `[off:i16]`: pop the try frame on normal exit and skip the catch
    /// body.
    PopTry,
    /// `[src]`: throw a value.
    Throw,

    /// `[argStart, numArgs, funcSym:u16, _, dst]`: create a fiber
    /// running a static function; the entry pc and frame size come from
    /// the function table.
    Coinit,
    /// `[off:i16]`: suspend; the offset reaches the block-end release
    /// sequence for teardown unwinding.
    Coyield,
    /// `[fiber, dst]`: transfer control to a fiber.
    Coresume,
    /// `[]`: fiber completion.
    Coreturn,

    /// `[]`: return without a computed value.
    Ret0,
    /// `[]`: return the value in slot 0.
    Ret1,
    /// `[]`: end of chunk.
    End,

    /// `[count, (slot)*n]`: zero-initialize locals on frame entry.
    SetInitN,
    /// `[enumType:u16, member, dst]`: load an enum member value.
    Tag,
    /// `[sym:u16, dst]`: load a symbol literal.
    TagLiteral,
}

/// One past the highest opcode value.
pub const NUM_OPCODES: u8 = OpCode::TagLiteral as u8 + 1;

impl OpCode {
    /// Decode an opcode byte.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<OpCode> {
        if byte < NUM_OPCODES {
            // Safety: repr(u8) with dense discriminants 0..NUM_OPCODES.
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }

    /// Fixed instruction length in bytes including the opcode byte, or
    /// `None` for variable-length ops (see [`inst_len`]).
    #[must_use]
    pub const fn fixed_len(self) -> Option<usize> {
        Some(match self {
            Self::ConstOp => 4,
            Self::Copy | Self::CopyRetainSrc | Self::CopyReleaseDst | Self::CopyRetainRelease => 3,
            Self::Retain | Self::Release | Self::BoxOp => 2,
            Self::BoxValue | Self::BoxValueRetain | Self::SetBoxValue | Self::SetBoxValueRelease => {
                3
            }
            Self::Add
            | Self::AddInt
            | Self::Minus
            | Self::MinusInt
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Pow
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::Shl
            | Self::Shr
            | Self::Lt
            | Self::Le
            | Self::Gt
            | Self::Ge
            | Self::Eq
            | Self::Ne => 4,
            Self::Not | Self::Neg => 3,
            Self::TrueOp | Self::FalseOp | Self::NoneOp => 2,
            Self::JumpCond | Self::JumpNotCond | Self::JumpNotNone => 4,
            Self::Jump => 3,
            Self::Call => 6,
            Self::Call0 | Self::Call1 => 3,
            Self::CallSym => 10,
            Self::CallObjSym => 8,
            Self::StaticVar | Self::SetStaticVar | Self::StaticFunc => 4,
            Self::Field | Self::FieldRetain | Self::SetField | Self::SetFieldRelease => 5,
            Self::Index | Self::ReverseIndex | Self::SetIndexRelease => 4,
            Self::Slice => 5,
            Self::List => 4,
            Self::Map => return None,
            Self::MapEmpty => 2,
            Self::Object | Self::ObjectSmall => 6,
            Self::Lambda => 8,
            Self::Closure => return None,
            Self::StringTemplate => return None,
            Self::Match => return None,
            Self::ForRangeInit => 8,
            Self::ForRange => 7,
            Self::TryValue => 5,
            Self::PopTry => 3,
            Self::Throw => 2,
            Self::Coinit => 7,
            Self::Coyield => 3,
            Self::Coresume => 3,
            Self::Coreturn | Self::Ret0 | Self::Ret1 | Self::End => 1,
            Self::SetInitN => return None,
            Self::Tag => 5,
            Self::TagLiteral => 4,
        })
    }

    /// Diagnostic name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ConstOp => "const",
            Self::Copy => "copy",
            Self::CopyRetainSrc => "copyRetainSrc",
            Self::CopyReleaseDst => "copyReleaseDst",
            Self::CopyRetainRelease => "copyRetainRelease",
            Self::Retain => "retain",
            Self::Release => "release",
            Self::BoxOp => "box",
            Self::BoxValue => "boxValue",
            Self::BoxValueRetain => "boxValueRetain",
            Self::SetBoxValue => "setBoxValue",
            Self::SetBoxValueRelease => "setBoxValueRelease",
            Self::Add => "add",
            Self::AddInt => "addInt",
            Self::Minus => "minus",
            Self::MinusInt => "minusInt",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Pow => "pow",
            Self::BitAnd => "bitAnd",
            Self::BitOr => "bitOr",
            Self::BitXor => "bitXor",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Not => "not",
            Self::Neg => "neg",
            Self::TrueOp => "true",
            Self::FalseOp => "false",
            Self::NoneOp => "none",
            Self::JumpCond => "jumpCond",
            Self::JumpNotCond => "jumpNotCond",
            Self::JumpNotNone => "jumpNotNone",
            Self::Jump => "jump",
            Self::Call => "call",
            Self::Call0 => "call0",
            Self::Call1 => "call1",
            Self::CallSym => "callSym",
            Self::CallObjSym => "callObjSym",
            Self::StaticVar => "staticVar",
            Self::SetStaticVar => "setStaticVar",
            Self::StaticFunc => "staticFunc",
            Self::Field => "field",
            Self::FieldRetain => "fieldRetain",
            Self::SetField => "setField",
            Self::SetFieldRelease => "setFieldRelease",
            Self::Index => "index",
            Self::ReverseIndex => "reverseIndex",
            Self::SetIndexRelease => "setIndexRelease",
            Self::Slice => "slice",
            Self::List => "list",
            Self::Map => "map",
            Self::MapEmpty => "mapEmpty",
            Self::Object => "object",
            Self::ObjectSmall => "objectSmall",
            Self::Lambda => "lambda",
            Self::Closure => "closure",
            Self::StringTemplate => "stringTemplate",
            Self::Match => "match",
            Self::ForRangeInit => "forRangeInit",
            Self::ForRange => "forRange",
            Self::TryValue => "tryValue",
            Self::PopTry => "popTry",
            Self::Throw => "throw",
            Self::Coinit => "coinit",
            Self::Coyield => "coyield",
            Self::Coresume => "coresume",
            Self::Coreturn => "coreturn",
            Self::Ret0 => "ret0",
            Self::Ret1 => "ret1",
            Self::End => "end",
            Self::SetInitN => "setInitN",
            Self::Tag => "tag",
            Self::TagLiteral => "tagLiteral",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Length of the instruction starting at `pc`, handling variable-length
/// ops by reading their count byte.
///
/// # Panics
/// Panics on an invalid opcode byte.
#[must_use]
pub fn inst_len(code: &[u8], pc: usize) -> usize {
    let op = OpCode::from_u8(code[pc]).expect("invalid opcode");
    if let Some(len) = op.fixed_len() {
        return len;
    }
    match op {
        // [op, argStart, n, dst, (u16)*n]
        OpCode::Map => 4 + 2 * code[pc + 2] as usize,
        // [op, pc:u16, numParams, numLocals, sig:u16, n, dst, (slot)*n]
        OpCode::Closure => 9 + code[pc + 7] as usize,
        // [op, argStart, n, dst, (u16)*(n+1)]
        OpCode::StringTemplate => 4 + 2 * (code[pc + 2] as usize + 1),
        // [op, expr, n, (cond, off:i16)*n, elseOff:i16]
        OpCode::Match => 3 + 3 * code[pc + 2] as usize + 2,
        // [op, n, (slot)*n]
        OpCode::SetInitN => 2 + code[pc + 1] as usize,
        _ => unreachable!("fixed_len covered {op}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_opcodes() {
        for byte in 0..NUM_OPCODES {
            let op = OpCode::from_u8(byte).expect("dense opcode space");
            assert_eq!(op as u8, byte);
            assert!(!op.name().is_empty());
        }
        assert!(OpCode::from_u8(NUM_OPCODES).is_none());
        assert!(OpCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn test_call_sym_is_ten_bytes() {
        assert_eq!(OpCode::CallSym.fixed_len(), Some(10));
    }

    #[test]
    fn test_coyield_is_three_bytes() {
        // Resuming a yielded fiber skips exactly this op.
        assert_eq!(OpCode::Coyield.fixed_len(), Some(3));
    }

    #[test]
    fn test_variable_length_ops() {
        assert_eq!(OpCode::Map.fixed_len(), None);

        // map with 2 entries: 4 + 2*2
        let code = [OpCode::Map as u8, 4, 2, 9, 0, 0, 1, 0];
        assert_eq!(inst_len(&code, 0), 8);

        // template with 1 expr: 4 + 2*2
        let code = [OpCode::StringTemplate as u8, 4, 1, 9, 0, 0, 1, 0];
        assert_eq!(inst_len(&code, 0), 8);

        // closure capturing 2 slots: 9 + 2
        let code = [OpCode::Closure as u8, 0, 0, 1, 6, 0, 0, 2, 9, 4, 5];
        assert_eq!(inst_len(&code, 0), 11);

        // match with 2 conds: 3 + 6 + 2
        let code = [OpCode::Match as u8, 4, 2, 5, 0, 0, 6, 0, 0, 0, 0];
        assert_eq!(inst_len(&code, 0), 11);

        // setInitN with 3 slots: 2 + 3
        let code = [OpCode::SetInitN as u8, 3, 4, 5, 6];
        assert_eq!(inst_len(&code, 0), 5);
    }
}
