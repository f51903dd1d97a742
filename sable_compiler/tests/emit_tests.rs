//! Emission tests: arithmetic specialization, static-initializer
//! ordering, composite construction boundaries, and determinism.

mod common;

use common::{decode_ops, find_op, Builder};
use sable_compiler::{disassemble, OpCode};
use sable_core::{BinaryOp, NodeHead, NodeId};

/// `var a = 1; var b = 2; print(a + b)`: both operands statically
/// integer, so the add specializes and carries no refcount traffic.
#[test]
fn test_arithmetic_specialization() {
    let mut b = Builder::new();
    let print = b.host_func("print", 1, None);
    let one = b.int(1);
    let a = b.var_decl("a", one);
    let two = b.int(2);
    let bb = b.var_decl("b", two);
    let lhs = b.ident("a");
    let rhs = b.ident("b");
    let add = b.bin(BinaryOp::Add, lhs, rhs);
    let call = b.call("print", &[add]);
    let stmt = b.expr_stmt(call);

    let (_, chunk) = b.compile(&[print, a, bb, stmt]).unwrap();

    assert_eq!(find_op(&chunk, OpCode::AddInt).len(), 1);
    assert!(find_op(&chunk, OpCode::Add).is_empty());
    // Integer adds produce no retains or releases.
    assert!(find_op(&chunk, OpCode::Retain).is_empty());
}

/// `var a = 1; var b = foo(); print(a + b)` with `foo` returning
/// `dynamic`: the add lowers generically and records a debug symbol so
/// a runtime type error has a source location.
#[test]
fn test_dynamic_operand_falls_back_to_generic_add() {
    let mut b = Builder::new();
    let print = b.host_func("print", 1, None);
    let foo = b.host_func("foo", 0, Some("dynamic"));
    let one = b.int(1);
    let a = b.var_decl("a", one);
    let foo_call = b.call("foo", &[]);
    let bb = b.var_decl("b", foo_call);
    let lhs = b.ident("a");
    let rhs = b.ident("b");
    let add = b.bin(BinaryOp::Add, lhs, rhs);
    let call = b.call("print", &[add]);
    let stmt = b.expr_stmt(call);

    let (_, chunk) = b.compile(&[print, foo, a, bb, stmt]).unwrap();

    let adds = find_op(&chunk, OpCode::Add);
    assert_eq!(adds.len(), 1);
    assert!(find_op(&chunk, OpCode::AddInt).is_empty());
    // A debug symbol sits exactly at the generic add.
    assert!(chunk.debug.find_exact(adds[0] as u32).is_some());
}

/// `var a = b + 1; var b = 2`: the initializer sequence respects the
/// dependency despite source order.
#[test]
fn test_static_initializer_dependency_order() {
    let mut b = Builder::new();
    let rhs = b.ident("b");
    let one = b.int(1);
    let sum = b.bin(BinaryOp::Add, rhs, one);
    let a = b.var_decl("a", sum);
    let two = b.int(2);
    let bb = b.var_decl("b", two);

    let (sema, chunk) = b.compile(&[a, bb]).unwrap();

    assert_eq!(sema.init_deps.len(), 1);
    let sets: Vec<usize> = find_op(&chunk, OpCode::SetStaticVar);
    assert_eq!(sets.len(), 2);
    // `a` declared first (static var id 0), `b` second (id 1); `b`'s
    // write must come first.
    let first_var = chunk.buf.read_u16(sets[0] + 1);
    let second_var = chunk.buf.read_u16(sets[1] + 1);
    assert_eq!(first_var, 1);
    assert_eq!(second_var, 0);
}

#[test]
fn test_empty_composites_use_dedicated_ops() {
    let mut b = Builder::new();
    let list = b.node(NodeHead::ListLit {
        first_elem: NodeId::NULL,
        num_elems: 0,
    });
    let l = b.var_decl("l", list);
    let map = b.node(NodeHead::MapLit {
        first_entry: NodeId::NULL,
        num_entries: 0,
    });
    let m = b.var_decl("m", map);

    let (_, chunk) = b.compile(&[l, m]).unwrap();

    assert_eq!(find_op(&chunk, OpCode::MapEmpty).len(), 1);
    let lists = find_op(&chunk, OpCode::List);
    assert_eq!(lists.len(), 1);
    // `list argStart, 0, dst`.
    assert_eq!(chunk.buf.ops[lists[0] + 2], 0);
}

/// Object construction switches off the fast path at exactly four
/// fields.
#[test]
fn test_object_small_boundary_at_four_fields() {
    for (num_fields, expect_small) in [(4u8, true), (5u8, false)] {
        let mut b = Builder::new();
        let fields: Vec<NodeId> = (0..num_fields)
            .map(|i| {
                let name = b.name(&format!("f{i}"));
                b.node(NodeHead::ObjectFieldDecl {
                    name,
                    type_spec: NodeId::NULL,
                })
            })
            .collect();
        let first_field = b.ast.chain(&fields);
        let obj_name = b.name("Pt");
        let decl = b.node(NodeHead::ObjectDecl {
            name: obj_name,
            first_field,
            num_fields,
            first_func: NodeId::NULL,
        });

        let entries: Vec<NodeId> = (0..num_fields)
            .map(|i| {
                let key = b.ident(&format!("f{i}"));
                let value = b.int(u64::from(i));
                b.node(NodeHead::MapEntry { key, value })
            })
            .collect();
        let first_entry = b.ast.chain(&entries);
        let init = b.node(NodeHead::ObjectInit {
            name: obj_name,
            first_entry,
            num_entries: num_fields,
        });
        let v = b.var_decl("v", init);

        let (_, chunk) = b.compile(&[decl, v]).unwrap();
        if expect_small {
            assert_eq!(find_op(&chunk, OpCode::ObjectSmall).len(), 1, "4 fields");
            assert!(find_op(&chunk, OpCode::Object).is_empty());
        } else {
            assert_eq!(find_op(&chunk, OpCode::Object).len(), 1, "5 fields");
            assert!(find_op(&chunk, OpCode::ObjectSmall).is_empty());
        }
    }
}

/// Emitting the same AST twice yields byte-identical bytecode.
#[test]
fn test_emission_is_deterministic() {
    let build = || {
        let mut b = Builder::new();
        let print = b.host_func("print", 1, None);
        let ten = b.int(10);
        let x = b.var_decl("x", ten);
        let lhs = b.ident("x");
        let rhs = b.int(5);
        let add = b.bin(BinaryOp::Add, lhs, rhs);
        let call = b.call("print", &[add]);
        let stmt = b.expr_stmt(call);
        let (_, chunk) = b.compile(&[print, x, stmt]).unwrap();
        chunk
    };
    let first = build();
    let second = build();
    assert_eq!(first.buf.ops, second.buf.ops);
    assert_eq!(first.buf.consts, second.buf.consts);
}

/// A match without an else jumps past all bodies when nothing matches.
#[test]
fn test_match_without_else_skips_all_bodies() {
    let mut b = Builder::new();
    let print = b.host_func("print", 1, None);
    let one = b.int(1);
    let x = b.var_decl("x", one);

    let scrutinee = b.ident("x");
    let cond = b.int(2);
    let body_arg = b.int(99);
    let body_call = b.call("print", &[body_arg]);
    let body = b.expr_stmt(body_call);
    let case = b.node(NodeHead::MatchCase {
        first_cond: cond,
        first_stmt: body,
        is_else: false,
    });
    let m = b.node(NodeHead::Match {
        expr: scrutinee,
        first_case: case,
    });

    let (_, chunk) = b.compile(&[print, x, m]).unwrap();
    let matches = find_op(&chunk, OpCode::Match);
    assert_eq!(matches.len(), 1);
    let match_pc = matches[0];
    // One cond triple then the trailing else displacement.
    assert_eq!(chunk.buf.ops[match_pc + 2], 1);
    let else_off = chunk.buf.read_u16(match_pc + 3 + 3) as i16;
    let else_target = match_pc as i64 + i64::from(else_off);
    // The else target lies past the case body's call.
    let call_pcs = find_op(&chunk, OpCode::CallSym);
    assert!(call_pcs.iter().all(|&pc| (pc as i64) < else_target));
}

/// The top-level block ends with the chunk terminator, and the
/// disassembler renders the stream without gaps.
#[test]
fn test_chunk_ends_with_end_op() {
    let mut b = Builder::new();
    let one = b.int(1);
    let x = b.var_decl("x", one);
    let (_, chunk) = b.compile(&[x]).unwrap();

    let ops = decode_ops(&chunk);
    assert_eq!(ops.last().map(|&(_, op)| op), Some(OpCode::End));
    let text = disassemble(&chunk.buf);
    assert!(text.lines().count() >= ops.len());
}

/// `while` loops place the back jump after the body and patch breaks to
/// the exit.
#[test]
fn test_while_loop_shape() {
    let mut b = Builder::new();
    let t = b.node(NodeHead::TrueLit);
    let brk = b.node(NodeHead::Break);
    let w = b.node(NodeHead::WhileCond {
        cond: t,
        first_stmt: brk,
    });
    let (_, chunk) = b.compile(&[w]).unwrap();

    let jumps = find_op(&chunk, OpCode::Jump);
    // One break jump plus the back jump.
    assert_eq!(jumps.len(), 2);
    assert_eq!(find_op(&chunk, OpCode::JumpNotCond).len(), 1);
}

/// Compound assignment reads, combines, and writes back with a release
/// of the old value.
#[test]
fn test_op_assign_on_local() {
    let mut b = Builder::new();
    // func f():
    //     var x = 1
    //     x += 2
    let one = b.int(1);
    let x = b.var_decl("x", one);
    let target = b.ident("x");
    let two = b.int(2);
    let bump = b.node(NodeHead::OpAssign {
        op: BinaryOp::Add,
        target,
        value: two,
    });
    let f = b.func_decl("f", &[], &[x, bump]);

    let (_, chunk) = b.compile(&[f]).unwrap();
    // The read-combine-write cycle ends in a releasing copy back into
    // the local's slot.
    assert!(!find_op(&chunk, OpCode::CopyReleaseDst).is_empty());
}

/// String templates pack expression slots contiguously and reference
/// their literal parts by string-constant index.
#[test]
fn test_string_template_layout() {
    let mut b = Builder::new();
    let print = b.host_func("print", 1, None);
    let hello = b.name("hello ");
    let bang = b.name("!");
    let lit1 = b.node(NodeHead::StringLit(hello));
    let one = b.int(1);
    let lit2 = b.node(NodeHead::StringLit(bang));
    let first_part = b.ast.chain(&[lit1, one, lit2]);
    let template = b.node(NodeHead::StringTemplate {
        first_part,
        num_exprs: 1,
    });
    let call = b.call("print", &[template]);
    let stmt = b.expr_stmt(call);

    let (_, chunk) = b.compile(&[print, stmt]).unwrap();
    let sites = find_op(&chunk, OpCode::StringTemplate);
    assert_eq!(sites.len(), 1);
    let pc = sites[0];
    // One expression, two literal-part operands.
    assert_eq!(chunk.buf.ops[pc + 2], 1);
    let lit_a = chunk.buf.read_u16(pc + 4);
    let lit_b = chunk.buf.read_u16(pc + 6);
    assert_eq!(&*chunk.buf.string_consts[lit_a as usize], "hello ");
    assert_eq!(&*chunk.buf.string_consts[lit_b as usize], "!");
}

/// For-range loops reserve the counter quad and wire the two ops to
/// each other.
#[test]
fn test_for_range_ops() {
    let mut b = Builder::new();
    let print = b.host_func("print", 1, None);
    let start = b.int(0);
    let end = b.int(10);
    let arg = b.ident("i");
    let call = b.call("print", &[arg]);
    let body = b.expr_stmt(call);
    let each = b.name("i");
    let f = b.node(NodeHead::ForRange {
        each,
        start,
        end,
        step: NodeId::NULL,
        first_stmt: body,
    });
    let (_, chunk) = b.compile(&[print, f]).unwrap();

    let inits = find_op(&chunk, OpCode::ForRangeInit);
    let bottoms = find_op(&chunk, OpCode::ForRange);
    assert_eq!(inits.len(), 1);
    assert_eq!(bottoms.len(), 1);
    // The bottom op jumps backwards into the body.
    let back = chunk.buf.read_u16(bottoms[0] + 5) as i16;
    assert!(back < 0);
    // The init op's exit displacement lands past the bottom op.
    let exit = chunk.buf.read_u16(inits[0] + 6) as i16;
    assert!(inits[0] as i64 + i64::from(exit) > bottoms[0] as i64);
}
