//! Capture analysis and closure emission tests.

mod common;

use common::{find_op, Builder};
use sable_compiler::{LocalVarFlags, LocalVarKind, OpCode};
use sable_core::NodeHead;

/// A nested function reading an enclosing local forces the local into a
/// box, and the nested function becomes a closure carrying one captured
/// slot, retained before the closure op.
#[test]
fn test_capture_boxes_parent_and_emits_closure() {
    let mut b = Builder::new();
    // func outer():
    //     var x = 10
    //     func inner(): return x
    //     return inner
    let ten = b.int(10);
    let x = b.var_decl("x", ten);
    let x_read = b.ident("x");
    let ret_x = b.ret(x_read);
    let inner = b.func_decl("inner", &[], &[ret_x]);
    let inner_read = b.ident("inner");
    let ret_inner = b.ret(inner_read);
    let outer = b.func_decl("outer", &[], &[x, inner, ret_inner]);

    let (sema, chunk) = b.compile(&[outer]).unwrap();

    // outer = block 1, inner = block 2.
    let outer_block = &sema.blocks[1];
    let x_idx = outer_block
        .vars
        .iter()
        .position(|v| v.kind == LocalVarKind::Local)
        .expect("x is a local of outer") as u16;
    assert!(outer_block.var(x_idx).flags.contains(LocalVarFlags::BOXED));

    let inner_block = &sema.blocks[2];
    assert_eq!(inner_block.captures.len(), 1);
    assert_eq!(inner_block.captures[0], x_idx);
    assert_eq!(sema.stats.captures_created, 1);

    // One box at x's definition, one closure with one captured slot, one
    // retain of the box right before it.
    assert_eq!(find_op(&chunk, OpCode::BoxOp).len(), 1);
    let closures = find_op(&chunk, OpCode::Closure);
    assert_eq!(closures.len(), 1);
    let closure_pc = closures[0];
    assert_eq!(chunk.buf.ops[closure_pc + 7], 1, "one captured slot");
    let retains = find_op(&chunk, OpCode::Retain);
    assert!(retains.iter().any(|&pc| pc < closure_pc));
    // The owned read of x goes through the box.
    assert_eq!(find_op(&chunk, OpCode::BoxValueRetain).len(), 1);
}

/// Captures thread through intermediate lambdas: the innermost function
/// reaches a local two blocks up via an alias in the middle block, so
/// both nested functions become closures.
#[test]
fn test_transitive_capture_through_middle_block() {
    let mut b = Builder::new();
    // func outer():
    //     var x = 10
    //     func mk():
    //         func inner(): return x
    //         return inner
    //     return mk
    let ten = b.int(10);
    let x = b.var_decl("x", ten);
    let x_read = b.ident("x");
    let ret_x = b.ret(x_read);
    let inner = b.func_decl("inner", &[], &[ret_x]);
    let inner_read = b.ident("inner");
    let ret_inner = b.ret(inner_read);
    let mk = b.func_decl("mk", &[], &[inner, ret_inner]);
    let mk_read = b.ident("mk");
    let ret_mk = b.ret(mk_read);
    let outer = b.func_decl("outer", &[], &[x, mk, ret_mk]);

    let (sema, chunk) = b.compile(&[outer]).unwrap();

    // Both mk and inner carry one capture each.
    let mk_block = &sema.blocks[2];
    let inner_block = &sema.blocks[3];
    assert_eq!(mk_block.captures.len(), 1);
    assert_eq!(inner_block.captures.len(), 1);
    // The middle block's capture target is outer's x; the inner one
    // targets mk's alias.
    let alias_idx = inner_block.captures[0];
    assert_eq!(
        mk_block.var(alias_idx).kind,
        LocalVarKind::ParentLocalAlias
    );
    assert_eq!(find_op(&chunk, OpCode::Closure).len(), 2);
}

/// A nested function with no free variables emits a plain lambda.
#[test]
fn test_lambda_without_captures() {
    let mut b = Builder::new();
    let one = b.int(1);
    let ret_one = b.ret(one);
    let inner = b.func_decl("inner", &[], &[ret_one]);
    let outer = b.func_decl("outer", &[], &[inner]);

    let (sema, chunk) = b.compile(&[outer]).unwrap();
    assert_eq!(find_op(&chunk, OpCode::Lambda).len(), 1);
    assert!(find_op(&chunk, OpCode::Closure).is_empty());
    assert!(find_op(&chunk, OpCode::BoxOp).is_empty());
    assert_eq!(sema.stats.captures_created, 0);
}

/// An expression-bodied lambda value compiles to a lambda op whose body
/// returns the expression.
#[test]
fn test_expr_bodied_lambda() {
    let mut b = Builder::new();
    let p = b.param("n");
    let n_read = b.ident("n");
    let one = b.int(1);
    let body = b.bin(sable_core::BinaryOp::Add, n_read, one);
    let lambda = b.node(NodeHead::Lambda {
        first_param: p,
        num_params: 1,
        body,
        body_is_stmts: false,
    });
    let f = b.var_decl("f", lambda);

    let (sema, chunk) = b.compile(&[f]).unwrap();
    assert_eq!(find_op(&chunk, OpCode::Lambda).len(), 1);
    assert_eq!(find_op(&chunk, OpCode::Ret1).len(), 1);
    // The lambda's block has one param and no captures.
    let lambda_block = &sema.blocks[1];
    assert_eq!(lambda_block.params.len(), 1);
    assert!(lambda_block.captures.is_empty());
}

/// Boxed locals write through the box.
#[test]
fn test_boxed_write_uses_set_box_value() {
    let mut b = Builder::new();
    // func outer():
    //     var x = 1
    //     func bump(): x = 2
    let one = b.int(1);
    let x = b.var_decl("x", one);
    let target = b.ident("x");
    let two = b.int(2);
    let assign = b.node(NodeHead::Assign { target, value: two });
    let bump = b.func_decl("bump", &[], &[assign]);
    let outer = b.func_decl("outer", &[], &[x, bump]);

    let (_, chunk) = b.compile(&[outer]).unwrap();
    assert_eq!(find_op(&chunk, OpCode::SetBoxValueRelease).len(), 1);
}
