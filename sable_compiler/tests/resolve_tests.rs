//! Resolution and diagnostic tests: overloads, capture restrictions,
//! static-initializer restrictions, and deliberately unsupported nodes.

mod common;

use common::{find_op, Builder};
use sable_compiler::OpCode;
use sable_core::{CompileErrorKind, NodeHead, NodeId, SableError};

fn kind_of(err: SableError) -> CompileErrorKind {
    match err {
        SableError::Compile { kind, .. } => kind,
        other => panic!("expected a compile error, got {other}"),
    }
}

#[test]
fn test_unknown_symbol_reported_with_node() {
    let mut b = Builder::new();
    let ghost = b.ident("ghost");
    let stmt = b.expr_stmt(ghost);
    let err = b.compile(&[stmt]).unwrap_err();
    assert_eq!(err.node(), Some(ghost));
    assert_eq!(kind_of(err), CompileErrorKind::UnknownSymbol);
}

#[test]
fn test_duplicate_static_var_rejected() {
    let mut b = Builder::new();
    let one = b.int(1);
    let a1 = b.var_decl("a", one);
    let two = b.int(2);
    let a2 = b.var_decl("a", two);
    let err = b.compile(&[a1, a2]).unwrap_err();
    assert_eq!(kind_of(err), CompileErrorKind::DuplicateSymbol);
}

/// Two same-name functions are callable, but reading the bare name in a
/// value context is ambiguous.
#[test]
fn test_overloaded_name_in_value_context_is_ambiguous() {
    let mut b = Builder::new();
    let p = b.param("a");
    let f1 = b.func_decl("f", &[], &[]);
    let f2 = b.func_decl("f", &[p], &[]);
    let f_read = b.ident("f");
    let g = b.var_decl("g", f_read);
    let err = b.compile(&[f1, f2, g]).unwrap_err();
    assert_eq!(kind_of(err), CompileErrorKind::AmbiguousOverload);
}

/// Calling a sole overload with the wrong arity reports its signature.
#[test]
fn test_wrong_arity_reports_signature() {
    let mut b = Builder::new();
    let p = b.param("a");
    let f = b.func_decl("f", &[p], &[]);
    let one = b.int(1);
    let two = b.int(2);
    let call = b.call("f", &[one, two]);
    let stmt = b.expr_stmt(call);
    let err = b.compile(&[f, stmt]).unwrap_err();
    match err {
        SableError::Compile { kind, message, .. } => {
            assert_eq!(kind, CompileErrorKind::IncompatibleSignature);
            assert!(message.contains("(any) any"), "message: {message}");
        }
        other => panic!("unexpected error {other}"),
    }
}

/// Two call sites with identical argument types resolve to the same
/// function symbol.
#[test]
fn test_overload_resolution_is_deterministic() {
    let mut b = Builder::new();
    let f = b.func_decl("f", &[], &[]);
    let c1 = b.call("f", &[]);
    let s1 = b.expr_stmt(c1);
    let c2 = b.call("f", &[]);
    let s2 = b.expr_stmt(c2);
    let (sema, _) = b.compile(&[f, s1, s2]).unwrap();
    assert_eq!(sema.res(c1), sema.res(c2));
}

/// A scoped local unbinds when its scope pops; a later reference is an
/// unknown symbol, not a stale binding.
#[test]
fn test_scoped_local_unbinds_after_scope_exit() {
    let mut b = Builder::new();
    // if true: var x = 1
    // var a = x
    let one = b.int(1);
    let x = b.var_decl("x", one);
    let t = b.node(NodeHead::TrueLit);
    let guard = b.node(NodeHead::If {
        cond: t,
        first_stmt: x,
        else_clause: NodeId::NULL,
    });
    let x_read = b.ident("x");
    let a = b.var_decl("a", x_read);
    let err = b.compile(&[guard, a]).unwrap_err();
    assert_eq!(kind_of(err), CompileErrorKind::UnknownSymbol);
}

#[test]
fn test_named_arguments_are_unsupported() {
    let mut b = Builder::new();
    let p = b.param("a");
    let f = b.func_decl("f", &[p], &[]);
    let one = b.int(1);
    let arg_name = b.name("a");
    let named = b.node(NodeHead::NamedArg {
        name: arg_name,
        value: one,
    });
    let callee = b.ident("f");
    let call = b.node(NodeHead::CallExpr {
        callee,
        first_arg: named,
        num_args: 1,
    });
    let stmt = b.expr_stmt(call);
    let err = b.compile(&[f, stmt]).unwrap_err();
    assert_eq!(kind_of(err), CompileErrorKind::UnsupportedNode);
}

#[test]
fn test_multi_return_is_unsupported() {
    let mut b = Builder::new();
    let one = b.int(1);
    let two = b.int(2);
    let pair = b.ast.chain(&[one, two]);
    let ret = b.node(NodeHead::Return { expr: pair });
    let f = b.func_decl("f", &[], &[ret]);
    let err = b.compile(&[f]).unwrap_err();
    assert_eq!(kind_of(err), CompileErrorKind::UnsupportedNode);
}

#[test]
fn test_generic_params_are_unsupported() {
    let mut b = Builder::new();
    let generic = b.node(NodeHead::GenericParams);
    let f = b.func_decl("f", &[generic], &[]);
    let err = b.compile(&[f]).unwrap_err();
    assert_eq!(kind_of(err), CompileErrorKind::UnsupportedNode);
}

#[test]
fn test_assignment_to_literal_is_invalid() {
    let mut b = Builder::new();
    let target = b.int(1);
    let value = b.int(2);
    let assign = b.node(NodeHead::Assign { target, value });
    let err = b.compile(&[assign]).unwrap_err();
    assert_eq!(kind_of(err), CompileErrorKind::InvalidAssignmentTarget);
}

/// Method calls on dynamic receivers lower to `callObjSym` with an
/// interned method-group id.
#[test]
fn test_method_call_lowers_to_call_obj_sym() {
    let mut b = Builder::new();
    let list = b.node(NodeHead::ListLit {
        first_elem: NodeId::NULL,
        num_elems: 0,
    });
    let l = b.var_decl("l", list);
    let recv = b.ident("l");
    let callee = b.node(NodeHead::AccessExpr {
        left: recv,
        name: b.name("push"),
    });
    let one = b.int(1);
    let call = b.node(NodeHead::CallExpr {
        callee,
        first_arg: one,
        num_args: 1,
    });
    let stmt = b.expr_stmt(call);

    let (_, chunk) = b.compile(&[l, stmt]).unwrap();
    let sites = find_op(&chunk, OpCode::CallObjSym);
    assert_eq!(sites.len(), 1);
    // Receiver plus one argument.
    assert_eq!(chunk.buf.ops[sites[0] + 2], 2);
}

/// Enum members load through the `tag` op; symbol literals through
/// `tagLiteral`.
#[test]
fn test_enum_member_and_symbol_literal() {
    let mut b = Builder::new();
    let red = b.name("red");
    let green = b.name("green");
    let m1 = b.node(NodeHead::EnumMemberDecl { name: red });
    let m2 = b.node(NodeHead::EnumMemberDecl { name: green });
    let first_member = b.ast.chain(&[m1, m2]);
    let color = b.name("Color");
    let decl = b.node(NodeHead::EnumDecl {
        name: color,
        first_member,
    });

    let color_ref = b.ident("Color");
    let member = b.node(NodeHead::AccessExpr {
        left: color_ref,
        name: green,
    });
    let c = b.var_decl("c", member);

    let sym_name = b.name("oops");
    let sym = b.node(NodeHead::SymbolLit(sym_name));
    let s = b.var_decl("s", sym);

    let (_, chunk) = b.compile(&[decl, c, s]).unwrap();
    let tags = find_op(&chunk, OpCode::Tag);
    assert_eq!(tags.len(), 1);
    // Member ordinal 1.
    assert_eq!(chunk.buf.ops[tags[0] + 3], 1);
    assert_eq!(find_op(&chunk, OpCode::TagLiteral).len(), 1);
}
