//! Duplicate definitions are rejected, never shadowed.

use super::test_helpers::*;
use crate::error::{ErrorKind, JitError};

#[test]
fn test_second_definition_rejected() {
    let mut session = new_session();
    let first = session.compile("g", constant_g(1).as_bytes()).expect("first g");

    let err = session
        .compile("g", constant_g(2).as_bytes())
        .expect_err("duplicate g");
    assert!(matches!(err, JitError::DuplicateSymbol(ref name) if name == "g"));
    assert_eq!(err.kind(), ErrorKind::DuplicateSymbol);
    assert!(err.is_recoverable());

    // The original definition is untouched.
    assert_eq!(as_fn0(&first)(), 1);
    let current = session.lookup("g").expect("g still registered");
    assert_eq!(as_fn0(&current)(), 1);
}

#[test]
fn test_duplicate_rejects_whole_unit() {
    let mut session = new_session();
    session.compile("square", SQUARE.as_bytes()).expect("square");

    // Defines `square` again alongside a new function.
    let err = session
        .compile("sum_squares", SUM_SQUARES.as_bytes())
        .expect_err("square is taken");
    assert!(matches!(err, JitError::DuplicateSymbol(ref name) if name == "square"));
    assert!(!session.is_defined("sum_squares"));
    assert_eq!(session.symbol_count(), 1);
}

#[test]
fn test_different_names_coexist() {
    let mut session = new_session();
    session.compile("identity", IDENTITY.as_bytes()).expect("identity");
    session.compile("poly", POLY.as_bytes()).expect("poly");
    let mut symbols: Vec<_> = session.symbols().collect();
    symbols.sort_unstable();
    assert_eq!(symbols, vec!["identity", "poly"]);
}
