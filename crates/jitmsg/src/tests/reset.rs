//! Reset round-trips: a name can be recompiled with new behavior.

use super::test_helpers::*;
use crate::error::{ErrorKind, JitError};
use crate::namespace::panic_on_next_release;

#[test]
fn test_reset_allows_redefinition() {
    let mut session = new_session();

    let first = session.compile("g", constant_g(1).as_bytes()).expect("IR1");
    assert_eq!(as_fn0(&first)(), 1);

    session.reset().expect("reset");
    assert_eq!(session.generation(), 1);

    let second = session.compile("g", constant_g(2).as_bytes()).expect("IR2");
    assert_eq!(as_fn0(&second)(), 2);
}

#[test]
fn test_reset_clears_namespace() {
    let mut session = new_session();
    session
        .compile("sum_squares", SUM_SQUARES.as_bytes())
        .expect("compile");
    assert_eq!(session.symbol_count(), 2);

    session.reset().expect("reset");
    assert_eq!(session.symbol_count(), 0);
    assert!(!session.is_defined("square"));
    assert!(matches!(
        session.lookup("sum_squares"),
        Err(JitError::SymbolNotFound(name)) if name == "sum_squares"
    ));
}

#[test]
fn test_reset_drops_cross_unit_links() {
    let mut session = new_session();
    session.compile("square", SQUARE.as_bytes()).expect("square");
    session.reset().expect("reset");

    // `square` is gone, so `cube` can no longer link against it.
    let err = session
        .compile("cube", CUBE.as_bytes())
        .expect_err("square was reset");
    assert!(matches!(
        err,
        JitError::UndefinedReference { ref symbol, ref referenced_by }
            if symbol == "square" && referenced_by == "cube"
    ));
}

#[test]
fn test_unit_names_survive_reset() {
    let mut session = new_session();
    session.compile("g", constant_g(1).as_bytes()).expect("first");
    session.reset().expect("reset");
    session.compile("g", constant_g(2).as_bytes()).expect("second");
    assert_eq!(session.units_issued(), 2);
}

#[test]
fn test_reset_on_empty_session() {
    let mut session = new_session();
    session.reset().expect("reset");
    session.reset().expect("reset");
    assert_eq!(session.generation(), 2);
    assert_eq!(session.symbol_count(), 0);
}

#[test]
fn test_failed_release_damages_session() {
    let mut session = new_session();
    session.compile("g", constant_g(1).as_bytes()).expect("g");

    panic_on_next_release();
    let err = session.reset().expect_err("release panicked");
    assert!(matches!(err, JitError::Reset(_)), "{err:?}");
    assert!(!err.is_recoverable());
    assert!(session.is_damaged());
    assert_eq!(session.generation(), 0);

    let err = session
        .compile("h", constant_g(2).replace("%g", "%h").as_bytes())
        .expect_err("damaged session");
    assert_eq!(err.kind(), ErrorKind::Reset);
    assert!(session.reset().is_err());
}

#[test]
fn test_replacement_session_after_failed_reset() {
    let mut damaged = new_session();
    panic_on_next_release();
    assert!(damaged.reset().is_err());
    drop(damaged);

    let mut session = new_session();
    let g = session.compile("g", constant_g(3).as_bytes()).expect("g");
    assert_eq!(as_fn0(&g)(), 3);
    session.reset().expect("reset");
}
