//! Shared CLIF programs and call helpers for the scenario tests.

use crate::session::Session;
use crate::types::CompiledFunction;

pub type Fn1 = extern "C" fn(i64) -> i64;
pub type Fn2 = extern "C" fn(i64, i64) -> i64;

pub const IDENTITY: &str = "function %identity(i64) -> i64 {
block0(v0: i64):
    return v0
}
";

/// 3x² + 2x + 1
pub const POLY: &str = "function %poly(i64) -> i64 {
block0(v0: i64):
    v1 = imul v0, v0
    v2 = imul_imm v1, 3
    v3 = imul_imm v0, 2
    v4 = iadd v2, v3
    v5 = iadd_imm v4, 1
    return v5
}
";

pub const MAX: &str = "function %max(i64, i64) -> i64 {
block0(v0: i64, v1: i64):
    v2 = icmp sgt v0, v1
    brif v2, block1, block2

block1:
    return v0

block2:
    return v1
}
";

/// Iterative Fibonacci: fib(0) = 0, fib(1) = 1.
pub const FIB: &str = "function %fib(i64) -> i64 {
block0(v0: i64):
    v1 = iconst.i64 0
    v2 = iconst.i64 1
    jump block1(v0, v1, v2)

block1(v3: i64, v4: i64, v5: i64):
    brif v3, block2, block3

block2:
    v6 = iadd v4, v5
    v7 = iadd_imm v3, -1
    jump block1(v7, v5, v6)

block3:
    return v4
}
";

pub const SQUARE: &str = "function %square(i64) -> i64 {
block0(v0: i64):
    v1 = imul v0, v0
    return v1
}
";

/// `sum_squares` calls `square` from the same payload.
pub const SUM_SQUARES: &str = "function %square(i64) -> i64 {
block0(v0: i64):
    v1 = imul v0, v0
    return v1
}

function %sum_squares(i64, i64) -> i64 {
    fn0 = %square(i64) -> i64
block0(v0: i64, v1: i64):
    v2 = call fn0(v0)
    v3 = call fn0(v1)
    v4 = iadd v2, v3
    return v4
}
";

/// Calls `square`, which must already be registered.
pub const CUBE: &str = "function %cube(i64) -> i64 {
    fn0 = %square(i64) -> i64
block0(v0: i64):
    v1 = call fn0(v0)
    v2 = imul v1, v0
    return v2
}
";

/// A nullary `g` returning `value`.
pub fn constant_g(value: i64) -> String {
    format!(
        "function %g() -> i64 {{
block0:
    v0 = iconst.i64 {value}
    return v0
}}
"
    )
}

pub fn new_session() -> Session {
    Session::initialize().expect("host session")
}

#[expect(unsafe_code)]
pub fn as_fn0(function: &CompiledFunction) -> extern "C" fn() -> i64 {
    // SAFETY: callers only pass functions declared as `() -> i64` with the
    // host's default calling convention, and keep the session alive.
    unsafe { std::mem::transmute::<*const u8, extern "C" fn() -> i64>(function.as_ptr()) }
}

#[expect(unsafe_code)]
pub fn as_fn1(function: &CompiledFunction) -> Fn1 {
    // SAFETY: as in `as_fn0`, for `(i64) -> i64`.
    unsafe { std::mem::transmute::<*const u8, Fn1>(function.as_ptr()) }
}

#[expect(unsafe_code)]
pub fn as_fn2(function: &CompiledFunction) -> Fn2 {
    // SAFETY: as in `as_fn0`, for `(i64, i64) -> i64`.
    unsafe { std::mem::transmute::<*const u8, Fn2>(function.as_ptr()) }
}
