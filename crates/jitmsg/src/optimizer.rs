//! Optimization pipeline run over a unit before code generation.
//!
//! The level is fixed at Cranelift's strongest setting and is not
//! configurable. Each function goes through legalization, unreachable-code
//! elimination, constant-phi removal and the e-graph pass, which performs
//! GVN, constant folding, algebraic simplification, alias analysis,
//! loop-invariant code motion and dead-code elimination in one rewrite.

use cranelift_codegen::Context;
use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::Function;
use cranelift_codegen::isa::OwnedTargetIsa;

use crate::error::{JitError, catch_panic};
use crate::ingest::{CompilationUnit, symbol_name};

/// Statistics from one pipeline run over a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationStats {
    /// Number of functions optimized.
    pub functions: usize,
    /// Instructions in the unit before optimization.
    pub instructions_before: usize,
    /// Instructions in the unit after optimization.
    pub instructions_after: usize,
}

impl OptimizationStats {
    /// Instructions removed by the pipeline (zero if the unit grew).
    pub fn instructions_eliminated(&self) -> usize {
        self.instructions_before
            .saturating_sub(self.instructions_after)
    }
}

/// The fixed aggressive pipeline, bound to the session's target.
#[derive(Clone)]
pub struct Pipeline {
    isa: OwnedTargetIsa,
}

impl Pipeline {
    pub fn new(isa: OwnedTargetIsa) -> Self {
        Self { isa }
    }

    /// Optimize every function of `unit` in place.
    ///
    /// The transformed functions are semantically equivalent to the input.
    /// A failure here means the backend rejected IR that already passed
    /// ingestion, and is reported as a code generation error. So is a
    /// panic inside the pass.
    pub fn run(&self, unit: &mut CompilationUnit) -> Result<OptimizationStats, JitError> {
        let mut stats = OptimizationStats::default();

        for func in unit.functions_mut() {
            let before = instruction_count(func);
            let symbol = symbol_name(&func.name);
            let mut ctx = Context::for_function(std::mem::replace(func, Function::new()));
            let optimized = catch_panic(|| {
                ctx.optimize(self.isa.as_ref(), &mut ControlPlane::default())
                    .map_err(|e| e.to_string())
            });
            match optimized {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(JitError::Codegen(format!("optimizing `{symbol}`: {e}"))),
                Err(panic) => {
                    return Err(JitError::Codegen(format!(
                        "optimizing `{symbol}`: backend panicked: {panic}"
                    )));
                }
            }
            *func = ctx.func;

            let after = instruction_count(func);
            stats.functions = stats.functions.saturating_add(1);
            stats.instructions_before = stats.instructions_before.saturating_add(before);
            stats.instructions_after = stats.instructions_after.saturating_add(after);
        }

        Ok(stats)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("triple", &self.isa.triple().to_string())
            .field("opt_level", &self.isa.flags().opt_level())
            .finish()
    }
}

/// Number of instructions laid out in `func`.
pub fn instruction_count(func: &Function) -> usize {
    func.layout
        .blocks()
        .map(|block| func.layout.block_insts(block).count())
        .sum()
}
