//! Execution session: the owner of all JIT-compiled code.
//!
//! A [`Session`] is an explicit handle: it is created by
//! [`Session::initialize`], and every compilation, lookup and reset goes
//! through it. Mutating operations take `&mut self`, so concurrent compiles
//! against one session are serialized by the borrow checker (or by a lock
//! the caller holds, as the C boundary does).
//!
//! ```text
//! compile(entry, ir)
//!   ├── parse:    text → verified unit named `<prefix>-<n>`
//!   ├── optimize: fixed aggressive pipeline
//!   └── register: link, lower, define, finalize, resolve `entry`
//! ```

use std::sync::OnceLock;

use cranelift_codegen::isa::OwnedTargetIsa;

use crate::error::{JitError, catch_panic};
use crate::ingest::{self, CompilationUnit, ModuleNames};
use crate::namespace::Namespace;
use crate::optimizer::{OptimizationStats, Pipeline};
use crate::target;
use crate::types::{CompiledFunction, JitConfig};

/// Process-level JIT state: target, optimization pipeline and namespace.
///
/// Dropping the session unmaps all code it compiled; every
/// [`CompiledFunction`] obtained from it must be dead by then.
///
/// A failed [`Session::reset`] leaves the session damaged: compile and
/// reset are refused until the host builds a new session.
pub struct Session {
    config: JitConfig,
    isa: OwnedTargetIsa,
    pipeline: Pipeline,
    namespace: Namespace,
    module_names: ModuleNames,
    /// Number of resets performed so far.
    generation: u64,
    /// Set when releasing a namespace failed.
    damaged: bool,
    target_triple: OnceLock<String>,
    data_layout: OnceLock<String>,
}

impl Session {
    /// Create a session targeting the host with the default configuration.
    pub fn initialize() -> Result<Self, JitError> {
        Self::with_config(JitConfig::default())
    }

    /// Create a session targeting the host with a custom configuration.
    pub fn with_config(config: JitConfig) -> Result<Self, JitError> {
        let isa = target::host_isa()?;
        tracing::info!(
            triple = %isa.triple(),
            opt_level = target::OPT_LEVEL,
            "Initialized JIT session"
        );

        Ok(Self {
            module_names: ModuleNames::new(config.module_prefix.clone()),
            pipeline: Pipeline::new(isa.clone()),
            namespace: Namespace::new(isa.clone()),
            generation: 0,
            damaged: false,
            target_triple: OnceLock::new(),
            data_layout: OnceLock::new(),
            config,
            isa,
        })
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Target triple of the code this session generates.
    pub fn target_triple(&self) -> &str {
        self.target_triple.get_or_init(|| self.isa.triple().to_string())
    }

    /// Data layout descriptor of the code this session generates.
    pub fn data_layout(&self) -> &str {
        self.data_layout
            .get_or_init(|| target::data_layout(self.isa.as_ref()))
    }

    /// Parse and verify `ir` into a fresh compilation unit.
    ///
    /// Consumes one unit name whether or not parsing succeeds. Never
    /// touches the namespace.
    pub fn parse(&mut self, ir: &[u8]) -> Result<CompilationUnit, JitError> {
        let name = self.module_names.next_name();
        ingest::parse(ir, name, self.isa.as_ref(), &self.config)
    }

    /// Run the fixed optimization pipeline over `unit`.
    pub fn optimize(&self, unit: &mut CompilationUnit) -> Result<OptimizationStats, JitError> {
        let stats = self.pipeline.run(unit)?;
        tracing::debug!(
            module = unit.name(),
            functions = stats.functions,
            instructions_before = stats.instructions_before,
            instructions_after = stats.instructions_after,
            "Optimized unit"
        );
        Ok(stats)
    }

    /// Move `unit` into the namespace and resolve `entry`.
    ///
    /// Fails with [`JitError::DuplicateSymbol`] if any function of the unit
    /// is already registered, and with [`JitError::SymbolNotFound`] if the
    /// unit registered but `entry` is not in the namespace.
    pub fn register_and_resolve(
        &mut self,
        unit: CompilationUnit,
        entry: &str,
    ) -> Result<CompiledFunction, JitError> {
        let module = unit.name().to_string();
        let symbols = self.namespace.register(unit)?;
        tracing::info!(
            module = %module,
            generation = self.generation,
            symbols = ?symbols,
            "Registered unit"
        );
        self.namespace.resolve(entry)
    }

    /// Parse, optimize and register `ir`, then resolve `entry`.
    ///
    /// A panic anywhere in the pipeline is reported as
    /// [`JitError::Codegen`].
    pub fn compile(&mut self, entry: &str, ir: &[u8]) -> Result<CompiledFunction, JitError> {
        let result = if self.damaged {
            Err(damaged_session())
        } else {
            catch_panic(|| self.try_compile(entry, ir)).unwrap_or_else(|panic| {
                Err(JitError::Codegen(format!("`{entry}`: compilation panicked: {panic}")))
            })
        };
        if let Err(e) = &result {
            tracing::warn!(entry, kind = ?e.kind(), error = %e, "JIT compilation failed");
        }
        result
    }

    fn try_compile(&mut self, entry: &str, ir: &[u8]) -> Result<CompiledFunction, JitError> {
        let mut unit = self.parse(ir)?;
        self.optimize(&mut unit)?;
        self.register_and_resolve(unit, entry)
    }

    /// Resolve an already registered symbol.
    pub fn lookup(&self, name: &str) -> Result<CompiledFunction, JitError> {
        self.namespace.resolve(name)
    }

    /// Whether `name` is currently registered.
    pub fn is_defined(&self, name: &str) -> bool {
        self.namespace.contains(name)
    }

    /// Registered symbol names, in no particular order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.namespace.symbols()
    }

    /// Number of registered symbols.
    pub fn symbol_count(&self) -> usize {
        self.namespace.len()
    }

    /// Number of resets performed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a failed reset left this session unusable.
    pub fn is_damaged(&self) -> bool {
        self.damaged
    }

    /// Number of unit names handed out, including failed compilations.
    pub fn units_issued(&self) -> u64 {
        self.module_names.issued()
    }

    /// Drop every registered symbol and unmap its code.
    ///
    /// Afterwards the namespace is in the state it had right after
    /// [`Session::initialize`], so previously compiled names can be defined
    /// again. Every [`CompiledFunction`] obtained before the reset is
    /// invalidated. Unit names keep increasing across resets.
    ///
    /// Fails with [`JitError::Reset`] if the old code could not be
    /// released. The session is then damaged and must be replaced.
    pub fn reset(&mut self) -> Result<(), JitError> {
        if self.damaged {
            return Err(damaged_session());
        }
        let fresh = Namespace::new(self.isa.clone());
        let retired = std::mem::replace(&mut self.namespace, fresh);
        let symbols = retired.len();
        if let Err(panic) = catch_panic(|| drop(retired)) {
            self.damaged = true;
            tracing::error!(generation = self.generation, symbols, reason = %panic, "JIT reset failed");
            return Err(JitError::Reset(format!(
                "releasing {symbols} symbols panicked: {panic}"
            )));
        }
        self.generation = self.generation.saturating_add(1);
        tracing::info!(generation = self.generation, symbols, "Reset JIT namespace");
        Ok(())
    }
}

fn damaged_session() -> JitError {
    JitError::Reset("an earlier reset failed; reinitialize the session".to_string())
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("triple", &self.target_triple())
            .field("namespace", &self.namespace)
            .field("generation", &self.generation)
            .field("damaged", &self.damaged)
            .field("units_issued", &self.module_names.issued())
            .finish()
    }
}
