//! Symbol namespace: registration, linking and resolution of compiled code.
//!
//! A [`Namespace`] wraps one `JITModule`: the executable memory, the symbol
//! table and the relocations between functions. Units are registered
//! all-or-nothing with respect to resolvable symbols:
//!
//! 1. Every function name is checked against the namespace (duplicates are
//!    rejected outright, never shadowed).
//! 2. Every call target and function-address symbol is resolved against
//!    the unit itself, then against already registered functions, and
//!    call signatures are compared with the callee's.
//! 3. Every function is lowered to machine code once as a dry run.
//! 4. Only then are they declared, linked, defined and finalized.
//!
//! Only after finalization do the unit's symbols become resolvable. Backend
//! panics during lowering, definition or finalization are caught and
//! reported as code generation errors.
//!
//! Dropping a [`Namespace`] unmaps its code.

use std::mem::ManuallyDrop;

use cranelift_codegen::Context;
use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::{
    ExternalName, Function, GlobalValueData, Signature, UserExternalName, UserFuncName,
};
use cranelift_codegen::isa::{OwnedTargetIsa, TargetIsa};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module, ModuleError, default_libcall_names};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{JitError, catch_panic};
use crate::ingest::{CompilationUnit, symbol_name};
use crate::types::CompiledFunction;

/// Function ids live in namespace 0 of `cranelift-module`'s user names.
const FUNCTION_NAMESPACE: u32 = 0;

#[cfg(test)]
thread_local! {
    static PANIC_ON_RELEASE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Make the next namespace dropped on this thread panic before unmapping.
#[cfg(test)]
pub(crate) fn panic_on_next_release() {
    PANIC_ON_RELEASE.with(|armed| armed.set(true));
}

/// One generation of registered code.
pub(crate) struct Namespace {
    /// Taken and freed exactly once, in `drop`.
    module: ManuallyDrop<JITModule>,
    /// Finalized, resolvable functions.
    defined: FxHashMap<String, FuncId>,
    /// Names whose definition reached the module but whose unit failed
    /// afterwards. They cannot be resolved or redefined until reset.
    reserved: FxHashSet<String>,
}

impl Namespace {
    pub(crate) fn new(isa: OwnedTargetIsa) -> Self {
        let builder = JITBuilder::with_isa(isa, default_libcall_names());
        Self {
            module: ManuallyDrop::new(JITModule::new(builder)),
            defined: FxHashMap::default(),
            reserved: FxHashSet::default(),
        }
    }

    /// Number of resolvable symbols.
    pub(crate) fn len(&self) -> usize {
        self.defined.len()
    }

    pub(crate) fn contains(&self, symbol: &str) -> bool {
        self.defined.contains_key(symbol)
    }

    pub(crate) fn symbols(&self) -> impl Iterator<Item = &str> {
        self.defined.keys().map(String::as_str)
    }

    /// Register every function of `unit`, returning the defined symbol names.
    pub(crate) fn register(&mut self, unit: CompilationUnit) -> Result<Vec<String>, JitError> {
        let unit_name = unit.name().to_string();
        let functions = unit.into_functions();
        let symbols: Vec<String> = functions.iter().map(|f| symbol_name(&f.name)).collect();

        if let Some(duplicate) = symbols
            .iter()
            .find(|s| self.defined.contains_key(*s) || self.reserved.contains(*s))
        {
            return Err(JitError::DuplicateSymbol(duplicate.clone()));
        }

        // Everything that can reject the unit runs before the first
        // declaration; declared names cannot be withdrawn from the module.
        for (func, symbol) in functions.iter().zip(&symbols) {
            self.check_references(func, symbol, &functions, &symbols)?;
            lower(func, symbol, self.module.isa())?;
        }

        let mut local = FxHashMap::default();
        for (func, symbol) in functions.iter().zip(&symbols) {
            let id = self
                .module
                .declare_function(symbol, Linkage::Export, &func.signature)
                .map_err(|e| module_error(e, symbol))?;
            local.insert(symbol.clone(), id);
        }

        let mut linked = Vec::with_capacity(functions.len());
        for (mut func, symbol) in functions.into_iter().zip(&symbols) {
            let id = local[symbol];
            self.link(&mut func, symbol, &local)?;
            func.name = UserFuncName::user(FUNCTION_NAMESPACE, id.as_u32());
            linked.push((func, id));
        }

        let mut staged = Vec::with_capacity(symbols.len());
        let mut result = Ok(());
        for ((func, id), symbol) in linked.into_iter().zip(&symbols) {
            let mut ctx = Context::for_function(func);
            match catch_panic(|| self.module.define_function(id, &mut ctx)) {
                Ok(Ok(())) => staged.push(symbol.clone()),
                Ok(Err(e)) => {
                    result = Err(module_error(e, symbol));
                    break;
                }
                Err(panic) => {
                    // The definition may have reached the module.
                    staged.push(symbol.clone());
                    result = Err(backend_panic(symbol, &panic));
                    break;
                }
            }
        }
        if result.is_ok() {
            result = match catch_panic(|| self.module.finalize_definitions()) {
                Ok(finalized) => finalized
                    .map_err(|e| JitError::Codegen(format!("finalizing {unit_name}: {e}"))),
                Err(panic) => Err(backend_panic(&unit_name, &panic)),
            };
        }

        if let Err(e) = result {
            if !staged.is_empty() {
                tracing::warn!(
                    module = %unit_name,
                    symbols = ?staged,
                    "Partially registered unit; its symbols stay reserved until reset"
                );
            }
            self.reserved.extend(staged);
            return Err(e);
        }

        for symbol in &staged {
            self.defined.insert(symbol.clone(), local[symbol]);
        }
        Ok(staged)
    }

    /// Resolve a registered symbol to its entry point.
    pub(crate) fn resolve(&self, symbol: &str) -> Result<CompiledFunction, JitError> {
        let id = *self
            .defined
            .get(symbol)
            .ok_or_else(|| JitError::SymbolNotFound(symbol.to_string()))?;
        let ptr = self.module.get_finalized_function(id);
        let signature = self.module.declarations().get_function_decl(id).signature.clone();
        Ok(CompiledFunction::new(symbol.to_string(), ptr, signature))
    }

    /// Every call target and function address of `func` must exist in the
    /// unit or the namespace, and calls must use the callee's signature.
    fn check_references(
        &self,
        func: &Function,
        caller: &str,
        unit: &[Function],
        unit_symbols: &[String],
    ) -> Result<(), JitError> {
        for ext_func in func.dfg.ext_funcs.values() {
            let Some(target) = external_symbol(func, &ext_func.name) else {
                continue;
            };
            let declared = match unit_symbols.iter().position(|s| *s == target) {
                Some(index) => &unit[index].signature,
                None => match self.defined.get(&target) {
                    Some(id) => &self.module.declarations().get_function_decl(*id).signature,
                    None => return Err(undefined(&target, caller)),
                },
            };
            let used = &func.dfg.signatures[ext_func.signature];
            if declared != used {
                return Err(signature_mismatch(caller, &target, used, declared));
            }
        }

        for data in func.global_values.values() {
            if let GlobalValueData::Symbol { name, .. } = data
                && let Some(target) = external_symbol(func, name)
                && !unit_symbols.contains(&target)
                && !self.defined.contains_key(&target)
            {
                return Err(undefined(&target, caller));
            }
        }
        Ok(())
    }

    /// Point every call and function-address symbol of `func` at module ids.
    fn link(
        &self,
        func: &mut Function,
        caller: &str,
        local: &FxHashMap<String, FuncId>,
    ) -> Result<(), JitError> {
        let mut calls = Vec::new();
        for (ext_ref, ext_func) in func.dfg.ext_funcs.iter() {
            let Some(target) = external_symbol(func, &ext_func.name) else {
                continue;
            };
            calls.push((ext_ref, self.lookup_id(&target, caller, local)?));
        }

        let mut addresses = Vec::new();
        for (gv, data) in func.global_values.iter() {
            if let GlobalValueData::Symbol { name, .. } = data
                && let Some(target) = external_symbol(func, name)
            {
                addresses.push((gv, self.lookup_id(&target, caller, local)?));
            }
        }

        for (ext_ref, id) in calls {
            let name_ref = func.declare_imported_user_function(UserExternalName::new(
                FUNCTION_NAMESPACE,
                id.as_u32(),
            ));
            func.dfg.ext_funcs[ext_ref].name = ExternalName::User(name_ref);
        }
        for (gv, id) in addresses {
            let name_ref = func.declare_imported_user_function(UserExternalName::new(
                FUNCTION_NAMESPACE,
                id.as_u32(),
            ));
            if let GlobalValueData::Symbol { name, .. } = &mut func.global_values[gv] {
                *name = ExternalName::User(name_ref);
            }
        }
        Ok(())
    }

    fn lookup_id(
        &self,
        target: &str,
        caller: &str,
        local: &FxHashMap<String, FuncId>,
    ) -> Result<FuncId, JitError> {
        local
            .get(target)
            .or_else(|| self.defined.get(target))
            .copied()
            .ok_or_else(|| undefined(target, caller))
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        #[cfg(test)]
        if PANIC_ON_RELEASE.with(|armed| armed.replace(false)) {
            panic!("injected failure while releasing the namespace");
        }

        let released = self.defined.len();
        // SAFETY: `module` is not touched again after being taken here.
        #[expect(unsafe_code)]
        let module = unsafe { ManuallyDrop::take(&mut self.module) };
        // SAFETY: The namespace is going away, so no new pointers can be
        // resolved from it. Pointers handed out earlier are invalidated,
        // which is the documented contract of `Session::reset`.
        #[expect(unsafe_code)]
        unsafe {
            module.free_memory();
        }
        tracing::debug!(released, "Released JIT namespace");
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("defined", &self.defined.len())
            .field("reserved", &self.reserved.len())
            .finish_non_exhaustive()
    }
}

/// Generate machine code for `func` without touching the module.
fn lower(func: &Function, symbol: &str, isa: &dyn TargetIsa) -> Result<(), JitError> {
    let mut ctx = Context::for_function(func.clone());
    let lowered = catch_panic(|| {
        ctx.compile(isa, &mut ControlPlane::default())
            .map(|_| ())
            .map_err(|e| e.inner.to_string())
    });
    match lowered {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(JitError::Codegen(format!("`{symbol}`: {e}"))),
        Err(panic) => Err(backend_panic(symbol, &panic)),
    }
}

fn backend_panic(what: &str, message: &str) -> JitError {
    JitError::Codegen(format!("`{what}`: backend panicked: {message}"))
}

fn external_symbol(func: &Function, name: &ExternalName) -> Option<String> {
    match name {
        ExternalName::TestCase(testcase) => {
            let printed = testcase.to_string();
            Some(printed.strip_prefix('%').unwrap_or(&printed).to_string())
        }
        ExternalName::User(name_ref) => Some(func.params.user_named_funcs()[*name_ref].to_string()),
        _ => None,
    }
}

fn module_error(error: ModuleError, symbol: &str) -> JitError {
    match error {
        ModuleError::DuplicateDefinition(_) => JitError::DuplicateSymbol(symbol.to_string()),
        ModuleError::Compilation(e) => JitError::Codegen(format!("`{symbol}`: {e}")),
        other => JitError::Registration(format!("`{symbol}`: {other}")),
    }
}

fn undefined(symbol: &str, referenced_by: &str) -> JitError {
    JitError::UndefinedReference {
        symbol: symbol.to_string(),
        referenced_by: referenced_by.to_string(),
    }
}

fn signature_mismatch(
    caller: &str,
    target: &str,
    used: &Signature,
    declared: &Signature,
) -> JitError {
    JitError::Registration(format!(
        "`{caller}` calls `{target}` as {used}, but it is defined as {declared}"
    ))
}
