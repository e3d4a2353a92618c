//! JIT session types.
//!
//! Configuration and the resolved-symbol handle returned to callers.

use cranelift_codegen::ir::{AbiParam, ArgumentPurpose, Signature, types};

/// Default prefix for synthetic compilation-unit names.
pub const DEFAULT_MODULE_PREFIX: &str = "jitmsg";

/// Default upper bound on a single IR payload (16 MiB).
pub const DEFAULT_MAX_IR_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for a JIT session.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Prefix of the synthetic unit names (`<prefix>-<n>`).
    pub module_prefix: String,
    /// Maximum IR payload size in bytes accepted for compilation.
    pub max_ir_size: usize,
    /// Run the IR verifier on every parsed function before optimization.
    pub verify_ir: bool,
}

impl JitConfig {
    /// Check if an IR payload length exceeds the compilation size limit.
    pub fn is_ir_oversized(&self, len: usize) -> bool {
        len > self.max_ir_size
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            module_prefix: DEFAULT_MODULE_PREFIX.to_string(),
            max_ir_size: DEFAULT_MAX_IR_SIZE,
            verify_ir: true,
        }
    }
}

/// A native entry point resolved from the session namespace.
///
/// # Safety
///
/// The pointer refers to executable memory owned by the session that
/// produced it. It stays valid until that session is reset or dropped;
/// calling it afterwards is undefined behavior. The calling convention is
/// the one recorded in [`CompiledFunction::signature`].
pub struct CompiledFunction {
    name: String,
    ptr: *const u8,
    signature: Signature,
}

impl CompiledFunction {
    pub(crate) fn new(name: String, ptr: *const u8, signature: Signature) -> Self {
        Self {
            name,
            ptr,
            signature,
        }
    }

    /// Symbol name the entry point was resolved under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the raw function pointer.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// IR signature of the function, including its calling convention.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of parameters if the function is `(i64, ...) -> i64`.
    pub fn i64_arity(&self) -> Option<usize> {
        let is_i64 = |param: &AbiParam| {
            param.value_type == types::I64 && param.purpose == ArgumentPurpose::Normal
        };
        let returns_i64 = matches!(self.signature.returns.as_slice(), [ret] if is_i64(ret));
        (returns_i64 && self.signature.params.iter().all(is_i64))
            .then_some(self.signature.params.len())
    }
}

// SAFETY: The pointer addresses finalized machine code that is never
// written again while the owning session keeps it mapped. Sharing the
// address between threads does not give access to any mutable state.
#[expect(unsafe_code)]
unsafe impl Send for CompiledFunction {}
#[expect(unsafe_code)]
unsafe impl Sync for CompiledFunction {}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("name", &self.name)
            .field("ptr", &self.ptr)
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JitConfig::default();
        assert_eq!(config.module_prefix, "jitmsg");
        assert_eq!(config.max_ir_size, DEFAULT_MAX_IR_SIZE);
        assert!(config.verify_ir);
    }

    fn function(params: &[types::Type], returns: &[types::Type]) -> CompiledFunction {
        let mut signature = Signature::new(cranelift_codegen::isa::CallConv::SystemV);
        signature.params.extend(params.iter().copied().map(AbiParam::new));
        signature.returns.extend(returns.iter().copied().map(AbiParam::new));
        CompiledFunction::new("f".to_string(), std::ptr::null(), signature)
    }

    #[test]
    fn test_i64_arity() {
        assert_eq!(function(&[], &[types::I64]).i64_arity(), Some(0));
        assert_eq!(
            function(&[types::I64, types::I64], &[types::I64]).i64_arity(),
            Some(2)
        );
        assert_eq!(function(&[types::I32], &[types::I64]).i64_arity(), None);
        assert_eq!(function(&[types::I64], &[]).i64_arity(), None);
        assert_eq!(
            function(&[types::I64], &[types::I64, types::I64]).i64_arity(),
            None
        );
    }

    #[test]
    fn test_is_ir_oversized() {
        let config = JitConfig {
            max_ir_size: 10,
            ..Default::default()
        };
        assert!(!config.is_ir_oversized(10));
        assert!(config.is_ir_oversized(11));
    }
}
