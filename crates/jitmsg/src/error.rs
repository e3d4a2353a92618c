//! Error types for the JIT compilation crate.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Human-readable report for IR that failed to parse or verify.
///
/// Renders as `<module>:<line>: <message>`, with the line omitted when the
/// failure has no source position (verifier errors, encoding errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Synthetic name of the compilation unit the payload was parsed as.
    pub module: String,
    /// 1-based source line, when known.
    pub line: Option<usize>,
    /// Description of the problem.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.module, line, self.message),
            None => write!(f, "{}: {}", self.module, self.message),
        }
    }
}

/// Errors that can occur during JIT initialization, compilation or reset.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Host target or JIT construction failed.
    #[error("JIT initialization failed: {0}")]
    Initialization(String),

    /// An operation was issued before the session was initialized.
    #[error("JIT session is not initialized")]
    NotInitialized,

    /// A second session was requested while one already exists.
    #[error("JIT session is already initialized")]
    AlreadyInitialized,

    /// Malformed or semantically invalid IR payload.
    #[error("{0}")]
    Parse(Diagnostic),

    /// IR payload exceeds the configured size limit.
    #[error("IR payload too large: {size} bytes (max {max})")]
    IrTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A function in the unit is already defined in the namespace.
    #[error("symbol `{0}` is already defined; reset the session to redefine it")]
    DuplicateSymbol(String),

    /// A function references a symbol that is neither in the unit nor in the namespace.
    #[error("undefined symbol `{symbol}` referenced by `{referenced_by}`")]
    UndefinedReference {
        /// Name of the missing symbol.
        symbol: String,
        /// Function containing the reference.
        referenced_by: String,
    },

    /// The backend failed to lower or emit machine code.
    #[error("code generation failed: {0}")]
    Codegen(String),

    /// The namespace rejected the unit for a reason other than a duplicate.
    #[error("registration failed: {0}")]
    Registration(String),

    /// Registration succeeded but the entry point is not in the namespace.
    #[error("symbol `{0}` not found")]
    SymbolNotFound(String),

    /// Clearing the namespace failed; the session may be inconsistent.
    #[error("reset failed: {0}")]
    Reset(String),
}

/// Coarse failure classes reported at the C boundary and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Initialization,
    Parse,
    DuplicateSymbol,
    Codegen,
    SymbolNotFound,
    Reset,
}

impl JitError {
    /// Classify this error into its failure class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JitError::Initialization(_)
            | JitError::NotInitialized
            | JitError::AlreadyInitialized => ErrorKind::Initialization,
            JitError::Parse(_) | JitError::IrTooLarge { .. } => ErrorKind::Parse,
            JitError::DuplicateSymbol(_) => ErrorKind::DuplicateSymbol,
            JitError::Codegen(_)
            | JitError::Registration(_)
            | JitError::UndefinedReference { .. } => ErrorKind::Codegen,
            JitError::SymbolNotFound(_) => ErrorKind::SymbolNotFound,
            JitError::Reset(_) => ErrorKind::Reset,
        }
    }

    /// Whether the session is still safe to use after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Initialization | ErrorKind::Reset)
    }
}

/// Run `f`, turning a panic into its message.
///
/// The backend asserts on some inputs the verifier accepts; those panics
/// must surface as errors instead of unwinding into the host.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_with_line() {
        let diag = Diagnostic {
            module: "jitmsg-3".to_string(),
            line: Some(12),
            message: "expected instruction".to_string(),
        };
        assert_eq!(diag.to_string(), "jitmsg-3:12: expected instruction");
    }

    #[test]
    fn test_diagnostic_without_line() {
        let diag = Diagnostic {
            module: "jitmsg-0".to_string(),
            line: None,
            message: "payload is not valid UTF-8".to_string(),
        };
        assert_eq!(diag.to_string(), "jitmsg-0: payload is not valid UTF-8");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(JitError::NotInitialized.kind(), ErrorKind::Initialization);
        assert_eq!(
            JitError::IrTooLarge { size: 2, max: 1 }.kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            JitError::UndefinedReference {
                symbol: "g".to_string(),
                referenced_by: "f".to_string(),
            }
            .kind(),
            ErrorKind::Codegen
        );
        assert_eq!(
            JitError::SymbolNotFound("f".to_string()).kind(),
            ErrorKind::SymbolNotFound
        );
    }

    #[test]
    fn test_catch_panic() {
        assert_eq!(catch_panic(|| 7), Ok(7));
        assert_eq!(
            catch_panic(|| -> i32 { panic!("lowering {} failed", "f") }),
            Err("lowering f failed".to_string())
        );
        assert_eq!(
            catch_panic(|| -> u8 { std::panic::panic_any(3_u8) }),
            Err("unknown panic".to_string())
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(JitError::DuplicateSymbol("g".to_string()).is_recoverable());
        assert!(!JitError::Reset("boom".to_string()).is_recoverable());
    }
}
