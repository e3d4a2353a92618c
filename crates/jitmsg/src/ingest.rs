//! IR ingestion: textual Cranelift IR to verified functions.
//!
//! Every payload is parsed into a fresh, isolated [`CompilationUnit`] that
//! owns its functions outright; nothing is shared with other units or with
//! the session until registration. Each unit receives a synthetic name
//! (`<prefix>-<n>`) from a [`ModuleNames`] sequence, which never reuses a
//! number, even for payloads that fail to parse.
//!
//! ```text
//! function %add(i64, i64) -> i64 {
//! block0(v0: i64, v1: i64):
//!     v2 = iadd v0, v1
//!     return v2
//! }
//! ```

use std::str::FromStr;

use cranelift_codegen::ir::{Function, UserFuncName};
use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::verify_function;
use cranelift_reader::{ParseOptions, parse_test};
use rustc_hash::FxHashSet;
use target_lexicon::Triple;

use crate::error::{Diagnostic, JitError};
use crate::types::JitConfig;

/// Strictly increasing generator of compilation-unit names.
#[derive(Debug, Clone)]
pub struct ModuleNames {
    prefix: String,
    next: u64,
}

impl ModuleNames {
    /// Create a generator producing `<prefix>-0`, `<prefix>-1`, ...
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    /// Allocate the next name. Names are never handed out twice.
    pub fn next_name(&mut self) -> String {
        let name = format!("{}-{}", self.prefix, self.next);
        self.next = self.next.saturating_add(1);
        name
    }

    /// Number of names allocated so far.
    pub fn issued(&self) -> u64 {
        self.next
    }
}

/// One parsed and verified IR payload, ready for optimization.
#[derive(Debug)]
pub struct CompilationUnit {
    name: String,
    functions: Vec<Function>,
}

impl CompilationUnit {
    /// Synthetic unit name (`<prefix>-<n>`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Functions defined by the payload, in source order.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Symbol names the unit will define once registered.
    pub fn symbols(&self) -> impl Iterator<Item = String> + '_ {
        self.functions.iter().map(|func| symbol_name(&func.name))
    }

    pub(crate) fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    pub(crate) fn into_functions(self) -> Vec<Function> {
        self.functions
    }
}

/// Exported symbol name for a CLIF function name.
///
/// `%add` becomes `add`; user names such as `u0:3` keep their printed form.
pub fn symbol_name(name: &UserFuncName) -> String {
    let printed = name.to_string();
    match printed.strip_prefix('%') {
        Some(stripped) => stripped.to_string(),
        None => printed,
    }
}

/// Parse and verify `ir` as the unit named `module`.
///
/// Functions without an explicit calling convention get the host's default
/// one, so resolved addresses can be called as `extern "C"` functions.
pub fn parse(
    ir: &[u8],
    module: String,
    isa: &dyn TargetIsa,
    config: &JitConfig,
) -> Result<CompilationUnit, JitError> {
    if config.is_ir_oversized(ir.len()) {
        return Err(JitError::IrTooLarge {
            size: ir.len(),
            max: config.max_ir_size,
        });
    }

    let text = match std::str::from_utf8(ir) {
        Ok(text) => text,
        Err(e) => return Err(diagnostic(module, None, format!("payload is not valid UTF-8: {e}"))),
    };

    check_target_headers(text, &module, isa)?;

    let options = ParseOptions {
        default_calling_convention: isa.default_call_conv(),
        ..ParseOptions::default()
    };
    let functions: Vec<Function> = match parse_test(text, options) {
        Ok(file) => file.functions.into_iter().map(|(func, _)| func).collect(),
        Err(e) => {
            let line = (e.location.line_number > 0).then_some(e.location.line_number);
            return Err(diagnostic(module, line, e.message));
        }
    };

    if functions.is_empty() {
        return Err(diagnostic(module, None, "payload defines no functions".to_string()));
    }

    let mut seen = FxHashSet::default();
    for func in &functions {
        let symbol = symbol_name(&func.name);
        if !seen.insert(symbol.clone()) {
            return Err(diagnostic(
                module,
                None,
                format!("function `{symbol}` is defined more than once"),
            ));
        }
    }

    if config.verify_ir {
        for func in &functions {
            if let Err(errors) = verify_function(func, isa) {
                return Err(diagnostic(
                    module,
                    None,
                    format!("invalid function `{}`:\n{errors}", symbol_name(&func.name)),
                ));
            }
        }
    }

    tracing::debug!(
        module = %module,
        functions = functions.len(),
        bytes = ir.len(),
        "Parsed IR payload"
    );

    Ok(CompilationUnit {
        name: module,
        functions,
    })
}

fn diagnostic(module: String, line: Option<usize>, message: String) -> JitError {
    JitError::Parse(Diagnostic {
        module,
        line,
        message,
    })
}

/// Reject `target` header lines naming an architecture other than `isa`'s.
///
/// The reader silently skips targets whose backend is not compiled in, so
/// the header is checked on the text itself.
fn check_target_headers(text: &str, module: &str, isa: &dyn TargetIsa) -> Result<(), JitError> {
    let host = isa.triple().architecture;
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with(';')
            || line.starts_with("test ")
            || line.starts_with("set ")
        {
            continue;
        }
        // Headers end at the first declaration.
        let Some(rest) = line.strip_prefix("target ") else {
            break;
        };
        let Some(Ok(named)) = rest.split_whitespace().next().map(Triple::from_str) else {
            continue;
        };
        if named.architecture != host {
            return Err(diagnostic(
                module.to_string(),
                Some(index.saturating_add(1)),
                format!(
                    "payload targets `{}`, but this session generates code for `{host}`",
                    named.architecture
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::host_isa;

    const ADD: &str = "function %add(i64, i64) -> i64 {
block0(v0: i64, v1: i64):
    v2 = iadd v0, v1
    return v2
}
";

    fn parse_str(ir: &str) -> Result<CompilationUnit, JitError> {
        let isa = host_isa().expect("host ISA");
        parse(
            ir.as_bytes(),
            "test-0".to_string(),
            isa.as_ref(),
            &JitConfig::default(),
        )
    }

    fn expect_diagnostic(result: Result<CompilationUnit, JitError>) -> Diagnostic {
        match result {
            Err(JitError::Parse(diag)) => diag,
            other => panic!("expected parse diagnostic, got {other:?}"),
        }
    }

    #[test]
    fn test_module_names_increase() {
        let mut names = ModuleNames::new("jitmsg");
        assert_eq!(names.next_name(), "jitmsg-0");
        assert_eq!(names.next_name(), "jitmsg-1");
        assert_eq!(names.next_name(), "jitmsg-2");
        assert_eq!(names.issued(), 3);
    }

    #[test]
    fn test_parse_single_function() {
        let unit = parse_str(ADD).expect("valid IR");
        assert_eq!(unit.name(), "test-0");
        assert_eq!(unit.functions().len(), 1);
        assert_eq!(unit.symbols().collect::<Vec<_>>(), vec!["add".to_string()]);
    }

    #[test]
    fn test_parse_uses_host_calling_convention() {
        let isa = host_isa().expect("host ISA");
        let unit = parse_str(ADD).expect("valid IR");
        assert_eq!(
            unit.functions()[0].signature.call_conv,
            isa.default_call_conv()
        );
    }

    #[test]
    fn test_parse_error_has_location() {
        let diag = expect_diagnostic(parse_str(
            "function %bad(i64) -> i64 {\nblock0(v0: i64):\n    v1 = frobnicate v0\n    return v1\n}\n",
        ));
        assert_eq!(diag.module, "test-0");
        assert_eq!(diag.line, Some(3));
        assert!(!diag.message.is_empty());
    }

    #[test]
    fn test_parse_rejects_empty_payload() {
        let diag = expect_diagnostic(parse_str(""));
        assert!(diag.message.contains("no functions"));
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        let isa = host_isa().expect("host ISA");
        let diag = expect_diagnostic(parse(
            &[0x66, 0xff, 0xfe],
            "test-1".to_string(),
            isa.as_ref(),
            &JitConfig::default(),
        ));
        assert_eq!(diag.line, None);
        assert!(diag.message.contains("UTF-8"));
    }

    #[test]
    fn test_parse_rejects_duplicate_function() {
        let diag = expect_diagnostic(parse_str(&format!("{ADD}\n{ADD}")));
        assert!(diag.message.contains("more than once"));
    }

    #[test]
    fn test_parse_rejects_unverifiable_function() {
        // Returns an i32 from a function declared to return i64.
        let diag = expect_diagnostic(parse_str(
            "function %wrong(i32) -> i64 {\nblock0(v0: i32):\n    return v0\n}\n",
        ));
        assert_eq!(diag.module, "test-0");
        assert!(!diag.message.is_empty());
    }

    #[test]
    fn test_parse_rejects_foreign_target() {
        let foreign = if cfg!(target_arch = "aarch64") {
            "x86_64"
        } else {
            "aarch64"
        };
        let diag = expect_diagnostic(parse_str(&format!("; foreign\ntarget {foreign}\n{ADD}")));
        assert_eq!(diag.line, Some(2));
        assert!(diag.message.contains(foreign), "{}", diag.message);
    }

    #[test]
    fn test_parse_accepts_host_target() {
        let unit = parse_str(&format!("target {}\n{ADD}", std::env::consts::ARCH))
            .expect("host target header");
        assert_eq!(unit.functions().len(), 1);
    }

    #[test]
    fn test_parse_rejects_oversized_payload() {
        let isa = host_isa().expect("host ISA");
        let config = JitConfig {
            max_ir_size: 8,
            ..Default::default()
        };
        let err = parse(ADD.as_bytes(), "test-2".to_string(), isa.as_ref(), &config)
            .expect_err("oversized");
        assert!(matches!(err, JitError::IrTooLarge { max: 8, .. }));
    }

    #[test]
    fn test_symbol_name_strips_sigil() {
        let name = UserFuncName::testcase("square");
        assert_eq!(symbol_name(&name), "square");
        let user = UserFuncName::user(0, 7);
        assert_eq!(symbol_name(&user), "u0:7");
    }
}
