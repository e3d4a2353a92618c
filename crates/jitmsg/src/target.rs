//! Host target facts.
//!
//! Static facts about the machine the process runs on. The host-only facts
//! (CPU name, feature string) are computed on first access and cached for
//! the rest of the process; the triple and data layout are derived from a
//! session's resolved target (see [`crate::Session::target_triple`]).
//!
//! # Feature string
//!
//! ```text
//! +sse3,+ssse3,+cmpxchg16b,+sse41,+sse42,-avx512f,...
//! ```
//!
//! Entries follow the backend's flag enumeration order, not alphabetical.

use std::sync::OnceLock;

use cranelift_codegen::ir::Endianness;
use cranelift_codegen::isa::{OwnedTargetIsa, TargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use target_lexicon::{Architecture, BinaryFormat};

use crate::error::JitError;

/// Optimization level every session compiles with (Cranelift's strongest).
pub const OPT_LEVEL: &str = "speed_and_size";

/// Name reported when the host CPU cannot be identified.
pub const GENERIC_CPU: &str = "generic";

static HOST_CPU_NAME: OnceLock<String> = OnceLock::new();
static HOST_CPU_FEATURES: OnceLock<String> = OnceLock::new();

/// Build the native ISA with the fixed aggressive optimization settings.
pub(crate) fn host_isa() -> Result<OwnedTargetIsa, JitError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", OPT_LEVEL)
        .map_err(|e| JitError::Initialization(format!("opt_level: {e}")))?;
    flag_builder
        .set("enable_verifier", "true")
        .map_err(|e| JitError::Initialization(format!("enable_verifier: {e}")))?;
    flag_builder
        .set("enable_alias_analysis", "true")
        .map_err(|e| JitError::Initialization(format!("enable_alias_analysis: {e}")))?;

    let isa_builder = cranelift_native::builder()
        .map_err(|e| JitError::Initialization(format!("host ISA not supported: {e}")))?;
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| JitError::Initialization(format!("ISA construction: {e}")))
}

/// Host CPU identifier, cached after the first call.
pub fn host_cpu_name() -> &'static str {
    HOST_CPU_NAME.get_or_init(|| detect_cpu_name().unwrap_or_else(|| GENERIC_CPU.to_string()))
}

/// Host CPU feature string (`+feat,-feat,...`), cached after the first call.
///
/// Empty when the host ISA is not supported by the backend.
pub fn host_cpu_features() -> &'static str {
    HOST_CPU_FEATURES.get_or_init(|| match host_isa() {
        Ok(isa) => feature_string(isa.as_ref()),
        Err(e) => {
            tracing::warn!(error = %e, "Could not detect host CPU features");
            String::new()
        }
    })
}

/// Render the boolean ISA flags of `isa` as a feature string.
pub fn feature_string(isa: &dyn TargetIsa) -> String {
    isa.isa_flags()
        .iter()
        .filter_map(|flag| {
            let enabled = flag.as_bool()?;
            let name = flag.name.strip_prefix("has_").unwrap_or(flag.name);
            Some(format!("{}{name}", if enabled { '+' } else { '-' }))
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Describe the in-memory data layout of `isa` in LLVM's layout notation.
pub fn data_layout(isa: &dyn TargetIsa) -> String {
    let triple = isa.triple();
    let pointer_bits = isa.pointer_bits();

    let mut parts = vec![
        match isa.endianness() {
            Endianness::Little => "e",
            Endianness::Big => "E",
        }
        .to_string(),
    ];
    match triple.binary_format {
        BinaryFormat::Elf => parts.push("m:e".to_string()),
        BinaryFormat::Macho => parts.push("m:o".to_string()),
        BinaryFormat::Coff => parts.push("m:w".to_string()),
        _ => {}
    }
    parts.push(format!("p:{pointer_bits}:{pointer_bits}"));
    parts.push("i64:64".to_string());
    parts.push("i128:128".to_string());
    parts.push(
        match triple.architecture {
            Architecture::X86_64 => "n8:16:32:64",
            _ if pointer_bits == 32 => "n32",
            _ => "n32:64",
        }
        .to_string(),
    );
    parts.push(
        match triple.architecture {
            Architecture::S390x => "S64",
            _ => "S128",
        }
        .to_string(),
    );
    parts.join("-")
}

#[cfg(target_arch = "x86_64")]
#[expect(unsafe_code)]
#[allow(unused_unsafe)]
fn detect_cpu_name() -> Option<String> {
    use std::arch::x86_64::__cpuid;

    // SAFETY: CPUID is available on every x86_64 processor; the extended
    // brand leaves are only read after checking the maximum extended leaf.
    let max_extended = unsafe { __cpuid(0x8000_0000) }.eax;
    if max_extended < 0x8000_0004 {
        return None;
    }

    let mut brand = Vec::with_capacity(48);
    for leaf in 0x8000_0002_u32..=0x8000_0004 {
        // SAFETY: leaf is within the range reported above.
        let regs = unsafe { __cpuid(leaf) };
        for reg in [regs.eax, regs.ebx, regs.ecx, regs.edx] {
            brand.extend_from_slice(&reg.to_le_bytes());
        }
    }

    let name = String::from_utf8_lossy(&brand);
    let name = name.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_cpu_name() -> Option<String> {
    None
}
