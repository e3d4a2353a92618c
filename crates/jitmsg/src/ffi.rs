//! C-callable surface over one process-wide [`Session`].
//!
//! Every failure is reduced to a scalar signal (null pointer or nonzero
//! status). The diagnostic goes to standard error as `Error: <message>` and
//! to `tracing` at error level, since the host may not install a subscriber.
//!
//! Returned strings are NUL-terminated, cached for the life of the process
//! and must not be freed by the caller. Compiled addresses stay valid until
//! the next [`jitmsg_reset`] or [`jitmsg_shutdown`].
//!
//! Mutating calls serialize on an internal lock, so hosts may call from any
//! thread; compiling on one thread while invoking code that another thread
//! is resetting is still the host's responsibility.
//!
//! No panic unwinds out of an entry point. One that escapes while the lock
//! is held poisons the session; calls then fail until [`jitmsg_shutdown`].

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::error::{JitError, catch_panic};
use crate::session::Session;
use crate::target;

const OK: c_int = 0;
const FAILED: c_int = 1;

static SESSION: Mutex<SessionSlot> = Mutex::new(SessionSlot(None));

static HOST_CPU: OnceLock<CString> = OnceLock::new();
static CPU_FEATURES: OnceLock<CString> = OnceLock::new();
static TARGET_TRIPLE: OnceLock<CString> = OnceLock::new();
static DATA_LAYOUT: OnceLock<CString> = OnceLock::new();

struct SessionSlot(Option<Session>);

// SAFETY: The session owns a JIT module holding raw pointers into its code
// memory. It is only ever touched through `SESSION`'s lock, one thread at a
// time, and none of its state is tied to the thread that created it.
#[expect(unsafe_code)]
unsafe impl Send for SessionSlot {}

fn lock_session() -> Result<MutexGuard<'static, SessionSlot>, JitError> {
    SESSION.lock().map_err(|_| {
        JitError::Reset("a previous call panicked; shut down and reinitialize".to_string())
    })
}

/// Poison the session lock the way a panicking call would.
#[cfg(test)]
pub(crate) fn poison_for_testing() {
    let _ = std::thread::spawn(|| {
        let _slot = SESSION.lock();
        panic!("poisoning the JIT session lock");
    })
    .join();
}

/// Run an entry point body, returning `failed` if it panics.
fn guarded<T>(entry: &str, failed: T, body: impl FnOnce() -> T) -> T {
    catch_panic(body).unwrap_or_else(|panic| {
        report(&JitError::Reset(format!(
            "{entry} panicked: {panic}; shut down and reinitialize"
        )));
        failed
    })
}

fn report(error: &JitError) {
    tracing::error!(kind = ?error.kind(), error = %error, "JIT call failed");
    eprintln!("Error: {error}");
}

fn report_argument(message: &str) {
    tracing::error!(reason = message, "Invalid JIT call argument");
    eprintln!("Error: {message}");
}

fn cached(cell: &'static OnceLock<CString>, value: impl FnOnce() -> String) -> *const c_char {
    cell.get_or_init(|| CString::new(value()).unwrap_or_default())
        .as_ptr()
}

/// Read a session-derived string, or null when no session exists.
///
/// The value is cached on first use but only handed out while a session is
/// alive.
fn session_string(
    cell: &'static OnceLock<CString>,
    value: impl FnOnce(&Session) -> String,
) -> *const c_char {
    let slot = match lock_session() {
        Ok(slot) => slot,
        Err(e) => {
            report(&e);
            return ptr::null();
        }
    };
    match &slot.0 {
        Some(session) => cached(cell, || value(session)),
        None => {
            report(&JitError::NotInitialized);
            ptr::null()
        }
    }
}

/// Create the process-wide session targeting the host.
///
/// Returns 0 on success and nonzero if construction fails or a session
/// already exists.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_initialize() -> c_int {
    guarded("jitmsg_initialize", FAILED, || {
        let mut slot = match lock_session() {
            Ok(slot) => slot,
            Err(e) => {
                report(&e);
                return FAILED;
            }
        };
        if slot.0.is_some() {
            report(&JitError::AlreadyInitialized);
            return FAILED;
        }
        match Session::initialize() {
            Ok(session) => {
                slot.0 = Some(session);
                OK
            }
            Err(e) => {
                report(&e);
                FAILED
            }
        }
    })
}

/// 1 if a session exists, 0 otherwise.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_is_initialized() -> c_int {
    guarded("jitmsg_is_initialized", 0, || {
        lock_session().map_or(0, |slot| c_int::from(slot.0.is_some()))
    })
}

/// Host CPU name. Does not require a session.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_host_cpu() -> *const c_char {
    guarded("jitmsg_host_cpu", ptr::null(), || {
        cached(&HOST_CPU, || target::host_cpu_name().to_string())
    })
}

/// Host CPU feature string (`+feat,-feat,...`). Does not require a session.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_cpu_features() -> *const c_char {
    guarded("jitmsg_cpu_features", ptr::null(), || {
        cached(&CPU_FEATURES, || target::host_cpu_features().to_string())
    })
}

/// Target triple of the session, or null before initialization.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_target_triple() -> *const c_char {
    guarded("jitmsg_target_triple", ptr::null(), || {
        session_string(&TARGET_TRIPLE, |session| session.target_triple().to_string())
    })
}

/// Data layout of the session, or null before initialization.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_data_layout() -> *const c_char {
    guarded("jitmsg_data_layout", ptr::null(), || {
        session_string(&DATA_LAYOUT, |session| session.data_layout().to_string())
    })
}

/// Compile `ir` and return the address of the function named `name`.
///
/// Returns null on any failure, with the diagnostic on standard error.
///
/// # Safety
///
/// `name` and `ir` must each be null or point to a NUL-terminated string
/// that stays valid for the duration of the call.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub unsafe extern "C" fn jitmsg_compile(name: *const c_char, ir: *const c_char) -> *const c_void {
    guarded("jitmsg_compile", ptr::null(), || {
        if name.is_null() || ir.is_null() {
            report_argument("jitmsg_compile: name and IR must not be null");
            return ptr::null();
        }
        // SAFETY: both pointers are non-null and NUL-terminated per the contract.
        let (name, ir) = unsafe { (CStr::from_ptr(name), CStr::from_ptr(ir)) };
        let Ok(name) = name.to_str() else {
            report_argument("jitmsg_compile: entry name is not valid UTF-8");
            return ptr::null();
        };

        let mut slot = match lock_session() {
            Ok(slot) => slot,
            Err(e) => {
                report(&e);
                return ptr::null();
            }
        };
        let Some(session) = slot.0.as_mut() else {
            report(&JitError::NotInitialized);
            return ptr::null();
        };

        match session.compile(name, ir.to_bytes()) {
            Ok(function) => function.as_ptr().cast(),
            Err(e) => {
                report(&e);
                ptr::null()
            }
        }
    })
}

/// Drop every compiled symbol so names can be defined again.
///
/// Returns 0 on success and nonzero before initialization or when the
/// session state is unusable. A failed reset damages the session: later
/// compiles and resets fail until [`jitmsg_shutdown`].
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_reset() -> c_int {
    guarded("jitmsg_reset", FAILED, || {
        let mut slot = match lock_session() {
            Ok(slot) => slot,
            Err(e) => {
                report(&e);
                return FAILED;
            }
        };
        match slot.0.as_mut() {
            Some(session) => match session.reset() {
                Ok(()) => OK,
                Err(e) => {
                    report(&e);
                    FAILED
                }
            },
            None => {
                report(&JitError::NotInitialized);
                FAILED
            }
        }
    })
}

/// Destroy the session and unmap all compiled code.
///
/// Also recovers from a poisoned or damaged session, after which
/// [`jitmsg_initialize`] may be called again. Returns nonzero if there was
/// no session.
#[unsafe(no_mangle)]
#[expect(unsafe_code)]
pub extern "C" fn jitmsg_shutdown() -> c_int {
    guarded("jitmsg_shutdown", FAILED, || {
        let mut slot = SESSION.lock().unwrap_or_else(PoisonError::into_inner);
        let session = slot.0.take();
        drop(slot);
        SESSION.clear_poison();

        match session {
            Some(session) => {
                tracing::info!(generation = session.generation(), "Shut down JIT session");
                drop(session);
                OK
            }
            None => {
                report(&JitError::NotInitialized);
                FAILED
            }
        }
    })
}
