#![no_main]

use std::cell::RefCell;

use jitmsg::{JitError, Session};
use libfuzzer_sys::fuzz_target;

thread_local! {
    static SESSION: RefCell<Session> =
        RefCell::new(Session::initialize().expect("host session"));
}

fuzz_target!(|data: &[u8]| {
    SESSION.with_borrow_mut(|session| {
        let issued = session.units_issued();

        // Property 1: parsing must never panic, only diagnose
        match session.parse(data) {
            Ok(mut unit) => {
                assert!(!unit.functions().is_empty());
                // Property 2: verified units survive the optimizer
                if let Err(e) = session.optimize(&mut unit) {
                    assert!(matches!(e, JitError::Codegen(_)), "unexpected {e:?}");
                }
            }
            Err(e) => assert!(e.is_recoverable()),
        }

        // Property 3: every attempt consumes exactly one unit name
        assert_eq!(session.units_issued(), issued + 1);
        // Property 4: parsing alone never registers anything
        assert_eq!(session.symbol_count(), 0);
    });
});
