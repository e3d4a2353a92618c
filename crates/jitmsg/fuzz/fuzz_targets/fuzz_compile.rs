#![no_main]

use std::cell::RefCell;

use jitmsg::Session;
use libfuzzer_sys::fuzz_target;

thread_local! {
    static SESSION: RefCell<Session> =
        RefCell::new(Session::initialize().expect("host session"));
}

fuzz_target!(|data: &[u8]| {
    SESSION.with_borrow_mut(|session| {
        let Ok(text) = std::str::from_utf8(data) else {
            return;
        };
        // The entry name is taken from the first function header, if any.
        let entry = text
            .split_once('%')
            .and_then(|(_, rest)| rest.split(|c: char| !c.is_alphanumeric() && c != '_').next())
            .unwrap_or("f")
            .to_string();

        // Compilation either succeeds or fails cleanly; the code is never run.
        match session.compile(&entry, data) {
            Ok(function) => {
                assert!(!function.as_ptr().is_null());
                assert!(session.is_defined(&entry));
            }
            Err(e) => assert!(e.is_recoverable(), "unexpected {e:?}"),
        }

        // Failed units leave nothing resolvable behind after a reset.
        session.reset().expect("reset");
        assert_eq!(session.symbol_count(), 0);
    });
});
