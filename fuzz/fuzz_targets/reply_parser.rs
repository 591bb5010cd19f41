//! Fuzz target for instrument reply parsing.
//!
//! Tests:
//! - Arbitrary text never panics any parser
//! - A successful strict parse is finite and agrees with the lenient parser
//! - Trace dumps parse to one value per comma-separated field

#![no_main]

use iv_sweep::hardware::reply::{parse_error_reply, parse_numeric, parse_scientific, parse_values};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(value) = parse_scientific(text) {
        assert!(value.is_finite());
        assert_eq!(parse_numeric(text).ok(), Some(value));
    }

    if let Ok(values) = parse_values(text) {
        let fields = if text.trim().is_empty() {
            0
        } else {
            text.trim().split(',').count()
        };
        assert_eq!(values.len(), fields);
    }

    let _ = parse_error_reply(text);
});
