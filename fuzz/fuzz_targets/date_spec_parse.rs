#![no_main]

use libfuzzer_sys::fuzz_target;
use chrono::Datelike;
use lifeline_core::DateSpec;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(spec) = DateSpec::parse(&raw) {
        assert!(spec.start() <= spec.end());
        assert!(spec.span_days() >= 1);
        if (0..=9999).contains(&spec.start().year()) && (0..=9999).contains(&spec.end().year()) {
            let reparsed = DateSpec::parse(&spec.to_string()).expect("display output must parse");
            assert_eq!(reparsed, spec);
        }
        assert!(spec.contains(&spec));
    }
});
