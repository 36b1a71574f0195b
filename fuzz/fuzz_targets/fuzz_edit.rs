#![no_main]

use libfuzzer_sys::fuzz_target;
use media_surgery::{detect_container, edit, strip, view, EditRequest, StripRequest};

fuzz_target!(|data: &[u8]| {
    let Ok(kind) = detect_container(data) else {
        return;
    };

    let requests = [
        EditRequest::new(),
        EditRequest::new().set("title", "Fuzzed").set("artist", "x".repeat(300)),
        EditRequest::new().delete("title").delete("comment"),
    ];
    for request in &requests {
        if let Ok(outcome) = edit(data, kind, request) {
            if let Some(out) = outcome.output {
                // Anything handed back must decode cleanly with the same codec
                let report = view(&out, kind).expect("edit output must re-decode");
                assert!(report.issues.is_empty());
                if request.is_empty() {
                    assert_eq!(out, data);
                }
            }
        }
    }

    for request in [
        StripRequest::all(),
        StripRequest::gps_only(),
        StripRequest::keep(["Copyright", "xmp"]),
    ] {
        if let Ok(outcome) = strip(data, kind, &request) {
            let report = view(&outcome.output, kind).expect("strip output must re-decode");
            assert!(report.issues.is_empty());
        }
    }
});
