#![no_main]

use libfuzzer_sys::fuzz_target;
use media_surgery::{detect_container, view, ContainerKind};

fuzz_target!(|data: &[u8]| {
    // Detection must agree with decoding
    if let Ok(kind) = detect_container(data) {
        assert!(view(data, kind).is_ok());
    }

    // Every codec must reject or leniently decode anything without panicking
    for kind in ContainerKind::all() {
        let _ = view(data, *kind);
    }
});
