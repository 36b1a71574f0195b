#![no_main]

use libfuzzer_sys::fuzz_target;
use media_surgery::xmp::extract_fields;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes, valid UTF-8 or not, must never panic the XMP reader
    let _ = extract_fields(data);
});
