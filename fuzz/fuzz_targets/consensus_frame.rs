#![no_main]
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes off the wire, fed straight into the frame parser the
// transport's read loop calls before anything is trusted. Should never
// panic, regardless of how malformed the input is.
fuzz_target!(|data: &[u8]| {
    let _ = phinet::core::codec::parse(data, 0);
});
