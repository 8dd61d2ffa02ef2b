#![no_main]
use libfuzzer_sys::fuzz_target;
use phinet::core::codec::{verify_signed_message, SignedMessage};

// A signed message is the shape gossip actually hands the codec:
// envelope plus sender key and signature. Malformed JSON should fail to
// deserialize; a well-formed-but-tampered message should fail signature
// verification, never panic.
fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = serde_json::from_slice::<SignedMessage>(data) {
        let _ = verify_signed_message(&msg);
    }
});
