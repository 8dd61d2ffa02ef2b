#![no_main]
use libfuzzer_sys::fuzz_target;
use std::net::SocketAddr;

// Mirrors how NetworkNode::add_seed_peer and the PeerList payload handler
// turn "host:port" strings from a possibly-hostile peer into a
// SocketAddr to dial. Never panic, regardless of how malformed the
// string is.
fuzz_target!(|data: &str| {
    let _: Result<SocketAddr, _> = data.parse();
});
