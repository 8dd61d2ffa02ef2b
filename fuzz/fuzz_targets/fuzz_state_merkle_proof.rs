#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use phinet::core::consensus::signing::merkle_root;
use phinet::core::types::Judgment;

#[derive(Arbitrary, Debug)]
struct FuzzJudgment {
    id: String,
    payload: Vec<u8>,
    produced_at: i64,
}

// Arbitrary judgment lists, including ones with duplicate or pathological
// ids, fed into the same Merkle root builder a proposal packs its
// judgments through. Duplicates should be rejected cleanly, never panic.
fuzz_target!(|judgments: Vec<FuzzJudgment>| {
    let judgments: Vec<Judgment> = judgments
        .into_iter()
        .map(|j| Judgment {
            id: j.id,
            payload: j.payload,
            produced_at: j.produced_at,
        })
        .collect();
    let _ = merkle_root(&judgments);
});
