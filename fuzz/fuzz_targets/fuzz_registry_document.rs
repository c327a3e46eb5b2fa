#![no_main]

use flaggate::evaluator::evaluate_in;
use flaggate::{FetchOutcome, FlagSnapshot, IdentityClaims, RegistryDocument};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Registry answers are untrusted input: decoding and evaluating must never panic
    let Ok(document) = RegistryDocument::from_slice(data) else {
        return;
    };
    let snapshot = match document.into_outcome() {
        FetchOutcome::Full { flags, version } => FlagSnapshot::from_flags(flags, version),
        FetchOutcome::Delta {
            upserted,
            removed,
            version,
        } => FlagSnapshot::from_flags(Vec::new(), "base").apply_delta(upserted, &removed, version),
        FetchOutcome::NotModified => return,
    };

    let claims = IdentityClaims::for_subject("fuzz-subject").with_role("member");
    for flag in snapshot.flags() {
        let _ = evaluate_in(&snapshot, &claims, &flag.key);
    }
});
