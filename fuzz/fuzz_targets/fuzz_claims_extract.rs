#![no_main]

use flaggate::ClaimsExtractor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Claims extraction over arbitrary JSON must return errors, never panic
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Ok(claims) = ClaimsExtractor::default().extract(&value) {
            let _ = claims.has_feature("reports.export");
            let _ = claims.claim("org.plan");
        }
    }
});
