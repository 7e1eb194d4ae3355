#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes through the canonicalizer; it must reject or
    // accept, never panic, and accepted output must be idempotent.
    if let Ok(canon) = ahgate::canonicalize(data) {
        let again = ahgate::canonicalize(&canon.bytes).expect("canonical form re-parses");
        assert_eq!(canon.bytes, again.bytes);
        assert_eq!(canon.final_dst, again.final_dst);
    }
});
