#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for icv_len in [12usize, 16, 32] {
        if let Ok(hdr) = ahgate::AhHeader::parse(data, icv_len) {
            let encoded = hdr.encode().expect("parsed header re-encodes");
            assert_eq!(&encoded, &data[..encoded.len()]);
        }
    }
});
