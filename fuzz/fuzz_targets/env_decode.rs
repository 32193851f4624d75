#![no_main]

use fdcolor::codec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Environment values are arbitrary bytes; only UTF-8 reaches the decoder
    if let Ok(input) = std::str::from_utf8(data) {
        let set = codec::decode(input);
        assert_eq!(codec::decode(&codec::encode(&set)), set);
    }
});
