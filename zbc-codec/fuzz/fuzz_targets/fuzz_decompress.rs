#![no_main]

use libfuzzer_sys::fuzz_target;
use zbc_codec::{BlockCodec, Level};

fuzz_target!(|data: &[u8]| {
    let codec = BlockCodec::new();

    // Arbitrary bytes must never panic or write past dst; errors are fine.
    let mut out = vec![0u8; 64 * 1024];
    let _ = codec.decompress(data, &mut out);
    let _ = zbc_codec::stored_level(data);

    // And anything we produce ourselves must round trip.
    if !data.is_empty() {
        let mut frame = vec![0u8; data.len()];
        let written = codec.compress(data, &mut frame, Level::L1);
        if written != data.len() {
            let mut round = vec![0u8; data.len()];
            codec
                .decompress(&frame[..written], &mut round)
                .expect("own frame must decode");
            assert_eq!(round, data);
        }
    }
});
