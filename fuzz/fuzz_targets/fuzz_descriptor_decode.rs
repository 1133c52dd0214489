// Copyright (c) 2026 NoiseFS
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic; valid parses must re-encode to the same
    // bytes (bit-exact wire format).
    if let Ok(descriptor) = noisefs::core::descriptors::Descriptor::decode(data) {
        assert_eq!(descriptor.encode(), data);
    }
});
