// Copyright (c) 2026 NoiseFS
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(filter) = noisefs::networking::bloom::BloomFilter::unmarshal(data) {
        assert_eq!(filter.marshal(), data);
    }
});
