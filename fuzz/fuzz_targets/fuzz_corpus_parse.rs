// Copyright (c) 2026 NoiseFS
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Best-effort: ensure corpus parsing does not panic on arbitrary input.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = noisefs::core::pool::CorpusFile::parse(s);
    }
});
