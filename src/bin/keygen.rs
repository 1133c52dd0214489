// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Generate the relay X25519 identity for a data directory and print the
//! public key hex (shared with relay operators out of band).

use anyhow::Result;
use noisefs::networking::relay::RelayIdentity;

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let identity = RelayIdentity::load_or_create(&out_dir)
        .map_err(|e| anyhow::anyhow!("keygen failed: {e}"))?;
    println!("{}", hex::encode(identity.public_key()));
    Ok(())
}
