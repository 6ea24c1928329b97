// Cryptographically secure RNG for wipe patterns and key material.
//
// Random-fill passes must be unpredictable to defeat pattern-aware recovery,
// so the fill data comes from the OS CSPRNG via ring rather than a userspace
// PRNG. Sampling offsets in the verification engine do not need this and use
// the plain `rand` crate instead.

use anyhow::{anyhow, Result};
use ring::rand::{SecureRandom, SystemRandom};

pub struct SecureRng {
    rng: SystemRandom,
}

impl Default for SecureRng {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureRng {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    pub fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        self.rng
            .fill(dest)
            .map_err(|_| anyhow!("system CSPRNG failed"))
    }

    /// Fresh random secret of `len` bytes, used for HMAC signing keys.
    pub fn generate_secret(&self, len: usize) -> Result<Vec<u8>> {
        let mut secret = vec![0u8; len];
        self.fill_bytes(&mut secret)?;
        Ok(secret)
    }
}
