//! Randomness and wall-clock collaborators.

use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Host services the VFS forwards to.
pub trait OsCallback: Send + Sync + 'static {
    /// Fill `buf` with entropy.
    fn random(buf: &mut [u8]);
    /// Milliseconds since the Unix epoch.
    fn epoch_timestamp_in_ms() -> i64;
}

/// [`OsCallback`] backed by the standard library and the thread-local RNG.
pub struct NativeOsCallback;

impl OsCallback for NativeOsCallback {
    fn random(buf: &mut [u8]) {
        rand::rng().fill_bytes(buf);
    }

    fn epoch_timestamp_in_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// xorshift* generator, deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    const MULTIPLIER: u64 = 2685821657736338717;

    /// A zero seed would stick at zero, so it is replaced by a fixed constant.
    pub fn new(seed: u64) -> Self {
        XorShiftRng {
            state: if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 17;
        self.state.wrapping_mul(Self::MULTIPLIER)
    }

    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}
