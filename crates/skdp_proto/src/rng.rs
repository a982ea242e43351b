//! Randomness capability.
//!
//! Each session owns its generator; there is no process-wide singleton.
//! The OS source is the production implementation; the fixed stream gives
//! deterministic sessions for tests.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::SkdpError;

/// Sessions move between threads whole, so the generator travels with them.
pub trait SecureRandom: Send {
    /// Fill `out` with cryptographically secure bytes.
    fn fill(&mut self, out: &mut [u8]) -> Result<(), SkdpError>;
}

/// Operating-system entropy source.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&mut self, out: &mut [u8]) -> Result<(), SkdpError> {
        OsRng
            .try_fill_bytes(out)
            .map_err(|_| SkdpError::RandomFailure)
    }
}

/// Replays a fixed byte stream, then fails.
pub struct FixedRandom {
    stream: Vec<u8>,
    position: usize,
}

impl FixedRandom {
    pub fn new(stream: Vec<u8>) -> Self {
        Self {
            stream,
            position: 0,
        }
    }
}

impl SecureRandom for FixedRandom {
    fn fill(&mut self, out: &mut [u8]) -> Result<(), SkdpError> {
        let remaining = self.stream.len() - self.position;
        if remaining < out.len() {
            return Err(SkdpError::RandomFailure);
        }
        out.copy_from_slice(&self.stream[self.position..self.position + out.len()]);
        self.position += out.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_stream_replays_then_fails() {
        let mut rng = FixedRandom::new(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 3];
        rng.fill(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        let mut buf = [0u8; 2];
        assert_eq!(rng.fill(&mut buf), Err(SkdpError::RandomFailure));
    }

    #[test]
    fn os_source_fills() {
        let mut rng = OsRandom;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        rng.fill(&mut a).unwrap();
        rng.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
