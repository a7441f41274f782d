//! Single bit flip strategy.
//!
//! Each mutant is the seed with exactly one bit inverted. The record kept per
//! mutant is the absolute bit offset of that flip.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::Mutator;
use crate::error::FsError;
use crate::error::Result;
use crate::mask::Mapping;

/// Flips one pseudo-random bit per mutant.
pub struct BitFlip {
    rng: StdRng,
    flips: HashMap<String, u64>,
}

impl BitFlip {
    /// Create a strategy with a deterministic random sequence.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            flips: HashMap::new(),
        }
    }

    /// Recorded bit offset for `name`, if any.
    pub fn flip_for(&self, name: &str) -> Option<u64> {
        self.flips.get(name).copied()
    }
}

impl Mutator for BitFlip {
    fn generate(&mut self, data: &[u8], mapping: Option<&Mapping>, name: &str) -> Result<()> {
        let bytes = mapping.map_or(data.len(), Mapping::len) as u64;
        let domain = bytes * 8;
        if domain == 0 {
            return Err(FsError::DomainEmpty);
        }

        let drawn = self.rng.random_range(0..domain);
        let flip = match mapping {
            Some(mapping) => {
                let slot = (drawn / 8) as usize;
                let physical = mapping.physical(slot).ok_or(FsError::DomainEmpty)? as u64;
                physical * 8 + drawn % 8
            }
            None => drawn,
        };

        self.flips.insert(name.to_string(), flip);
        Ok(())
    }

    fn synthesize(&self, data: &[u8], name: &str) -> Vec<u8> {
        let mut out = data.to_vec();
        if let Some(flip) = self.flip_for(name) {
            let byte = (flip / 8) as usize;
            let bit = flip % 8;
            // A mask may name bytes past a seed that was truncated before sealing
            if let Some(b) = out.get_mut(byte) {
                *b ^= 1 << bit;
            }
        }
        out
    }

    fn remove(&mut self, name: &str) {
        self.flips.remove(name);
    }
}
