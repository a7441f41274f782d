//! Process configuration consumed by the filesystem.
//!
//! The launcher owns flag parsing; nodes only read these values.

use serde::Serialize;

use crate::constants::DEFAULT_BATCH_SIZE;
use crate::mutator::BIT_FLIP;

/// Configuration shared by every node of a mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsConfig {
    /// Random seed every mutation strategy is derived from.
    pub seed: i64,
    /// Number of mutants generated per `mutate` trigger.
    pub batch_size: u32,
    /// Name of the strategy each new Worm instantiates.
    pub strategy: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            strategy: BIT_FLIP.to_string(),
        }
    }
}

/// Document served by the root `info` control.
#[derive(Debug, Serialize)]
struct InfoDocument {
    seed: i64,
    batch_size: u32,
}

impl FsConfig {
    /// Create a configuration with the default strategy.
    pub fn new(seed: i64, batch_size: u32) -> Self {
        Self {
            seed,
            batch_size,
            ..Self::default()
        }
    }

    /// Single-line JSON describing the configuration, newline terminated.
    pub fn info_json(&self) -> Vec<u8> {
        let info = InfoDocument {
            seed: self.seed,
            batch_size: self.batch_size,
        };
        // Serializing two integers cannot fail.
        let mut out = serde_json::to_vec(&info).unwrap_or_default();
        out.push(b'\n');
        out
    }
}
