//! Pluggable mutation strategies.
//!
//! A strategy remembers one mutation record per mutant name and rebuilds the
//! mutant from the untouched seed on every read. Strategies are looked up by
//! name in a [`MutatorRegistry`] so new ones can be added without touching the
//! Worm.
//!
//! # Determinism
//!
//! Each Worm instantiates its strategy with [`derive_seed`], which mixes the
//! process seed with the Worm name. The same seed, Worm name and sequence of
//! `mutate` triggers reproduce the same mutants no matter what happens to other
//! Worms.

mod bit_flip;

use std::collections::BTreeMap;

pub use bit_flip::BitFlip;

use crate::error::FsError;
use crate::error::Result;
use crate::mask::Mapping;

/// Registry name of the single-bit-flip strategy.
pub const BIT_FLIP: &str = "bit_flip";

/// A mutation strategy.
pub trait Mutator: Send {
    /// Draw a new mutation for `name` over `data`, restricted to `mapping`
    /// when a mask is active.
    ///
    /// # Errors
    ///
    /// Returns `DomainEmpty` if there is nothing to mutate.
    fn generate(&mut self, data: &[u8], mapping: Option<&Mapping>, name: &str) -> Result<()>;

    /// Build the mutant for `name` from `data`.
    ///
    /// Always returns a fresh buffer and never modifies `data`. Names without
    /// a record yield an unchanged copy.
    fn synthesize(&self, data: &[u8], name: &str) -> Vec<u8>;

    /// Forget the record for `name`.
    fn remove(&mut self, name: &str);
}

/// Constructor for a strategy, given its derived seed.
pub type MutatorFactory = fn(u64) -> Box<dyn Mutator>;

/// Name to strategy table.
#[derive(Clone)]
pub struct MutatorRegistry {
    factories: BTreeMap<String, MutatorFactory>,
}

impl MutatorRegistry {
    /// Registry with no strategies.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in strategy.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(BIT_FLIP, |seed| Box::new(BitFlip::new(seed)));
        registry
    }

    /// Add or replace a strategy.
    pub fn register(&mut self, name: &str, factory: MutatorFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Whether a strategy is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered strategy names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a fresh instance of the named strategy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no strategy is registered under `name`.
    pub fn instantiate(&self, name: &str, seed: u64) -> Result<Box<dyn Mutator>> {
        let factory = self.factories.get(name).ok_or_else(|| FsError::NotFound {
            name: format!("strategy {name}"),
        })?;
        Ok(factory(seed))
    }
}

impl Default for MutatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a per-Worm strategy seed from the process seed and Worm name.
pub fn derive_seed(seed: i64, worm_name: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(worm_name.as_bytes());
    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    let arr: [u8; 8] = [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ];
    u64::from_le_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl Mutator for Reverse {
        fn generate(&mut self, _data: &[u8], _mapping: Option<&Mapping>, _name: &str) -> Result<()> {
            Ok(())
        }

        fn synthesize(&self, data: &[u8], _name: &str) -> Vec<u8> {
            data.iter().rev().copied().collect()
        }

        fn remove(&mut self, _name: &str) {}
    }

    #[test]
    fn test_default_registry_has_bit_flip() {
        let registry = MutatorRegistry::new();
        assert!(registry.contains(BIT_FLIP));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![BIT_FLIP]);
        assert!(registry.instantiate(BIT_FLIP, 1).is_ok());
    }

    #[test]
    fn test_unknown_strategy() {
        let registry = MutatorRegistry::new();
        assert!(matches!(registry.instantiate("havoc", 1), Err(FsError::NotFound { .. })));
        assert!(MutatorRegistry::empty().instantiate(BIT_FLIP, 1).is_err());
    }

    #[test]
    fn test_register_custom_strategy() {
        let mut registry = MutatorRegistry::new();
        registry.register("reverse", |_| Box::new(Reverse));
        let mutator = registry.instantiate("reverse", 0).unwrap();
        assert_eq!(mutator.synthesize(b"abc", "1"), b"cba");
        assert_eq!(registry.names().count(), 2);
    }

    #[test]
    fn test_derive_seed_deterministic() {
        assert_eq!(derive_seed(7, "corpus"), derive_seed(7, "corpus"));
        assert_ne!(derive_seed(7, "corpus"), derive_seed(8, "corpus"));
        assert_ne!(derive_seed(7, "corpus"), derive_seed(7, "other"));
    }
}
