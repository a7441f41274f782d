//! Lazily synthesized mutant views.

use std::sync::Arc;
use std::sync::Weak;

use crate::constants::MUTANT_PERM;
use crate::error::FsError;
use crate::error::Result;
use crate::inode::IndexAllocator;
use crate::node::FsNode;
use crate::node::NodeAttr;
use crate::worm::Worm;

/// A read-only child of a Worm whose bytes are rebuilt on every read.
///
/// Nothing is stored here but the name: the Worm's strategy keeps the
/// mutation record and the Worm keeps the seed.
pub struct MutantFile {
    name: String,
    worm: Weak<Worm>,
    index: u64,
}

impl MutantFile {
    /// Create a mutant of `worm`.
    pub fn new(name: String, worm: Weak<Worm>, allocator: &IndexAllocator) -> Arc<Self> {
        Arc::new(Self {
            name,
            worm,
            index: allocator.next(),
        })
    }

    /// Child name within the Worm.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn worm(&self) -> Result<Arc<Worm>> {
        self.worm.upgrade().ok_or_else(|| FsError::NotFound {
            name: self.name.clone(),
        })
    }
}

impl FsNode for MutantFile {
    fn index(&self) -> u64 {
        self.index
    }

    /// Size follows the one seed buffer; a flip never changes the length.
    fn attr(&self) -> Result<NodeAttr> {
        let size = self.worm()?.seed_len()?;
        Ok(NodeAttr::file(self.index, MUTANT_PERM, size as u64))
    }

    fn read(&self) -> Result<Vec<u8>> {
        self.worm()?.synthesize(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;
    use crate::mutator::MutatorRegistry;

    #[test]
    fn test_orphaned_mutant() {
        let mutant = MutantFile::new("1".to_string(), Weak::new(), &IndexAllocator::new());
        assert!(matches!(mutant.read(), Err(FsError::NotFound { .. })));
        assert!(matches!(mutant.attr(), Err(FsError::NotFound { .. })));
    }

    #[test]
    fn test_mutant_is_read_only() {
        let worm = Worm::new("w", Arc::new(IndexAllocator::new()), &FsConfig::default(), &MutatorRegistry::new()).unwrap();
        worm.write_at(0, b"abc").unwrap();
        let identity = worm.lookup("0").unwrap();

        let attr = identity.attr().unwrap();
        assert_eq!(attr.perm, MUTANT_PERM);
        assert_eq!(attr.size, 3);
        assert!(matches!(identity.write(0, b"x"), Err(FsError::NotSupported { .. })));
        assert_eq!(identity.read().unwrap(), b"abc");
    }
}
