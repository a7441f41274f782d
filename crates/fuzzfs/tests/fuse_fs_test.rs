//! Tests for the fuzz filesystem through its public API.
//!
//! Drives `FuzzFs` via the `FileSystem` trait the way the FUSE server would,
//! without requiring a mount.
//!
//! # Test Coverage
//!
//! - Seed lifecycle (write, seal, identity view)
//! - Mutation batches, naming and reproducibility
//! - Masks through the `mask` control
//! - Custom strategies through the registry
//! - Concurrent requests

use std::ffi::CString;
use std::sync::Arc;
use std::thread;

use fuse_backend_rs::abi::fuse_abi::CreateIn;
use fuse_backend_rs::abi::fuse_abi::stat64;
use fuse_backend_rs::api::filesystem::Context;
use fuse_backend_rs::api::filesystem::DirEntry;
use fuse_backend_rs::api::filesystem::FileSystem;
use fuse_backend_rs::api::filesystem::SetattrValid;
use fuzzfs::FsConfig;
use fuzzfs::FuzzFs;
use fuzzfs::Mutator;
use fuzzfs::MutatorRegistry;
use fuzzfs::constants::ROOT_INODE;
use fuzzfs::error::Result;
use fuzzfs::mask::Mapping;

const UID: u32 = 1000;
const GID: u32 = 1000;

fn ctx() -> Context {
    let mut ctx = Context::new();
    ctx.uid = UID;
    ctx.gid = GID;
    ctx
}

fn cname(name: &str) -> CString {
    CString::new(name).unwrap()
}

fn create_args() -> CreateIn {
    CreateIn {
        flags: libc::O_WRONLY as u32,
        mode: 0o644,
        umask: 0o022,
        fuse_flags: 0,
    }
}

/// Client-side view of a mounted filesystem.
struct Client {
    fs: FuzzFs,
}

impl Client {
    fn new(seed: i64, batch_size: u32) -> Self {
        Self {
            fs: FuzzFs::new(UID, GID, FsConfig::new(seed, batch_size)),
        }
    }

    fn lookup(&self, parent: u64, name: &str) -> std::io::Result<u64> {
        Ok(self.fs.lookup(&ctx(), parent, &cname(name))?.inode)
    }

    /// `echo -n data > name` at the root.
    fn put_seed(&self, name: &str, data: &[u8]) -> u64 {
        let (entry, ..) = self.fs.create(&ctx(), ROOT_INODE, &cname(name), create_args()).unwrap();
        self.fs.write_at(&ctx(), entry.inode, 0, data).unwrap();
        self.fs.flush(&ctx(), entry.inode, 0, 0).unwrap();
        entry.inode
    }

    fn read(&self, parent: u64, name: &str) -> Vec<u8> {
        let inode = self.lookup(parent, name).unwrap();
        self.fs.read_at(&ctx(), inode, 0, u32::MAX).unwrap()
    }

    fn touch(&self, parent: u64, name: &str) -> std::io::Result<()> {
        let inode = self.lookup(parent, name)?;
        // SAFETY: stat64 is plain old data.
        let attr: stat64 = unsafe { std::mem::zeroed() };
        let valid = SetattrValid::ATIME | SetattrValid::MTIME | SetattrValid::ATIME_NOW | SetattrValid::MTIME_NOW;
        self.fs.setattr(&ctx(), inode, attr, None, valid)?;
        Ok(())
    }

    fn write_mask(&self, worm: u64, document: &[u8]) -> std::io::Result<usize> {
        let inode = self.lookup(worm, "mask")?;
        self.fs.write_at(&ctx(), inode, 0, document)
    }

    fn children(&self, worm: u64) -> Vec<String> {
        let mut names = Vec::new();
        self.fs
            .readdir(&ctx(), worm, 0, u32::MAX, 0, &mut |entry: DirEntry| {
                names.push(String::from_utf8_lossy(entry.name).into_owned());
                Ok(1)
            })
            .unwrap();
        names.into_iter().filter(|n| n.parse::<u64>().is_ok()).collect()
    }

    fn mutants(&self, worm: u64) -> Vec<Vec<u8>> {
        self.children(worm).into_iter().filter(|n| n != "0").map(|n| self.read(worm, &n)).collect()
    }
}

fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

mod seed_lifecycle {
    use super::*;

    #[test]
    fn test_identity_view_before_mutation() {
        let client = Client::new(1, 5);
        let worm = client.put_seed("input", b"GIF89a\x01\x00");
        assert_eq!(client.read(worm, "0"), b"GIF89a\x01\x00");
        assert_eq!(client.children(worm), vec!["0"]);
    }

    #[test]
    fn test_sealed_seed_is_immutable() {
        let client = Client::new(1, 5);
        let worm = client.put_seed("input", b"abc");
        let err = client.fs.write_at(&ctx(), worm, 1, b"Z").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
        assert_eq!(client.read(worm, "0"), b"abc");
    }

    #[test]
    fn test_multiple_writes_before_close() {
        let client = Client::new(1, 5);
        let (entry, ..) = client.fs.create(&ctx(), ROOT_INODE, &cname("input"), create_args()).unwrap();
        client.fs.write_at(&ctx(), entry.inode, 0, b"hello ").unwrap();
        client.fs.write_at(&ctx(), entry.inode, 6, b"world").unwrap();
        client.fs.flush(&ctx(), entry.inode, 0, 0).unwrap();
        assert_eq!(client.read(entry.inode, "0"), b"hello world");
    }

    #[test]
    fn test_protected_entries() {
        let client = Client::new(1, 5);
        let worm = client.put_seed("input", b"abc");
        for name in ["0", "mutate", "mask"] {
            let err = client.fs.unlink(&ctx(), worm, &cname(name)).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::EPERM), "{name}");
        }
    }
}

mod mutation {
    use super::*;

    #[test]
    fn test_each_mutant_is_one_bit_away() {
        let client = Client::new(7, 16);
        let seed = b"The quick brown fox";
        let worm = client.put_seed("input", seed);
        client.touch(worm, "mutate").unwrap();

        let mutants = client.mutants(worm);
        assert_eq!(mutants.len(), 16);
        for mutant in &mutants {
            assert_eq!(hamming(mutant, seed), 1);
        }
    }

    #[test]
    fn test_names_increase_across_batches() {
        let client = Client::new(7, 3);
        let worm = client.put_seed("input", b"abcdef");
        client.touch(worm, "mutate").unwrap();
        client.touch(worm, "mutate").unwrap();

        let names: Vec<u64> = client.children(worm).iter().map(|n| n.parse().unwrap()).collect();
        assert_eq!(names, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reads_are_stable() {
        let client = Client::new(7, 3);
        let worm = client.put_seed("input", b"abcdef");
        client.touch(worm, "mutate").unwrap();
        let first = client.mutants(worm);
        let second = client.mutants(worm);
        assert_eq!(first, second);
    }

    #[test]
    fn test_same_seed_same_mutants() {
        let a = Client::new(99, 8);
        let b = Client::new(99, 8);
        let wa = a.put_seed("input", b"reproducible input");
        let wb = b.put_seed("input", b"reproducible input");
        a.touch(wa, "mutate").unwrap();
        b.touch(wb, "mutate").unwrap();
        assert_eq!(a.mutants(wa), b.mutants(wb));
    }

    #[test]
    fn test_worms_do_not_share_random_streams() {
        let client = Client::new(99, 8);
        let first = client.put_seed("first", b"reproducible input");
        client.touch(first, "mutate").unwrap();
        let expected = client.mutants(first);

        // Same name on a fresh mount, with another Worm mutated in between
        let other = Client::new(99, 8);
        let noise = other.put_seed("noise", b"something else");
        other.touch(noise, "mutate").unwrap();
        let again = other.put_seed("first", b"reproducible input");
        other.touch(again, "mutate").unwrap();
        assert_eq!(other.mutants(again), expected);
    }

    #[test]
    fn test_removed_mutant_is_not_reused() {
        let client = Client::new(7, 2);
        let worm = client.put_seed("input", b"abcdef");
        client.touch(worm, "mutate").unwrap();
        client.fs.unlink(&ctx(), worm, &cname("2")).unwrap();
        client.touch(worm, "mutate").unwrap();
        assert_eq!(client.children(worm), vec!["0", "1", "3", "4"]);
    }
}

mod masks {
    use super::*;

    #[test]
    fn test_include_mask() {
        let client = Client::new(3, 50);
        let worm = client.put_seed("input", &[0, 0]);
        client.write_mask(worm, br#"{"include":true,"ranges":[{"offset":0,"size":1}]}"#).unwrap();
        client.touch(worm, "mutate").unwrap();

        for mutant in client.mutants(worm) {
            assert_eq!(mutant[1], 0);
            assert_eq!(mutant[0].count_ones(), 1);
        }
    }

    #[test]
    fn test_exclude_mask() {
        let client = Client::new(3, 50);
        let worm = client.put_seed("input", &[0; 8]);
        client.write_mask(worm, br#"{"include":false,"ranges":[{"offset":0,"size":6}]}"#).unwrap();
        client.touch(worm, "mutate").unwrap();

        for mutant in client.mutants(worm) {
            assert_eq!(&mutant[..6], &[0; 6]);
        }
    }

    #[test]
    fn test_conflicting_mask_keeps_previous() {
        let client = Client::new(3, 50);
        let worm = client.put_seed("input", &[0; 4]);
        client.write_mask(worm, br#"{"include":true,"ranges":[{"offset":3,"size":1}]}"#).unwrap();

        let conflict = br#"{"include":true,"ranges":[{"offset":0,"size":2},{"offset":1,"size":2}]}"#;
        let err = client.write_mask(worm, conflict).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));

        client.touch(worm, "mutate").unwrap();
        for mutant in client.mutants(worm) {
            assert_eq!(&mutant[..3], &[0, 0, 0]);
        }
    }

    #[test]
    fn test_malformed_mask() {
        let client = Client::new(3, 5);
        let worm = client.put_seed("input", b"abc");
        let err = client.write_mask(worm, b"include everything").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
    }

    #[test]
    fn test_empty_ranges_clear_mask() {
        let client = Client::new(3, 50);
        let worm = client.put_seed("input", &[0; 4]);
        client.write_mask(worm, br#"{"include":false,"ranges":[{"offset":0,"size":4}]}"#).unwrap();
        let err = client.touch(worm, "mutate").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        client.write_mask(worm, br#"{"include":true,"ranges":[]}"#).unwrap();
        client.touch(worm, "mutate").unwrap();
        assert_eq!(client.mutants(worm).len(), 50);
    }
}

mod registry {
    use super::*;

    /// Sets every byte to 0xFF.
    struct Saturate;

    impl Mutator for Saturate {
        fn generate(&mut self, _data: &[u8], _mapping: Option<&Mapping>, _name: &str) -> Result<()> {
            Ok(())
        }

        fn synthesize(&self, data: &[u8], _name: &str) -> Vec<u8> {
            vec![0xFF; data.len()]
        }

        fn remove(&mut self, _name: &str) {}
    }

    #[test]
    fn test_custom_strategy() {
        let mut registry = MutatorRegistry::new();
        registry.register("saturate", |_| Box::new(Saturate));
        let config = FsConfig {
            strategy: "saturate".to_string(),
            ..FsConfig::new(0, 2)
        };
        let client = Client {
            fs: FuzzFs::with_registry(UID, GID, config, registry),
        };

        let worm = client.put_seed("input", b"abc");
        client.touch(worm, "mutate").unwrap();
        assert_eq!(client.read(worm, "0"), b"abc");
        assert_eq!(client.read(worm, "1"), vec![0xFF; 3]);
    }

    #[test]
    fn test_unknown_strategy_rejects_create() {
        let config = FsConfig {
            strategy: "missing".to_string(),
            ..FsConfig::default()
        };
        let fs = FuzzFs::with_registry(UID, GID, config, MutatorRegistry::new());
        let err = fs.create(&ctx(), ROOT_INODE, &cname("input"), create_args()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}

mod concurrency {
    use super::*;

    #[test]
    fn test_parallel_readers_and_mutators() {
        let client = Arc::new(Client::new(5, 4));
        let seed = vec![0x5Au8; 256];
        let worm = client.put_seed("input", &seed);
        client.touch(worm, "mutate").unwrap();

        let mut handles = Vec::new();
        for t in 0..4 {
            let client = client.clone();
            let seed = seed.clone();
            handles.push(thread::spawn(move || {
                for i in 0..25 {
                    if t % 2 == 0 && i % 5 == 0 {
                        client.touch(worm, "mutate").unwrap();
                    }
                    assert_eq!(hamming(&client.read(worm, "1"), &seed), 1);
                    assert_eq!(client.read(worm, "0"), seed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // One initial batch plus five triggers from each of two threads
        assert_eq!(client.children(worm).len(), 1 + 4 + 2 * 5 * 4);
    }

    #[test]
    fn test_parallel_creates_get_unique_inodes() {
        let client = Arc::new(Client::new(5, 4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let client = client.clone();
                thread::spawn(move || client.put_seed(&format!("seed-{t}"), b"data"))
            })
            .collect();
        let mut inodes: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        inodes.sort_unstable();
        inodes.dedup();
        assert_eq!(inodes.len(), 8);
    }
}
