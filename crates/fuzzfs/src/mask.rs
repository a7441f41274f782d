//! Byte-range masks restricting which seed bytes mutations may target.
//!
//! A mask is written to a Worm's `mask` control as JSON:
//!
//! ```json
//! {"include": true, "ranges": [{"offset": 0, "size": 16}]}
//! ```
//!
//! and compiled into a [`Mapping`] from logical slot to physical byte index.
//! Strategies draw a logical slot uniformly and translate it through the
//! mapping, so only mapped bytes are ever mutated.
//!
//! Building a mapping is pure: the Worm swaps it in only after it compiled
//! successfully, so a rejected mask leaves the previous one in effect.

use serde::Deserialize;

use crate::constants::MAX_MASK_DOCUMENT_SIZE;
use crate::error::FsError;
use crate::error::Result;

/// A contiguous run of seed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ByteRange {
    /// First byte of the range.
    pub offset: usize,
    /// Number of bytes in the range.
    pub size: usize,
}

impl ByteRange {
    /// Create a range.
    pub fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    /// One past the last byte, saturating on overflow.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.size)
    }
}

/// Mask document accepted by the `mask` control.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MaskDocument {
    /// `true`: mutate only inside `ranges`. `false`: mutate everywhere else.
    #[serde(default)]
    pub include: bool,
    /// Ranges the mask refers to. Empty clears the mask.
    #[serde(default)]
    pub ranges: Vec<ByteRange>,
}

impl MaskDocument {
    /// Parse a mask document from raw bytes written to the control file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for oversized or malformed documents.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() > MAX_MASK_DOCUMENT_SIZE {
            return Err(FsError::InvalidArgument {
                reason: format!("mask document of {} bytes exceeds {MAX_MASK_DOCUMENT_SIZE}", raw.len()),
            });
        }
        serde_json::from_slice(raw).map_err(|e| FsError::InvalidArgument {
            reason: format!("malformed mask document: {e}"),
        })
    }
}

/// Injective map from logical slot to physical byte index.
///
/// Slot `i` is the `i`-th eligible byte; `physical(i)` is where it lives in
/// the seed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    slots: Vec<usize>,
}

impl Mapping {
    /// Mapping over the bytes inside `ranges`, concatenated in order and
    /// clipped to `len`.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if two ranges cover the same byte.
    pub fn include(ranges: &[ByteRange], len: usize) -> Result<Self> {
        let mut builder = MappingBuilder::new(len);
        for range in ranges {
            let end = range.end().min(len);
            for physical in range.offset..end {
                builder.push(physical)?;
            }
        }
        Ok(builder.finish())
    }

    /// Mapping over the bytes outside `ranges`: the gap before the first
    /// range, the gaps between ranges and the tail after the last one.
    ///
    /// Ranges are expected in ascending, non-overlapping order. Out-of-order
    /// input that makes two gaps cover the same byte is rejected.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if a byte would be mapped twice.
    pub fn exclude(ranges: &[ByteRange], len: usize) -> Result<Self> {
        let mut builder = MappingBuilder::new(len);
        let mut start = 0usize;
        for range in ranges {
            let gap_end = range.offset.min(len);
            for physical in start..gap_end {
                builder.push(physical)?;
            }
            start = range.end();
        }
        for physical in start..len {
            builder.push(physical)?;
        }
        Ok(builder.finish())
    }

    /// Number of eligible bytes.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no byte is eligible.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Physical byte index for a logical slot.
    pub fn physical(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot).copied()
    }

    /// Physical byte indices in slot order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().copied()
    }
}

/// Accumulates slots while rejecting duplicate physical bytes.
///
/// Every physical index is below the seed length, so a flat bitmap of that
/// length tracks which bytes are already mapped.
struct MappingBuilder {
    slots: Vec<usize>,
    seen: Vec<bool>,
}

impl MappingBuilder {
    fn new(len: usize) -> Self {
        Self {
            slots: Vec::new(),
            seen: vec![false; len],
        }
    }

    fn push(&mut self, physical: usize) -> Result<()> {
        let seen = &mut self.seen[physical];
        if std::mem::replace(seen, true) {
            return Err(FsError::PermissionDenied {
                reason: format!("mask maps byte {physical} more than once"),
            });
        }
        self.slots.push(physical);
        Ok(())
    }

    fn finish(self) -> Mapping {
        Mapping { slots: self.slots }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn physical(mapping: &Mapping) -> Vec<usize> {
        mapping.iter().collect()
    }

    #[test]
    fn test_include_concatenates_in_order() {
        let mapping = Mapping::include(&[ByteRange::new(4, 2), ByteRange::new(0, 2)], 8).unwrap();
        assert_eq!(physical(&mapping), vec![4, 5, 0, 1]);
        assert_eq!(mapping.physical(2), Some(0));
        assert_eq!(mapping.physical(4), None);
    }

    #[test]
    fn test_include_clips_to_buffer() {
        let mapping = Mapping::include(&[ByteRange::new(2, 100)], 4).unwrap();
        assert_eq!(physical(&mapping), vec![2, 3]);

        let mapping = Mapping::include(&[ByteRange::new(10, 5)], 4).unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_include_rejects_overlap() {
        let result = Mapping::include(&[ByteRange::new(0, 2), ByteRange::new(1, 2)], 4);
        assert!(matches!(result, Err(FsError::PermissionDenied { .. })));
    }

    #[test]
    fn test_include_saturates_huge_size() {
        let mapping = Mapping::include(&[ByteRange::new(1, usize::MAX)], 3).unwrap();
        assert_eq!(physical(&mapping), vec![1, 2]);
    }

    #[test]
    fn test_exclude_complement() {
        let mapping = Mapping::exclude(&[ByteRange::new(1, 2), ByteRange::new(5, 1)], 8).unwrap();
        assert_eq!(physical(&mapping), vec![0, 3, 4, 6, 7]);
    }

    #[test]
    fn test_exclude_everything() {
        let mapping = Mapping::exclude(&[ByteRange::new(0, 8)], 8).unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_exclude_range_past_end() {
        let mapping = Mapping::exclude(&[ByteRange::new(6, 10)], 4).unwrap();
        assert_eq!(physical(&mapping), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_exclude_out_of_order_rejected() {
        let result = Mapping::exclude(&[ByteRange::new(5, 1), ByteRange::new(0, 1)], 8);
        assert!(matches!(result, Err(FsError::PermissionDenied { .. })));
    }

    #[test]
    fn test_parse_document() {
        let doc = MaskDocument::parse(br#"{"include":true,"ranges":[{"offset":0,"size":1}]}"#).unwrap();
        assert!(doc.include);
        assert_eq!(doc.ranges, vec![ByteRange::new(0, 1)]);
    }

    #[test]
    fn test_parse_missing_fields_default() {
        let doc = MaskDocument::parse(br#"{"include":true}"#).unwrap();
        assert!(doc.ranges.is_empty());

        let doc = MaskDocument::parse(br#"{"ranges":[{"offset":2,"size":3}]}"#).unwrap();
        assert!(!doc.include);
        assert_eq!(doc.ranges, vec![ByteRange::new(2, 3)]);
    }

    #[test]
    fn test_parse_malformed() {
        for raw in [&b"not json"[..], br#"{"include":1}"#, br#"{"include":true,"ranges":[{"offset":-1,"size":1}]}"#] {
            assert!(matches!(MaskDocument::parse(raw), Err(FsError::InvalidArgument { .. })));
        }
    }

    #[test]
    fn test_parse_oversized() {
        let raw = vec![b' '; MAX_MASK_DOCUMENT_SIZE + 1];
        assert!(matches!(MaskDocument::parse(&raw), Err(FsError::InvalidArgument { .. })));
    }

    #[test]
    fn test_whole_seed_mask_over_large_seed() {
        let len = 1 << 20;
        let mapping = Mapping::include(&[ByteRange::new(0, len)], len).unwrap();
        assert_eq!(mapping.len(), len);
        assert_eq!(mapping.physical(len - 1), Some(len - 1));

        let result = Mapping::include(&[ByteRange::new(0, len), ByteRange::new(len - 1, 1)], len);
        assert!(matches!(result, Err(FsError::PermissionDenied { .. })));
    }

    fn arb_ranges() -> impl Strategy<Value = Vec<ByteRange>> {
        prop::collection::vec((0usize..64, 0usize..16).prop_map(|(o, s)| ByteRange::new(o, s)), 0..6)
    }

    proptest! {
        #[test]
        fn test_mapping_is_injective_and_in_bounds(ranges in arb_ranges(), len in 0usize..64, include: bool) {
            let result = if include {
                Mapping::include(&ranges, len)
            } else {
                Mapping::exclude(&ranges, len)
            };
            if let Ok(mapping) = result {
                let slots = physical(&mapping);
                let unique: HashSet<_> = slots.iter().copied().collect();
                prop_assert_eq!(unique.len(), slots.len());
                prop_assert!(slots.iter().all(|&p| p < len));
            }
        }

        #[test]
        fn test_exclude_sorted_disjoint_is_complement(cuts in prop::collection::btree_set(0usize..48, 0..8), len in 0usize..48) {
            // Pair up sorted cut points into ascending, disjoint ranges
            let cuts: Vec<usize> = cuts.into_iter().collect();
            let ranges: Vec<ByteRange> = cuts.chunks(2).filter(|c| c.len() == 2).map(|c| ByteRange::new(c[0], c[1] - c[0])).collect();
            let mapping = Mapping::exclude(&ranges, len).unwrap();
            let expected: Vec<usize> = (0..len).filter(|b| !ranges.iter().any(|r| *b >= r.offset && *b < r.end())).collect();
            prop_assert_eq!(physical(&mapping), expected);
        }
    }
}
