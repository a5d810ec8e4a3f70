//! Part boundary computation
//!
//! Splits a payload of `total_size` bytes into consecutive parts of at most
//! `max_part_size` bytes. Only the last part may be shorter.

/// One part's position within the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    /// 1-based
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

impl ChunkSpec {
    /// Byte range of this part, for slicing an in-memory payload
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }
}

/// Lazy, restartable iterator over [`ChunkSpec`]s
///
/// Clone it to restart from the first part. A zero-byte payload yields no
/// parts.
#[derive(Debug, Clone)]
pub struct Chunker {
    total_size: u64,
    max_part_size: u64,
    offset: u64,
    next_part: u32,
}

impl Chunker {
    /// A zero `max_part_size` is treated as one byte. Upload policies with a
    /// zero part size are rejected before a chunker is built.
    pub fn new(total_size: u64, max_part_size: u64) -> Self {
        Self {
            total_size,
            max_part_size: max_part_size.max(1),
            offset: 0,
            next_part: 1,
        }
    }

    /// Total number of parts, `ceil(total_size / max_part_size)`
    pub fn part_count(&self) -> u64 {
        self.total_size.div_ceil(self.max_part_size)
    }
}

impl Iterator for Chunker {
    type Item = ChunkSpec;

    fn next(&mut self) -> Option<ChunkSpec> {
        let remaining = self.total_size - self.offset;
        if remaining == 0 {
            return None;
        }

        let chunk = ChunkSpec {
            part_number: self.next_part,
            offset: self.offset,
            length: remaining.min(self.max_part_size),
        };

        self.offset += chunk.length;
        self.next_part += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_size - self.offset).div_ceil(self.max_part_size) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunker {}
