use crate::util::usize_from;
use crate::{ImageError, Result};

/// One bit per block, `1` meaning the block is stored in the image.
///
/// Bits are packed LSB-first in `u64` words; bit `i` lives in word `i / 64` at position `i % 64`.
/// The word vector is rounded up to a whole word and any padding bits past `total` are cleared.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UsageBitmap {
    words: Vec<u64>,
    total: u64,
}

impl UsageBitmap {
    /// Build a bitmap for `total` blocks from its on-disk byte form (`ceil(total / 8)` bytes).
    pub fn from_bytes(bytes: &[u8], total: u64) -> Result<Self> {
        let needed = usize_from(total.div_ceil(8))?;
        if bytes.len() < needed {
            return Err(ImageError::Format("bitmap shorter than total_block"));
        }
        let word_count = usize_from(total.div_ceil(64))?;

        let mut words = Vec::with_capacity(word_count);
        for chunk in bytes[..needed].chunks(8) {
            let mut raw = [0u8; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            words.push(u64::from_le_bytes(raw));
        }
        debug_assert_eq!(words.len(), word_count);

        let tail = total % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }

        Ok(Self { words, total })
    }

    /// Number of blocks tracked.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn test_bit(&self, index: u64) -> Result<bool> {
        if index >= self.total {
            return Err(ImageError::BitIndexOutOfRange {
                index,
                total: self.total,
            });
        }
        let word = self.words[(index / 64) as usize];
        Ok((word >> (index % 64)) & 1 == 1)
    }

    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Ascending indices of used blocks. All-zero words are skipped whole.
    pub fn iter_ones(&self) -> IterOnes<'_> {
        IterOnes {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

pub struct IterOnes<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for IterOnes<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as u64;
                // Clear the lowest set bit.
                self.current &= self.current - 1;
                return Some(self.word_index as u64 * 64 + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}
