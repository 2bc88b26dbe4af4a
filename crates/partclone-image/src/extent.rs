use serde::Serialize;

use crate::{ImageError, ImageHeader, Result, UsageBitmap};

/// A run of used blocks that is contiguous both on the virtual device and in the image file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Extent {
    pub start_block: u64,
    pub virtual_offset: u64,
    pub physical_offset: u64,
    pub length: u64,
}

impl Extent {
    pub fn virtual_end(&self) -> u64 {
        self.virtual_offset + self.length
    }

    pub fn physical_end(&self) -> u64 {
        self.physical_offset + self.length
    }

    pub fn contains(&self, virtual_offset: u64) -> bool {
        (self.virtual_offset..self.virtual_end()).contains(&virtual_offset)
    }
}

/// Ascending, non-overlapping extents covering every used block of an image.
///
/// Built once from the usage bitmap; the gaps between extents are unused (all-zero) blocks.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExtentTable {
    extents: Vec<Extent>,
    block_size: u64,
    used_blocks: u64,
    checksum_records: u64,
    physical_end: u64,
}

impl ExtentTable {
    /// Walk the bitmap once, folding checksum records into the physical offsets.
    ///
    /// A checksum record follows every `blocks_per_checksum` used blocks, so the used block of
    /// rank `r` (counting from zero) sits at
    /// `block_start + r * block_size + (r / blocks_per_checksum) * checksum_size`.
    /// Crossing a record always starts a new extent, even when block indices are consecutive.
    pub fn build(header: &ImageHeader, bitmap: &UsageBitmap, block_start: u64) -> Result<Self> {
        let block_size = header.block_size as u64;
        let checksum_size = header.checksum_size as u64;
        let stride = header.blocks_per_checksum as u64;
        let with_checksums = header.has_checksum_records();

        let mut extents: Vec<Extent> = Vec::new();
        let mut image_offset = block_start;
        let mut used: u64 = 0;
        let mut prev: Option<u64> = None;

        for index in bitmap.iter_ones() {
            let boundary = with_checksums && used > 0 && used % stride == 0;
            if boundary {
                image_offset = image_offset
                    .checked_add(checksum_size)
                    .ok_or(ImageError::OffsetOverflow)?;
            }

            let continues = !boundary && prev.is_some_and(|p| p + 1 == index);
            match extents.last_mut() {
                Some(last) if continues => last.length += block_size,
                _ => {
                    let virtual_offset = index
                        .checked_mul(block_size)
                        .ok_or(ImageError::OffsetOverflow)?;
                    extents.push(Extent {
                        start_block: index,
                        virtual_offset,
                        physical_offset: image_offset,
                        length: block_size,
                    });
                }
            }

            image_offset = image_offset
                .checked_add(block_size)
                .ok_or(ImageError::OffsetOverflow)?;
            used += 1;
            prev = Some(index);
        }

        let checksum_records = if with_checksums {
            used.div_ceil(stride)
        } else {
            0
        };
        // The trailing record of the final group is part of the image even though no extent
        // follows it.
        let physical_end = if with_checksums && used > 0 {
            image_offset
                .checked_add(checksum_size)
                .ok_or(ImageError::OffsetOverflow)?
        } else {
            image_offset
        };

        Ok(Self {
            extents,
            block_size,
            used_blocks: used,
            checksum_records,
            physical_end,
        })
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn as_slice(&self) -> &[Extent] {
        &self.extents
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extent> {
        self.extents.iter()
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn used_blocks(&self) -> u64 {
        self.used_blocks
    }

    pub fn checksum_records(&self) -> u64 {
        self.checksum_records
    }

    /// Virtual bytes backed by image data.
    pub fn mapped_bytes(&self) -> u64 {
        self.extents.iter().map(|e| e.length).sum()
    }

    /// Image length needed to hold every block and checksum record.
    pub fn physical_end(&self) -> u64 {
        self.physical_end
    }

    /// Index of the first extent ending after `virtual_offset`.
    pub fn first_ending_after(&self, virtual_offset: u64) -> usize {
        self.extents
            .partition_point(|e| e.virtual_end() <= virtual_offset)
    }

    /// Extent holding `virtual_offset`, if that byte is backed by image data.
    pub fn find(&self, virtual_offset: u64) -> Option<&Extent> {
        self.extents
            .get(self.first_ending_after(virtual_offset))
            .filter(|e| e.contains(virtual_offset))
    }
}

impl<'a> IntoIterator for &'a ExtentTable {
    type Item = &'a Extent;
    type IntoIter = std::slice::Iter<'a, Extent>;

    fn into_iter(self) -> Self::IntoIter {
        self.extents.iter()
    }
}
