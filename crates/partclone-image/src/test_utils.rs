//! Synthetic partclone images for tests.
//!
//! A [`Layout`] describes the geometry; [`build_image`] writes the image bytes and
//! [`reference_device`] the device they encode. Used blocks are filled with [`pattern`], which is
//! never zero, so zero-fill is always detectable.

use std::path::Path;

use crate::header::{BITMAP_CRC_SIZE, BITMAP_MODE_BIT, HEADER_SIZE};
use crate::ByteOrder;

pub const HEADER_CRC: u32 = 0xDEAD_BEEF;
pub const BITMAP_CRC: u32 = 0x1234_5678;
/// Fill byte of every checksum record.
pub const CHECKSUM_FILL: u8 = 0xEE;

/// Geometry of a synthetic image.
#[derive(Clone, Debug)]
pub struct Layout {
    pub block_size: u32,
    pub used: Vec<bool>,
    pub blocks_per_checksum: u32,
    pub checksum_size: u16,
    pub byte_order: ByteOrder,
    /// Bytes the device is shorter than `total * block_size`.
    pub device_trim: u64,
    pub filesystem: &'static str,
}

impl Layout {
    /// `bits` has one character per block; `'1'` marks a used block.
    pub fn new(block_size: u32, bits: &str) -> Self {
        Self::from_used(block_size, bits.chars().map(|c| c == '1').collect())
    }

    pub fn from_used(block_size: u32, used: Vec<bool>) -> Self {
        Self {
            block_size,
            used,
            blocks_per_checksum: 64,
            checksum_size: 4,
            byte_order: ByteOrder::Little,
            device_trim: 0,
            filesystem: "NTFS",
        }
    }

    pub fn checksums(mut self, blocks_per_checksum: u32, checksum_size: u16) -> Self {
        self.blocks_per_checksum = blocks_per_checksum;
        self.checksum_size = checksum_size;
        self
    }

    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Shrink the device by `bytes`; must stay below `block_size`.
    pub fn trim_device(mut self, bytes: u64) -> Self {
        self.device_trim = bytes;
        self
    }

    pub fn filesystem(mut self, name: &'static str) -> Self {
        self.filesystem = name;
        self
    }

    pub fn total(&self) -> u64 {
        self.used.len() as u64
    }

    pub fn used_count(&self) -> u64 {
        self.used.iter().filter(|b| **b).count() as u64
    }

    pub fn block_start(&self) -> u64 {
        HEADER_SIZE as u64 + self.total().div_ceil(8) + BITMAP_CRC_SIZE
    }

    pub fn device_size(&self) -> u64 {
        self.total() * self.block_size as u64 - self.device_trim
    }

    fn has_records(&self) -> bool {
        self.checksum_size > 0 && self.blocks_per_checksum > 0
    }

    /// Checksum records in the image, trailing record included.
    pub fn checksum_records(&self) -> u64 {
        if self.has_records() {
            self.used_count().div_ceil(self.blocks_per_checksum as u64)
        } else {
            0
        }
    }
}

/// Byte `j` of block `block` on the original device.
pub fn pattern(block: u64, j: u64) -> u8 {
    ((block * 37 + j * 3) % 251) as u8 + 1
}

fn put(dst: &mut [u8], offset: usize, le_bytes: &[u8], order: ByteOrder) {
    let field = &mut dst[offset..offset + le_bytes.len()];
    field.copy_from_slice(le_bytes);
    if order == ByteOrder::Big {
        field.reverse();
    }
}

pub fn header_bytes(layout: &Layout) -> Vec<u8> {
    let order = layout.byte_order;
    let total = layout.total();
    let mut h = vec![0u8; HEADER_SIZE];
    h[..15].copy_from_slice(b"partclone-image");
    h[16..21].copy_from_slice(b"0.3.2");
    h[30..34].copy_from_slice(b"0002");
    put(&mut h, 34, &0xC0DEu16.to_le_bytes(), order);
    let fs = layout.filesystem.as_bytes();
    h[36..36 + fs.len().min(16)].copy_from_slice(&fs[..fs.len().min(16)]);
    put(&mut h, 52, &layout.device_size().to_le_bytes(), order);
    put(&mut h, 60, &total.to_le_bytes(), order);
    put(&mut h, 68, &layout.used_count().to_le_bytes(), order);
    put(&mut h, 76, &total.div_ceil(8).to_le_bytes(), order);
    put(&mut h, 84, &layout.block_size.to_le_bytes(), order);
    put(&mut h, 92, &2u16.to_le_bytes(), order);
    put(&mut h, 94, &64u16.to_le_bytes(), order);
    put(&mut h, 96, &0x20u16.to_le_bytes(), order);
    put(&mut h, 98, &layout.checksum_size.to_le_bytes(), order);
    put(&mut h, 100, &layout.blocks_per_checksum.to_le_bytes(), order);
    h[104] = 1;
    h[105] = BITMAP_MODE_BIT;
    put(&mut h, 106, &HEADER_CRC.to_le_bytes(), order);
    h
}

/// Full image bytes for `layout`, checksum records included.
pub fn build_image(layout: &Layout) -> Vec<u8> {
    let mut image = header_bytes(layout);
    let mut bitmap = vec![0u8; layout.total().div_ceil(8) as usize];
    for (i, used) in layout.used.iter().enumerate() {
        if *used {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    image.extend_from_slice(&bitmap);
    let mut crc = [0u8; 4];
    put(&mut crc, 0, &BITMAP_CRC.to_le_bytes(), layout.byte_order);
    image.extend_from_slice(&crc);

    let bs = layout.block_size as u64;
    let stride = layout.blocks_per_checksum as u64;
    let record = vec![CHECKSUM_FILL; layout.checksum_size as usize];
    let mut rank = 0u64;
    for (i, used) in layout.used.iter().enumerate() {
        if !*used {
            continue;
        }
        image.extend((0..bs).map(|j| pattern(i as u64, j)));
        rank += 1;
        if layout.has_records() && rank % stride == 0 {
            image.extend_from_slice(&record);
        }
    }
    if layout.has_records() && rank % stride != 0 {
        image.extend_from_slice(&record);
    }
    image
}

/// The original device `layout` describes, `device_size` bytes long.
pub fn reference_device(layout: &Layout) -> Vec<u8> {
    let bs = layout.block_size as u64;
    let mut device = vec![0u8; (layout.total() * bs) as usize];
    for (i, used) in layout.used.iter().enumerate() {
        if *used {
            let start = (i as u64 * bs) as usize;
            for (j, b) in device[start..start + bs as usize].iter_mut().enumerate() {
                *b = pattern(i as u64, j as u64);
            }
        }
    }
    device.truncate(layout.device_size() as usize);
    device
}

/// Write the image for `layout` to `path` and return the device it encodes.
pub fn write_image(path: &Path, layout: &Layout) -> std::io::Result<Vec<u8>> {
    std::fs::write(path, build_image(layout))?;
    Ok(reference_device(layout))
}
