//! Partclone image header (format `0002`).
//!
//! The header is a packed 110-byte record followed by the usage bitmap and its CRC:
//!
//! ```text
//! +--------------------+ 0
//! | header (110 bytes) |  magic, versions, geometry, options, crc32
//! +--------------------+ HEADER_SIZE
//! | bitmap             |  ceil(total_block / 8) bytes, LSB-first
//! +--------------------+
//! | bitmap crc32 (4)   |
//! +--------------------+ block_start
//! | used blocks, with  |
//! | a checksum record  |
//! | after every        |
//! | blocks_per_checksum|
//! +--------------------+
//! ```

use serde::Serialize;

use crate::util::div_ceil_u64;
use crate::{ImageError, Result};

pub const HEADER_SIZE: usize = 110;
/// Bytes of CRC that trail the on-disk bitmap.
pub const BITMAP_CRC_SIZE: u64 = 4;

const MAGIC: &[u8; 15] = b"partclone-image";
const IMAGE_VERSION_0002: &[u8; 4] = b"0002";
const ENDIAN_MARKER: u16 = 0xC0DE;

pub const BITMAP_MODE_NONE: u8 = 0x00;
pub const BITMAP_MODE_BIT: u8 = 0x01;
pub const BITMAP_MODE_BYTE: u8 = 0x08;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        let raw = [b[0], b[1]];
        match self {
            Self::Little => u16::from_le_bytes(raw),
            Self::Big => u16::from_be_bytes(raw),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let raw = [b[0], b[1], b[2], b[3]];
        match self {
            Self::Little => u32::from_le_bytes(raw),
            Self::Big => u32::from_be_bytes(raw),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let raw = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        match self {
            Self::Little => u64::from_le_bytes(raw),
            Self::Big => u64::from_be_bytes(raw),
        }
    }
}

/// Parsed and validated image header. Immutable once parsed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ImageHeader {
    pub partclone_version: String,
    pub image_version: String,
    pub byte_order: ByteOrder,
    pub filesystem_type: String,
    pub device_size: u64,
    pub total_block: u64,
    pub used_block: u64,
    pub bitmap_size: u64,
    pub block_size: u32,
    pub feature_size: u32,
    pub image_version_binary: u16,
    pub cpu_bits: u16,
    pub checksum_mode: u16,
    pub checksum_size: u16,
    pub blocks_per_checksum: u32,
    pub reseed_checksum: u8,
    pub bitmap_mode: u8,
    /// Header CRC as stored; not verified.
    pub crc: u32,
}

impl ImageHeader {
    /// Decode and validate a raw header record.
    pub fn parse(raw: &[u8; HEADER_SIZE]) -> Result<Self> {
        if raw[..15] != MAGIC[..] || raw[15] != 0 {
            return Err(ImageError::BadMagic);
        }

        let byte_order = match [raw[34], raw[35]] {
            m if u16::from_le_bytes(m) == ENDIAN_MARKER => ByteOrder::Little,
            m if u16::from_be_bytes(m) == ENDIAN_MARKER => ByteOrder::Big,
            _ => return Err(ImageError::Format("unknown endianness marker")),
        };

        if raw[30..34] != IMAGE_VERSION_0002[..] {
            return Err(ImageError::Unsupported("image version (only 0002 is supported)"));
        }

        let o = byte_order;
        let header = Self {
            partclone_version: ascii_field(&raw[16..30]),
            image_version: ascii_field(&raw[30..34]),
            byte_order,
            filesystem_type: ascii_field(&raw[36..52]),
            device_size: o.u64(&raw[52..60]),
            total_block: o.u64(&raw[60..68]),
            used_block: o.u64(&raw[68..76]),
            bitmap_size: o.u64(&raw[76..84]),
            block_size: o.u32(&raw[84..88]),
            feature_size: o.u32(&raw[88..92]),
            image_version_binary: o.u16(&raw[92..94]),
            cpu_bits: o.u16(&raw[94..96]),
            checksum_mode: o.u16(&raw[96..98]),
            checksum_size: o.u16(&raw[98..100]),
            blocks_per_checksum: o.u32(&raw[100..104]),
            reseed_checksum: raw[104],
            bitmap_mode: raw[105],
            crc: o.u32(&raw[106..110]),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(ImageError::Format("block_size is zero"));
        }
        if self.total_block == 0 {
            return Err(ImageError::Format("total_block is zero"));
        }
        if self.used_block > self.total_block {
            return Err(ImageError::Format("used_block exceeds total_block"));
        }
        if self.bitmap_size != self.total_block.div_ceil(8) {
            return Err(ImageError::Format(
                "bitmap_size does not match total_block",
            ));
        }
        let span = self
            .total_block
            .checked_mul(self.block_size as u64)
            .ok_or(ImageError::Format("total_block * block_size overflows"))?;
        if span < self.device_size {
            return Err(ImageError::Format(
                "device_size exceeds total_block * block_size",
            ));
        }
        if self.checksum_size > 0 && self.blocks_per_checksum == 0 && self.used_block > 0 {
            return Err(ImageError::Format(
                "checksum_size set but blocks_per_checksum is zero",
            ));
        }
        match self.bitmap_mode {
            BITMAP_MODE_BIT => {}
            BITMAP_MODE_BYTE => return Err(ImageError::Unsupported("byte-per-block bitmap")),
            BITMAP_MODE_NONE => return Err(ImageError::Unsupported("image without bitmap")),
            _ => return Err(ImageError::Unsupported("bitmap mode")),
        }
        Ok(())
    }

    /// Virtual device size in bytes.
    pub fn virtual_size(&self) -> u64 {
        self.device_size
    }

    /// Whether checksum records are interleaved with block data.
    pub fn has_checksum_records(&self) -> bool {
        self.checksum_size > 0 && self.blocks_per_checksum > 0
    }

    /// Bitmap bytes as stored in the image.
    pub fn bitmap_bytes_on_disk(&self) -> u64 {
        self.bitmap_size
    }

    /// Number of `u64` words backing the in-memory bitmap.
    pub fn bitmap_words(&self) -> Result<u64> {
        div_ceil_u64(self.total_block, 64)
    }

    /// Offset of the first used block in the image file.
    pub fn block_start(&self) -> Result<u64> {
        (HEADER_SIZE as u64)
            .checked_add(self.bitmap_bytes_on_disk())
            .and_then(|v| v.checked_add(BITMAP_CRC_SIZE))
            .ok_or(ImageError::OffsetOverflow)
    }

    /// Image bytes needed to hold every used block and checksum record.
    pub fn expected_image_len(&self) -> Result<u64> {
        let data = self
            .used_block
            .checked_mul(self.block_size as u64)
            .ok_or(ImageError::OffsetOverflow)?;
        let checksums = if self.has_checksum_records() {
            div_ceil_u64(self.used_block, self.blocks_per_checksum as u64)?
                .checked_mul(self.checksum_size as u64)
                .ok_or(ImageError::OffsetOverflow)?
        } else {
            0
        };
        self.block_start()?
            .checked_add(data)
            .and_then(|v| v.checked_add(checksums))
            .ok_or(ImageError::OffsetOverflow)
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}
