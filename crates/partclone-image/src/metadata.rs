use crate::header::{BITMAP_CRC_SIZE, HEADER_SIZE};
use crate::util::usize_from;
use crate::{ByteOrder, ImageBackend, ImageError, ImageHeader, Result, UsageBitmap};

/// Knobs for opening an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Reject images whose bitmap population disagrees with `used_block`.
    pub check_used_count: bool,
    /// Reject images shorter than the block region the header describes, instead of zero-filling
    /// the missing tail at read time.
    pub require_complete: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            check_used_count: true,
            require_complete: false,
        }
    }
}

/// Everything decoded from the image prefix: header, bitmap and bitmap CRC.
#[derive(Clone, Debug)]
pub struct ImageMetadata {
    pub header: ImageHeader,
    pub bitmap: UsageBitmap,
    /// CRC stored after the bitmap; not verified.
    pub bitmap_crc: u32,
    /// Offset of the first used block.
    pub block_start: u64,
}

impl ImageMetadata {
    pub fn read<B: ImageBackend + ?Sized>(backend: &B, options: &OpenOptions) -> Result<Self> {
        let image_len = backend.len()?;
        if image_len < HEADER_SIZE as u64 {
            return Err(ImageError::Format("image too small for header"));
        }

        let mut raw = [0u8; HEADER_SIZE];
        backend.read_at(0, &mut raw)?;
        let header = ImageHeader::parse(&raw)?;

        // Bound the bitmap by the backend before allocating it.
        let bitmap_len = header.bitmap_bytes_on_disk();
        let block_start = header.block_start()?;
        if block_start > image_len {
            return Err(ImageError::Format("bitmap extends past end of image"));
        }

        let mut bitmap_raw = vec![0u8; usize_from(bitmap_len)?];
        backend.read_at(HEADER_SIZE as u64, &mut bitmap_raw)?;
        let bitmap = UsageBitmap::from_bytes(&bitmap_raw, header.total_block)?;
        drop(bitmap_raw);

        let mut crc = [0u8; BITMAP_CRC_SIZE as usize];
        backend.read_at(HEADER_SIZE as u64 + bitmap_len, &mut crc)?;
        let bitmap_crc = match header.byte_order {
            ByteOrder::Little => u32::from_le_bytes(crc),
            ByteOrder::Big => u32::from_be_bytes(crc),
        };

        if options.check_used_count && bitmap.count_ones() != header.used_block {
            return Err(ImageError::Format(
                "bitmap population does not match used_block",
            ));
        }

        if options.require_complete {
            let expected = header.expected_image_len()?;
            if expected > image_len {
                return Err(ImageError::Format("image shorter than its block region"));
            }
        }

        Ok(Self {
            header,
            bitmap,
            bitmap_crc,
            block_start,
        })
    }
}
