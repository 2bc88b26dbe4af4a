use crate::{ImageError, Result};

pub fn div_ceil_u64(n: u64, d: u64) -> Result<u64> {
    if d == 0 {
        return Err(ImageError::OffsetOverflow);
    }
    Ok(n.div_ceil(d))
}

/// Check that `[offset, offset + len)` lies inside a backend of `capacity` bytes.
pub fn checked_range(offset: u64, len: usize, capacity: u64) -> Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(ImageError::OffsetOverflow)?;
    if end > capacity {
        return Err(ImageError::OutOfBounds {
            offset,
            len,
            capacity,
        });
    }
    Ok(())
}

pub fn usize_from(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| ImageError::OffsetOverflow)
}
