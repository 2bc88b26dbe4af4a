use crate::{ExtentTable, ImageError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SegmentKind {
    /// Unused blocks; served as zeros.
    Zero,
    /// Used blocks stored in the image at `physical_offset`.
    Physical { physical_offset: u64 },
}

/// One piece of a read request. Never crosses an extent or gap boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub virtual_offset: u64,
    pub length: u64,
}

impl Segment {
    pub fn is_zero(&self) -> bool {
        matches!(self.kind, SegmentKind::Zero)
    }
}

/// Ordered segments exactly covering `[offset, offset + count)` of the virtual device.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadPlan {
    pub offset: u64,
    pub segments: Vec<Segment>,
}

impl ReadPlan {
    pub fn len(&self) -> u64 {
        self.segments.iter().map(|s| s.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    /// Bytes that must come from the image.
    pub fn physical_bytes(&self) -> u64 {
        self.segments
            .iter()
            .filter(|s| !s.is_zero())
            .map(|s| s.length)
            .sum()
    }
}

/// Decompose a virtual read into zero-fill and image sub-reads.
///
/// Costs one binary search plus one step per extent or gap the range touches.
pub fn translate(
    table: &ExtentTable,
    device_size: u64,
    offset: u64,
    count: u32,
) -> Result<ReadPlan> {
    let len = count as u64;
    let end = offset
        .checked_add(len)
        .ok_or(ImageError::OffsetOverflow)?;
    if end > device_size {
        return Err(ImageError::OutOfRange {
            offset,
            len,
            capacity: device_size,
        });
    }

    let mut segments = Vec::new();
    let extents = table.as_slice();
    let mut idx = table.first_ending_after(offset);
    let mut pos = offset;

    while pos < end {
        match extents.get(idx) {
            Some(extent) if extent.virtual_offset <= pos => {
                let seg_end = extent.virtual_end().min(end);
                segments.push(Segment {
                    kind: SegmentKind::Physical {
                        physical_offset: extent.physical_offset + (pos - extent.virtual_offset),
                    },
                    virtual_offset: pos,
                    length: seg_end - pos,
                });
                pos = seg_end;
                idx += 1;
            }
            next => {
                let gap_end = next.map_or(end, |e| e.virtual_offset.min(end));
                segments.push(Segment {
                    kind: SegmentKind::Zero,
                    virtual_offset: pos,
                    length: gap_end - pos,
                });
                pos = gap_end;
            }
        }
    }

    Ok(ReadPlan { offset, segments })
}
