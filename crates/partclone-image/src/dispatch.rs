use serde::Serialize;

use crate::plan::{ReadPlan, SegmentKind};
use crate::util::usize_from;
use crate::{ImageBackend, ImageError, Result};

/// A used block range that lies past the end of the image file and was served as zeros.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TruncatedImageWarning {
    pub virtual_offset: u64,
    pub physical_offset: u64,
    pub requested: u64,
    pub zero_filled: u64,
}

/// What a dispatched read did, besides filling the buffer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadReport {
    pub physical_bytes: u64,
    pub zero_bytes: u64,
    pub truncated: Vec<TruncatedImageWarning>,
}

impl ReadReport {
    pub fn is_truncated(&self) -> bool {
        !self.truncated.is_empty()
    }
}

/// Execute `plan` into `buf`, in plan order.
///
/// `buf` must be exactly as long as the plan, otherwise the read fails with `OutOfRange` before
/// any I/O. On a backend error the bytes of earlier segments stay in `buf`.
pub fn dispatch<B: ImageBackend + ?Sized>(
    backend: &B,
    plan: &ReadPlan,
    buf: &mut [u8],
) -> Result<ReadReport> {
    if buf.len() as u64 != plan.len() {
        return Err(ImageError::OutOfRange {
            offset: plan.offset,
            len: buf.len() as u64,
            capacity: plan.len(),
        });
    }
    let mut report = ReadReport::default();
    if plan.is_empty() {
        return Ok(report);
    }

    let image_len = backend.len()?;
    let mut cursor = 0usize;

    for seg in plan.iter() {
        let seg_len = usize_from(seg.length)?;
        let out = &mut buf[cursor..cursor + seg_len];
        cursor += seg_len;

        let physical_offset = match seg.kind {
            SegmentKind::Zero => {
                out.fill(0);
                report.zero_bytes += seg.length;
                continue;
            }
            SegmentKind::Physical { physical_offset } => physical_offset,
        };

        let readable = image_len.saturating_sub(physical_offset).min(seg.length);
        let (head, tail) = out.split_at_mut(usize_from(readable)?);
        let mut filled = tail.len() as u64;

        if !head.is_empty() {
            match backend.read_at(physical_offset, head) {
                Ok(()) => report.physical_bytes += readable,
                // The image shrank since `len` was taken.
                Err(ImageError::OutOfBounds { .. }) => {
                    head.fill(0);
                    filled = seg.length;
                }
                Err(ImageError::Io(msg)) => return Err(ImageError::Io(msg)),
                Err(other) => return Err(ImageError::Io(other.to_string())),
            }
        }

        if filled > 0 {
            tail.fill(0);
            let warning = TruncatedImageWarning {
                virtual_offset: seg.virtual_offset,
                physical_offset,
                requested: seg.length,
                zero_filled: filled,
            };
            tracing::warn!(
                virtual_offset = warning.virtual_offset,
                physical_offset = warning.physical_offset,
                requested = warning.requested,
                zero_filled = warning.zero_filled,
                image_len,
                "image truncated; zero-filling missing block data"
            );
            report.zero_bytes += filled;
            report.truncated.push(warning);
        }
    }

    Ok(report)
}
