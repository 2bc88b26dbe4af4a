//! Read-only access to partclone images as the block device they were taken from.
//!
//! A partclone image stores only the blocks that were in use, plus a usage bitmap and checksum
//! records. This crate maps reads of the original device onto the image:
//!
//! - [`ImageHeader`] / [`UsageBitmap`]: decoded image metadata
//! - [`ExtentTable`]: runs of used blocks with their offsets in the image file
//! - [`translate`]: splits a device read into zero-fill and image sub-reads
//! - [`Session`]: one opened image serving concurrent reads
//! - [`ExportCatalog`]: resolves export names to image files
//!
//! Image bytes come from an [`ImageBackend`]; [`StdFileBackend`] and [`MemBackend`] are provided.

mod backend;
mod bitmap;
mod catalog;
mod dispatch;
mod error;
mod extent;
pub mod header;
mod metadata;
mod plan;
mod session;
mod util;

pub use backend::{ImageBackend, MemBackend, StdFileBackend};
pub use bitmap::{IterOnes, UsageBitmap};
pub use catalog::{
    parse_manifest, validate_export_name, ExportCatalog, ExportEntry, MANIFEST_FILE,
    MAX_EXPORT_NAME_LEN,
};
pub use dispatch::{dispatch, ReadReport, TruncatedImageWarning};
pub use error::{ImageError, Result};
pub use extent::{Extent, ExtentTable};
pub use header::{ByteOrder, ImageHeader, HEADER_SIZE};
pub use metadata::{ImageMetadata, OpenOptions};
pub use plan::{translate, ReadPlan, Segment, SegmentKind};
pub use session::{ReadOutcome, Session, SessionStats};

/// Synthetic image builders shared by this workspace's tests.
///
/// Only compiled for this crate's own tests or with the `test-utils` feature. Not part of the
/// stable API.
#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;

#[cfg(test)]
mod proptests;
