use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;
use serde::Serialize;

use crate::dispatch::{dispatch, ReadReport, TruncatedImageWarning};
use crate::plan::{translate, ReadPlan};
use crate::util::usize_from;
use crate::{
    ExtentTable, ImageBackend, ImageError, ImageHeader, ImageMetadata, OpenOptions, Result,
};

/// State built once by [`Session::prepare`] and shared read-only afterwards.
#[derive(Debug)]
struct Ready {
    header: ImageHeader,
    extents: ExtentTable,
    bitmap_crc: u32,
    block_start: u64,
}

#[derive(Debug, Default)]
struct SessionCounters {
    reads: AtomicU64,
    bytes_read: AtomicU64,
    physical_bytes: AtomicU64,
    zero_bytes: AtomicU64,
    truncated_reads: AtomicU64,
    range_errors: AtomicU64,
    io_errors: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub reads: u64,
    pub bytes_read: u64,
    pub physical_bytes: u64,
    pub zero_bytes: u64,
    pub truncated_reads: u64,
    pub range_errors: u64,
    pub io_errors: u64,
}

impl SessionCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            reads: self.reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            physical_bytes: self.physical_bytes.load(Ordering::Relaxed),
            zero_bytes: self.zero_bytes.load(Ordering::Relaxed),
            truncated_reads: self.truncated_reads.load(Ordering::Relaxed),
            range_errors: self.range_errors.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}

/// Result of [`Session::read`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub data: Bytes,
    pub truncated: Vec<TruncatedImageWarning>,
}

/// One opened image, serving reads of the original device.
///
/// A session starts uninitialized. [`Session::prepare`] parses the image and builds the extent
/// table exactly once; concurrent callers wait for the first one and all observe the same
/// outcome. A failed prepare is cached and the session never serves reads. After that the
/// session is immutable apart from its counters, so `&Session` can be shared across threads.
#[derive(Debug)]
pub struct Session<B> {
    export: String,
    options: OpenOptions,
    backend: B,
    state: OnceLock<Result<Ready>>,
    counters: SessionCounters,
}

impl<B: ImageBackend> Session<B> {
    pub fn new(export: impl Into<String>, backend: B) -> Self {
        Self::with_options(export, backend, OpenOptions::default())
    }

    pub fn with_options(export: impl Into<String>, backend: B, options: OpenOptions) -> Self {
        Self {
            export: export.into(),
            options,
            backend,
            state: OnceLock::new(),
            counters: SessionCounters::default(),
        }
    }

    /// `new` followed by `prepare`.
    pub fn open(export: impl Into<String>, backend: B) -> Result<Self> {
        let session = Self::new(export, backend);
        session.prepare()?;
        Ok(session)
    }

    /// Parse the image and build the extent table. Idempotent.
    pub fn prepare(&self) -> Result<()> {
        match self.state.get_or_init(|| self.load()) {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        }
    }

    fn load(&self) -> Result<Ready> {
        let result = ImageMetadata::read(&self.backend, &self.options).and_then(|meta| {
            let extents = ExtentTable::build(&meta.header, &meta.bitmap, meta.block_start)?;
            Ok(Ready {
                header: meta.header,
                extents,
                bitmap_crc: meta.bitmap_crc,
                block_start: meta.block_start,
            })
        });

        match &result {
            Ok(ready) => tracing::debug!(
                export = %self.export,
                device_size = ready.header.device_size,
                block_size = ready.header.block_size,
                total_block = ready.header.total_block,
                used_block = ready.header.used_block,
                bitmap_size = ready.header.bitmap_size,
                block_start = ready.block_start,
                blocks_per_checksum = ready.header.blocks_per_checksum,
                checksum_size = ready.header.checksum_size,
                extents = ready.extents.len(),
                "opened partclone image"
            ),
            Err(err) => tracing::warn!(export = %self.export, error = %err, "failed to open image"),
        }
        result
    }

    fn ready(&self) -> Result<&Ready> {
        match self.state.get() {
            None => Err(ImageError::NotReady),
            Some(Ok(ready)) => Ok(ready),
            Some(Err(e)) => Err(e.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state.get(), Some(Ok(_)))
    }

    pub fn export(&self) -> &str {
        &self.export
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Size of the original device in bytes.
    pub fn virtual_size(&self) -> Result<u64> {
        Ok(self.ready()?.header.device_size)
    }

    pub fn header(&self) -> Result<&ImageHeader> {
        Ok(&self.ready()?.header)
    }

    pub fn extents(&self) -> Result<&ExtentTable> {
        Ok(&self.ready()?.extents)
    }

    pub fn bitmap_crc(&self) -> Result<u32> {
        Ok(self.ready()?.bitmap_crc)
    }

    pub fn block_start(&self) -> Result<u64> {
        Ok(self.ready()?.block_start)
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Translate a request without performing it.
    pub fn plan(&self, offset: u64, count: u32) -> Result<ReadPlan> {
        let ready = self.ready()?;
        let plan = translate(&ready.extents, ready.header.device_size, offset, count);
        if matches!(&plan, Err(e) if e.is_range_error()) {
            self.counters.range_errors.fetch_add(1, Ordering::Relaxed);
        }
        plan
    }

    /// Read `count` bytes of the original device starting at `offset`.
    pub fn read(&self, offset: u64, count: u32) -> Result<ReadOutcome> {
        let mut buf = vec![0u8; usize_from(count as u64)?];
        let report = self.read_into(offset, &mut buf)?;
        Ok(ReadOutcome {
            data: Bytes::from(buf),
            truncated: report.truncated,
        })
    }

    /// Fill `buf` from the original device starting at `offset`.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<ReadReport> {
        let count = u32::try_from(buf.len()).map_err(|_| {
            self.counters.range_errors.fetch_add(1, Ordering::Relaxed);
            ImageError::OutOfRange {
                offset,
                len: buf.len() as u64,
                capacity: u32::MAX as u64,
            }
        })?;
        let plan = self.plan(offset, count)?;

        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let report = dispatch(&self.backend, &plan, buf).inspect_err(|_| {
            self.counters.io_errors.fetch_add(1, Ordering::Relaxed);
        })?;

        self.counters
            .bytes_read
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        self.counters
            .physical_bytes
            .fetch_add(report.physical_bytes, Ordering::Relaxed);
        self.counters
            .zero_bytes
            .fetch_add(report.zero_bytes, Ordering::Relaxed);
        if report.is_truncated() {
            self.counters.truncated_reads.fetch_add(1, Ordering::Relaxed);
        }
        Ok(report)
    }

    /// Release the session, handing back the backend.
    pub fn close(self) -> B {
        tracing::debug!(export = %self.export, stats = ?self.counters.snapshot(), "closing image");
        self.backend
    }
}
