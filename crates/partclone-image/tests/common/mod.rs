#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use partclone_image::{ImageBackend, MemBackend, Result};

pub use partclone_image::test_utils::{build_image, reference_device, Layout};

/// Wraps a backend and counts `read_at` calls.
#[derive(Debug, Default)]
pub struct CountingBackend {
    pub inner: MemBackend,
    pub reads: AtomicU64,
}

impl CountingBackend {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            inner: MemBackend::from_vec(image),
            reads: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ImageBackend for CountingBackend {
    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_at(offset, buf)
    }
}
