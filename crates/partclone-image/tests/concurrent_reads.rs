#![cfg(not(target_arch = "wasm32"))]

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{build_image, reference_device, Layout};
use partclone_image::{MemBackend, Session};

#[test]
fn concurrent_reads_share_one_session() {
    let bits: String = (0..256).map(|i| if i % 7 < 4 { '1' } else { '0' }).collect();
    let layout = Layout::new(512, &bits).checksums(5, 4);
    let device = Arc::new(reference_device(&layout));
    let session = Arc::new(Session::open("shared", MemBackend::from_vec(build_image(&layout))).unwrap());

    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let session = Arc::clone(&session);
            let device = Arc::clone(&device);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let size = device.len() as u64;
                for k in 0..200u64 {
                    let offset = (k * 4099 + t as u64 * 977) % size;
                    let len = ((k * 131) % 3000).min(size - offset) as u32;
                    let out = session.read(offset, len).unwrap();
                    assert_eq!(
                        &out.data[..],
                        &device[offset as usize..offset as usize + len as usize]
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(session.stats().reads, (THREADS * 200) as u64);
}

#[test]
fn concurrent_prepare_runs_once() {
    let layout = Layout::new(512, "1101");
    let session = Arc::new(Session::new("lazy", MemBackend::from_vec(build_image(&layout))));

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| session.prepare().unwrap());
        }
    });
    assert!(session.is_ready());
    assert_eq!(session.extents().unwrap().len(), 2);
}
