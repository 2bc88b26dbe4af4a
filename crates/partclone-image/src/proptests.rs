use crate::test_utils::{build_image, reference_device, Layout};
use crate::{translate, ByteOrder, MemBackend, SegmentKind, Session};
use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

const MAX_BLOCKS: usize = 300;
const MAX_READS: usize = 24;

fn block_size_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(512u32), Just(1024u32), Just(4096u32)]
}

fn stride_strategy() -> impl Strategy<Value = (u32, u16)> {
    prop_oneof![
        Just((1u32, 4u16)),
        Just((2u32, 4u16)),
        Just((3u32, 4u16)),
        Just((64u32, 4u16)),
        Just((5u32, 8u16)),
        Just((16u32, 0u16)),
    ]
}

fn bitmap_strategy() -> BoxedStrategy<Vec<bool>> {
    // Mix dense, sparse and uniform bitmaps so both long runs and isolated blocks appear.
    prop_oneof![
        prop::collection::vec(any::<bool>(), 1..=MAX_BLOCKS),
        prop::collection::vec(prop::bool::weighted(0.9), 1..=MAX_BLOCKS),
        prop::collection::vec(prop::bool::weighted(0.1), 1..=MAX_BLOCKS),
        (1..=MAX_BLOCKS).prop_map(|n| vec![true; n]),
        (1..=MAX_BLOCKS).prop_map(|n| vec![false; n]),
    ]
    .boxed()
}

#[derive(Debug, Clone)]
struct Scenario {
    block_size: u32,
    used: Vec<bool>,
    stride: (u32, u16),
    big_endian: bool,
    /// Fraction of a block cut from the end of the device.
    trim: f64,
    reads: Vec<(f64, u32)>,
}

fn scenario_strategy() -> impl Strategy<Value = Scenario> {
    (
        block_size_strategy(),
        bitmap_strategy(),
        stride_strategy(),
        any::<bool>(),
        prop_oneof![Just(0.0f64), 0.0f64..1.0],
        prop::collection::vec((0.0f64..=1.0, 0u32..=20_000), 1..=MAX_READS),
    )
        .prop_map(|(block_size, used, stride, big_endian, trim, reads)| Scenario {
            block_size,
            used,
            stride,
            big_endian,
            trim,
            reads,
        })
}

fn run_scenario(s: &Scenario) -> TestCaseResult {
    let trim = ((s.block_size as f64) * s.trim) as u64;
    let layout = Layout::from_used(s.block_size, s.used.clone())
        .checksums(s.stride.0, s.stride.1)
        .byte_order(if s.big_endian {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        })
        .trim_device(trim);
    let image = build_image(&layout);
    let device = reference_device(&layout);
    let device_size = device.len() as u64;
    prop_assert_eq!(device_size, s.used.len() as u64 * s.block_size as u64 - trim);

    let session = Session::open("prop", MemBackend::from_vec(image.clone()))
        .map_err(|e| TestCaseError::fail(format!("open failed: {e}")))?;
    prop_assert_eq!(session.virtual_size().unwrap(), device_size);

    let table = session.extents().unwrap();
    prop_assert_eq!(table.physical_end(), image.len() as u64);
    prop_assert_eq!(
        table.mapped_bytes(),
        s.used.iter().filter(|b| **b).count() as u64 * s.block_size as u64
    );
    for pair in table.as_slice().windows(2) {
        prop_assert!(pair[0].virtual_end() <= pair[1].virtual_offset);
        prop_assert!(pair[0].physical_end() <= pair[1].physical_offset);
    }

    for &(frac, len) in &s.reads {
        let offset = ((device_size as f64) * frac) as u64;
        let len = (len as u64).min(device_size - offset) as u32;

        let plan = translate(table, device_size, offset, len).unwrap();
        let mut pos = offset;
        for seg in plan.iter() {
            prop_assert_eq!(seg.virtual_offset, pos);
            prop_assert!(seg.length > 0);
            if let SegmentKind::Physical { physical_offset } = seg.kind {
                prop_assert!(physical_offset + seg.length <= image.len() as u64);
            }
            pos += seg.length;
        }
        prop_assert_eq!(pos, offset + len as u64);

        let got = session.read(offset, len).unwrap();
        prop_assert!(got.truncated.is_empty());
        let want = &device[offset as usize..offset as usize + len as usize];
        prop_assert_eq!(&got.data[..], want);
    }

    // The whole device reads back, and nothing past its end does.
    let whole = (device_size as u32).min(1 << 20);
    let got = session.read(device_size - whole as u64, whole).unwrap();
    prop_assert_eq!(&got.data[..], &device[(device_size - whole as u64) as usize..]);
    let past_end = session.read(device_size.saturating_sub(1), 2).unwrap_err();
    prop_assert!(past_end.is_range_error());
    let at_end = session.read(device_size, 1).unwrap_err();
    prop_assert!(at_end.is_range_error());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_session_matches_reference_device(scenario in scenario_strategy()) {
        run_scenario(&scenario)?;
    }
}
