//! Property-based tests for the pure building blocks
//!
//! Covers:
//! 1. Payload generation
//! 2. Worker count resolution
//! 3. Option token splitting
//! 4. File layout arithmetic
//! 5. Flush watermark monotonicity under races
//! 6. Latency statistics

use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

use syscallmeter::payload::random_payload;
use syscallmeter::settings::{resolve_workers, Settings, MAX_WORKERS};
use syscallmeter::watermark::FlushWatermark;
use syscallmeter::workload::clock::{Log2Histogram, TruncatedMean};
use syscallmeter::workload::write_sync::{FileLayout, WriteSyncParams};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_payload_is_uppercase_and_deterministic(len in 0usize..4096, seed in any::<u32>()) {
        let a = random_payload(len, seed);
        prop_assert_eq!(a.len(), len);
        prop_assert!(a.iter().all(u8::is_ascii_uppercase));
        prop_assert_eq!(a, random_payload(len, seed));
    }

    #[test]
    fn prop_worker_count_bounded(available in 0usize..2048, limit in 1usize..2048) {
        let workers = resolve_workers(available, limit);
        prop_assert!(workers >= 1);
        prop_assert!(workers <= MAX_WORKERS);
        prop_assert!(workers <= limit);
        if available > 1 {
            prop_assert!(workers < available);
        }
    }

    #[test]
    fn prop_option_tokens_never_empty(raw in "[a-z0-9, ]{0,40}") {
        let settings = Settings {
            options: Some(raw.clone()),
            ..Settings::default()
        };
        for token in settings.option_tokens() {
            prop_assert!(!token.is_empty());
            prop_assert!(!token.contains(','));
        }
    }

    #[test]
    fn prop_layout_file_index_in_range(
        file_size in 1u64..100_000,
        file_count in 1u64..1000,
        frac in 0.0f64..1.0,
    ) {
        let layout = FileLayout { file_size, file_count };
        let offset = (((layout.capacity() as f64) * frac) as u64).min(layout.capacity() - 1);
        let index = layout.file_index(offset);
        prop_assert!(index < file_count);
        prop_assert!(offset < layout.file_end(index));
        prop_assert!(layout.last_file_index(offset + 1) == index);
    }

    #[test]
    fn prop_sharesync_parses_positive(n in 1u32..1024) {
        let mut params = WriteSyncParams::default();
        params.parse_option(&format!("sharesync{}", n)).unwrap();
        prop_assert_eq!(params.sync_concurrency, n);
    }

    #[test]
    fn prop_truncated_mean_within_bounds(
        preliminary in 2u64..10_000,
        samples in prop::collection::vec(0u64..100_000, 1..200),
    ) {
        let mut mean = TruncatedMean::new(preliminary);
        for &s in &samples {
            mean.record(s);
        }
        let summary = mean.finish(samples.len() as u64);
        prop_assert!(summary.above + summary.below <= samples.len() as u64);
        if summary.above + summary.below < samples.len() as u64 {
            prop_assert!(summary.truncated > summary.lower);
            prop_assert!(summary.truncated < summary.upper);
        }
        prop_assert_eq!(summary.max, *samples.iter().max().unwrap());
    }

    #[test]
    fn prop_log2_bucket_contains_sample(sample in 0u64..(1 << 30)) {
        let bucket = Log2Histogram::bucket(sample);
        let low = if bucket == 0 { 0 } else { 1u64 << (bucket - 1) };
        let high = (1u64 << bucket) - 1;
        prop_assert!(low <= sample && sample <= high);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_watermark_ends_at_max_proposal(
        proposals in prop::collection::vec(prop::collection::vec(0u64..1_000_000, 1..50), 2..6),
    ) {
        let mark = Arc::new(FlushWatermark::new(0));
        let expected = proposals.iter().flatten().copied().max().unwrap_or(0);

        let handles: Vec<_> = proposals
            .into_iter()
            .map(|batch| {
                let mark = Arc::clone(&mark);
                thread::spawn(move || {
                    let mut seen = 0;
                    for candidate in batch {
                        mark.advance(candidate);
                        let now = mark.get();
                        assert!(now >= seen);
                        assert!(now >= candidate);
                        seen = now;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        prop_assert_eq!(mark.get(), expected);
    }
}
