use super::*;
use crate::record::RECORD_SIZE_U64;
use proptest::prelude::*;

#[test]
fn test_ten_records_three_shards() {
    let ranges = shard_ranges(10, 3).unwrap();
    assert_eq!(
        ranges,
        vec![
            ShardRange { start_record: 0, end_record: 4 },
            ShardRange { start_record: 4, end_record: 7 },
            ShardRange { start_record: 7, end_record: 10 },
        ]
    );
}

#[test]
fn test_even_split() {
    let ranges = shard_ranges(12, 4).unwrap();
    assert!(ranges.iter().all(|r| r.len() == 3));
    assert_eq!(ranges[3].end_record, 12);
}

#[test]
fn test_single_shard_owns_everything() {
    let r = shard_range(5, 0, 1).unwrap();
    assert_eq!(r, ShardRange { start_record: 0, end_record: 5 });
    assert_eq!(r.start_offset(), 0);
    assert_eq!(r.end_offset(), 5 * RECORD_SIZE_U64);
}

#[test]
fn test_too_few_records_rejected() {
    assert_eq!(
        shard_range(3, 0, 3),
        Err(PartitionError::TooFewRecords { records: 3, shards: 3 })
    );
    assert!(shard_range(2, 1, 3).is_err());
}

#[test]
fn test_bad_shard_arguments() {
    assert_eq!(shard_range(10, 0, 0), Err(PartitionError::NoShards));
    assert_eq!(
        shard_range(10, 3, 3),
        Err(PartitionError::ShardOutOfRange { shard: 3, shards: 3 })
    );
}

#[test]
fn test_total_records_alignment() {
    assert_eq!(total_records(0), Ok(0));
    assert_eq!(total_records(3 * RECORD_SIZE_U64), Ok(3));
    assert!(matches!(
        total_records(3 * RECORD_SIZE_U64 + 1),
        Err(PartitionError::NotRecordAligned { .. })
    ));
}

#[test]
fn test_verification_range_overlaps_neighbours() {
    // Shards [0,4) [4,7) [7,10)
    assert_eq!(
        verification_range(10, 0, 3).unwrap(),
        ShardRange { start_record: 0, end_record: 5 }
    );
    assert_eq!(
        verification_range(10, 1, 3).unwrap(),
        ShardRange { start_record: 3, end_record: 8 }
    );
    assert_eq!(
        verification_range(10, 2, 3).unwrap(),
        ShardRange { start_record: 6, end_record: 10 }
    );
}

#[test]
fn test_verification_range_single_shard_unchanged() {
    assert_eq!(verification_range(4, 0, 1).unwrap(), shard_range(4, 0, 1).unwrap());
}

proptest! {
    #[test]
    fn prop_ranges_cover_without_overlap(shards in 1usize..64, extra in 1u64..10_000) {
        let total = shards as u64 + extra;
        let ranges = shard_ranges(total, shards).unwrap();
        prop_assert_eq!(ranges.len(), shards);
        prop_assert_eq!(ranges[0].start_record, 0);
        prop_assert_eq!(ranges[shards - 1].end_record, total);
        for pair in ranges.windows(2) {
            prop_assert_eq!(pair[0].end_record, pair[1].start_record);
        }
        let sum: u64 = ranges.iter().map(|r| r.len()).sum();
        prop_assert_eq!(sum, total);
        // Sizes differ by at most one and larger shards come first.
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].len() >= pair[1].len());
            prop_assert!(pair[0].len() - pair[1].len() <= 1);
        }
    }

    #[test]
    fn prop_verification_ranges_stay_in_file(shards in 1usize..32, extra in 1u64..1000) {
        let total = shards as u64 + extra;
        for shard in 0..shards {
            let base = shard_range(total, shard, shards).unwrap();
            let widened = verification_range(total, shard, shards).unwrap();
            prop_assert!(widened.end_record <= total);
            prop_assert!(widened.start_record <= base.start_record);
            prop_assert!(widened.len() <= base.len() + 2);
        }
    }
}
