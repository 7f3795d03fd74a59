use super::*;
use proptest::prelude::*;
use std::cmp::Ordering;
use std::io::Cursor;

fn records_buffer(keys: &[&[u8]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(keys.len() * RECORD_SIZE);
    for key in keys {
        data.extend_from_slice(Record::with_prefix(key).as_bytes());
    }
    data
}

#[test]
fn test_bytes_order_is_lexicographic() {
    let a = Record::with_prefix(b"apple");
    let b = Record::with_prefix(b"banana");
    assert_eq!(RecordOrder::Bytes.compare(a.as_bytes(), b.as_bytes()), Ordering::Less);
    assert_eq!(RecordOrder::Bytes.compare(b.as_bytes(), a.as_bytes()), Ordering::Greater);
    assert_eq!(RecordOrder::Bytes.compare(a.as_bytes(), a.as_bytes()), Ordering::Equal);
}

#[test]
fn test_high_bytes_compare_unsigned() {
    let low = Record::with_prefix(&[0x7f]);
    let high = Record::with_prefix(&[0x80]);
    for order in [RecordOrder::Bytes, RecordOrder::NulTerminated] {
        assert_eq!(order.compare(low.as_bytes(), high.as_bytes()), Ordering::Less);
    }
}

#[test]
fn test_nul_terminated_ignores_bytes_after_zero() {
    let mut a = Record::with_prefix(b"same");
    let mut b = Record::with_prefix(b"same");
    a.as_mut_bytes()[10] = b'z';
    b.as_mut_bytes()[10] = b'a';
    assert_eq!(
        RecordOrder::NulTerminated.compare(a.as_bytes(), b.as_bytes()),
        Ordering::Equal
    );
    assert_eq!(RecordOrder::Bytes.compare(a.as_bytes(), b.as_bytes()), Ordering::Greater);
}

#[test]
fn test_nul_terminated_full_record_without_zero() {
    let a = Record::with_prefix(&[b'x'; RECORD_SIZE]);
    let mut b = Record::with_prefix(&[b'x'; RECORD_SIZE]);
    assert_eq!(
        RecordOrder::NulTerminated.compare(a.as_bytes(), b.as_bytes()),
        Ordering::Equal
    );
    b.as_mut_bytes()[RECORD_SIZE - 1] = b'y';
    assert_eq!(
        RecordOrder::NulTerminated.compare(a.as_bytes(), b.as_bytes()),
        Ordering::Less
    );
}

#[test]
fn test_nul_terminated_shorter_slice_sorts_first() {
    assert_eq!(compare_nul_terminated(b"ab", b"abc"), Ordering::Less);
    assert_eq!(compare_nul_terminated(b"ab\0", b"ab"), Ordering::Equal);
}

#[test]
fn test_record_order_parse() {
    assert_eq!("bytes".parse::<RecordOrder>(), Ok(RecordOrder::Bytes));
    assert_eq!(
        "nul-terminated".parse::<RecordOrder>(),
        Ok(RecordOrder::NulTerminated)
    );
    assert!("numeric".parse::<RecordOrder>().is_err());
    assert_eq!(RecordOrder::NulTerminated.to_string(), "nul-terminated");
}

#[test]
fn test_with_prefix_truncates() {
    let long = vec![b'q'; RECORD_SIZE + 10];
    let rec = Record::with_prefix(&long);
    assert_eq!(rec.as_bytes().len(), RECORD_SIZE);
    assert!(rec.as_bytes().iter().all(|&b| b == b'q'));
}

#[test]
fn test_sort_batch() {
    let keys: [&[u8]; 4] = [b"delta", b"alpha", b"charlie", b"bravo"];
    let mut batch: Vec<Record> = keys
        .iter()
        .map(|k| Record::with_prefix(k))
        .collect();
    sort_batch(&mut batch, RecordOrder::Bytes);
    let firsts: Vec<u8> = batch.iter().map(|r| r.as_bytes()[0]).collect();
    assert_eq!(firsts, b"abcd");
}

#[test]
fn test_budget_lease_released_on_drop() {
    let budget = MemoryBudget::new(2 * RECORD_SIZE);
    let a = Record::try_allocate(Some(&budget)).unwrap();
    let b = Record::try_allocate(Some(&budget)).unwrap();
    assert_eq!(budget.used(), 2 * RECORD_SIZE);
    assert!(Record::try_allocate(Some(&budget)).is_none());
    drop(a);
    assert_eq!(budget.available(), RECORD_SIZE);
    let c = Record::try_allocate(Some(&budget));
    assert!(c.is_some());
    drop(b);
    drop(c);
    assert_eq!(budget.used(), 0);
}

#[test]
fn test_budget_clones_share_allowance() {
    let budget = MemoryBudget::new(100);
    let other = budget.clone();
    let lease = budget.try_lease(60).unwrap();
    assert_eq!(lease.bytes(), 60);
    assert!(other.try_lease(50).is_none());
    assert!(other.try_lease(40).is_some());
}

#[test]
fn test_unbudgeted_allocation_is_zeroed() {
    let rec = Record::try_allocate(None).unwrap();
    assert_eq!(rec.as_bytes().len(), RECORD_SIZE);
    assert!(rec.as_bytes().iter().all(|&b| b == 0));
}

#[tokio::test]
async fn test_stream_reads_whole_range() {
    let data = records_buffer(&[b"one", b"two", b"three"]);
    let len = data.len() as u64;
    let mut stream = RecordStream::open(Cursor::new(data), 0, len, None)
        .await
        .unwrap();
    let mut seen = Vec::new();
    while let Some(rec) = stream.next().await {
        seen.push(rec.as_bytes()[..3].to_vec());
    }
    assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec(), b"thr".to_vec()]);
    assert_eq!(stream.yielded(), 3);
    assert_eq!(stream.offset(), len);
    assert!(matches!(stream.end(), Some(StreamEnd::EndOfRange)));
}

#[tokio::test]
async fn test_stream_respects_sub_range() {
    let data = records_buffer(&[b"a", b"b", b"c", b"d"]);
    let mut stream = RecordStream::open(
        Cursor::new(data),
        RECORD_SIZE_U64,
        3 * RECORD_SIZE_U64,
        None,
    )
    .await
    .unwrap();
    let first = stream.next().await.unwrap();
    let second = stream.next().await.unwrap();
    assert_eq!(first.as_bytes()[0], b'b');
    assert_eq!(second.as_bytes()[0], b'c');
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_stops_on_memory_pressure() {
    let data = records_buffer(&[b"a", b"b", b"c", b"d", b"e"]);
    let len = data.len() as u64;
    let budget = MemoryBudget::new(2 * RECORD_SIZE);
    let mut stream = RecordStream::open(Cursor::new(data), 0, len, Some(budget.clone()))
        .await
        .unwrap();
    let mut held = Vec::new();
    while let Some(rec) = stream.next().await {
        held.push(rec);
    }
    assert_eq!(held.len(), 2);
    assert!(matches!(stream.take_end(), Some(StreamEnd::MemoryPressure)));
    assert_eq!(stream.offset(), 2 * RECORD_SIZE_U64);
    drop(held);
    assert_eq!(budget.used(), 0);
}

#[tokio::test]
async fn test_stream_reports_short_read() {
    // Range claims three records but only two exist.
    let data = records_buffer(&[b"a", b"b"]);
    let mut stream = RecordStream::open(Cursor::new(data), 0, 3 * RECORD_SIZE_U64, None)
        .await
        .unwrap();
    let mut count = 0;
    while stream.next().await.is_some() {
        count += 1;
    }
    assert_eq!(count, 2);
    match stream.take_end() {
        Some(StreamEnd::Failed(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("expected read failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_range_ends_immediately() {
    let data = records_buffer(&[b"a"]);
    let mut stream = RecordStream::open(Cursor::new(data), RECORD_SIZE_U64, RECORD_SIZE_U64, None)
        .await
        .unwrap();
    assert!(stream.next().await.is_none());
    assert_eq!(stream.yielded(), 0);
}

proptest! {
    #[test]
    fn prop_orders_agree_without_zero_bytes(
        a in proptest::collection::vec(1u8..=255, 0..64),
        b in proptest::collection::vec(1u8..=255, 0..64),
    ) {
        // Zero padding after the prefix is the only zero byte in each record.
        let ra = Record::with_prefix(&a);
        let rb = Record::with_prefix(&b);
        prop_assert_eq!(
            RecordOrder::Bytes.compare(ra.as_bytes(), rb.as_bytes()),
            RecordOrder::NulTerminated.compare(ra.as_bytes(), rb.as_bytes())
        );
    }

    #[test]
    fn prop_nul_terminated_is_antisymmetric(
        a in proptest::collection::vec(any::<u8>(), 0..32),
        b in proptest::collection::vec(any::<u8>(), 0..32),
    ) {
        let ra = Record::with_prefix(&a);
        let rb = Record::with_prefix(&b);
        prop_assert_eq!(
            compare_nul_terminated(ra.as_bytes(), rb.as_bytes()),
            compare_nul_terminated(rb.as_bytes(), ra.as_bytes()).reverse()
        );
    }
}
