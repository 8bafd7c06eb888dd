use bytes::Bytes;
use regiond::core::region::{CellKey, CellValue, Memtable, row_successor};

fn key(row: &str, column: &str, ts: u64) -> CellKey {
    CellKey::new(Bytes::from(row.to_string()), column, ts)
}

#[test]
fn test_ordering_is_row_then_column_then_newest_first() {
    let mut memtable = Memtable::new();
    memtable.insert(key("b", "f:x", 1), CellValue::Put(Bytes::from_static(b"1")));
    memtable.insert(key("a", "f:y", 5), CellValue::Put(Bytes::from_static(b"2")));
    memtable.insert(key("a", "f:x", 2), CellValue::Put(Bytes::from_static(b"3")));
    memtable.insert(key("a", "f:x", 9), CellValue::Put(Bytes::from_static(b"4")));

    let keys: Vec<(Bytes, String, u64)> = memtable
        .cells()
        .keys()
        .map(|k| (k.row.clone(), k.column.clone(), k.timestamp))
        .collect();
    assert_eq!(
        keys,
        vec![
            (Bytes::from_static(b"a"), "f:x".to_string(), 9),
            (Bytes::from_static(b"a"), "f:x".to_string(), 2),
            (Bytes::from_static(b"a"), "f:y".to_string(), 5),
            (Bytes::from_static(b"b"), "f:x".to_string(), 1),
        ]
    );
}

#[test]
fn test_size_accounting_tracks_inserts_and_replacements() {
    let mut memtable = Memtable::new();
    assert_eq!(memtable.size(), 0);

    memtable.insert(key("row", "f:x", 1), CellValue::Put(Bytes::from_static(b"abc")));
    let after_first = memtable.size();
    assert!(after_first > 3);

    // Replacing the same key only swaps the value bytes.
    memtable.insert(
        key("row", "f:x", 1),
        CellValue::Put(Bytes::from_static(b"abcdef")),
    );
    assert_eq!(memtable.size(), after_first + 3);
    assert_eq!(memtable.len(), 1);

    let taken = memtable.take();
    assert_eq!(taken.len(), 1);
    assert!(memtable.is_empty());
    assert_eq!(memtable.size(), 0);
}

#[test]
fn test_row_navigation() {
    let mut memtable = Memtable::new();
    memtable.insert(key("apple", "f:x", 1), CellValue::Put(Bytes::new()));
    memtable.insert(key("cherry", "f:x", 1), CellValue::Put(Bytes::new()));

    let banana = Bytes::from_static(b"banana");
    assert_eq!(
        memtable.next_row_at_or_after(&banana),
        Some(Bytes::from_static(b"cherry"))
    );
    assert_eq!(
        memtable.prev_row_at_or_before(&banana),
        Some(Bytes::from_static(b"apple"))
    );
    assert_eq!(
        memtable.next_row_at_or_after(&Bytes::from_static(b"apple")),
        Some(Bytes::from_static(b"apple"))
    );
    assert_eq!(memtable.next_row_at_or_after(&Bytes::from_static(b"zzz")), None);
}

#[test]
fn test_row_successor_sorts_immediately_after() {
    let row = Bytes::from_static(b"abc");
    let next = row_successor(&row);
    assert!(next > row);
    assert!(next < Bytes::from_static(b"abd"));
}

#[test]
fn test_row_range_covers_exactly_one_row() {
    let mut memtable = Memtable::new();
    memtable.insert(key("a", "f:x", 1), CellValue::Put(Bytes::new()));
    memtable.insert(key("ab", "f:x", 1), CellValue::Put(Bytes::new()));
    memtable.insert(key("b", "f:x", 1), CellValue::Put(Bytes::new()));

    let rows: Vec<Bytes> = memtable
        .row_range(&Bytes::from_static(b"a"))
        .map(|(k, _)| k.row.clone())
        .collect();
    assert_eq!(rows, vec![Bytes::from_static(b"a")]);
}
