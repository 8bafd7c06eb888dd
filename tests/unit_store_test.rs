use bytes::Bytes;
use regiond::core::region::{CellKey, CellValue, merge_and_prune};
use std::collections::BTreeMap;
use std::sync::Arc;

fn key(row: &str, column: &str, ts: u64) -> CellKey {
    CellKey::new(Bytes::from(row.to_string()), column, ts)
}

fn source(cells: Vec<(CellKey, CellValue)>) -> Arc<BTreeMap<CellKey, CellValue>> {
    Arc::new(cells.into_iter().collect())
}

#[test]
fn test_merge_caps_versions_per_column() {
    let a = source(vec![
        (key("r", "f:x", 1), CellValue::Put(Bytes::from_static(b"1"))),
        (key("r", "f:x", 2), CellValue::Put(Bytes::from_static(b"2"))),
    ]);
    let b = source(vec![
        (key("r", "f:x", 3), CellValue::Put(Bytes::from_static(b"3"))),
        (key("r", "f:y", 1), CellValue::Put(Bytes::from_static(b"y"))),
    ]);

    let merged = merge_and_prune(&[a, b], 2);
    // f:x keeps only the newest two versions; f:y keeps its one.
    let xs: Vec<u64> = merged
        .keys()
        .filter(|k| k.column == "f:x")
        .map(|k| k.timestamp)
        .collect();
    assert_eq!(xs, vec![3, 2]);
    assert!(merged.contains_key(&key("r", "f:y", 1)));
}

#[test]
fn test_merge_drops_masked_puts_but_keeps_the_tombstone() {
    let a = source(vec![
        (key("r", "f:x", 1), CellValue::Put(Bytes::from_static(b"old"))),
        (key("r", "f:x", 3), CellValue::Put(Bytes::from_static(b"new"))),
    ]);
    let b = source(vec![(key("r", "f:x", 2), CellValue::Delete)]);

    let merged = merge_and_prune(&[a, b], 10);
    // The put above the tombstone survives, the one below is gone, and the
    // tombstone itself is retained to keep masking unflushed older puts.
    assert_eq!(
        merged.get(&key("r", "f:x", 3)),
        Some(&CellValue::Put(Bytes::from_static(b"new")))
    );
    assert_eq!(merged.get(&key("r", "f:x", 2)), Some(&CellValue::Delete));
    assert_eq!(merged.get(&key("r", "f:x", 1)), None);
}

#[test]
fn test_newer_sources_shadow_older_at_identical_keys() {
    let older = source(vec![(
        key("r", "f:x", 5),
        CellValue::Put(Bytes::from_static(b"stale")),
    )]);
    let newer = source(vec![(
        key("r", "f:x", 5),
        CellValue::Put(Bytes::from_static(b"fresh")),
    )]);

    let merged = merge_and_prune(&[older, newer], 10);
    assert_eq!(
        merged.get(&key("r", "f:x", 5)),
        Some(&CellValue::Put(Bytes::from_static(b"fresh")))
    );
}
