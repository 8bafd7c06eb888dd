use bytes::Bytes;
use regiond::config::RegionConfig;
use regiond::core::region::{
    BatchOp, BatchUpdate, Region, RegionDescriptor, TableSchema,
};
use regiond::core::wal::{RollSignal, Wal};
use std::path::Path;
use std::sync::Arc;

fn descriptor() -> RegionDescriptor {
    RegionDescriptor::new(
        TableSchema::new("users", vec!["f".to_string()]),
        Bytes::new(),
        Bytes::new(),
        7,
    )
}

async fn open_region(root: &Path, conf: RegionConfig) -> (Arc<Region>, Arc<Wal>) {
    let wal = Arc::new(
        Wal::create(
            root.join("log"),
            64 * 1024 * 1024,
            Arc::new(RollSignal::default()),
        )
        .await
        .unwrap(),
    );
    let region = Region::open(descriptor(), root, wal.clone(), conf, &|| {})
        .await
        .unwrap();
    (region, wal)
}

fn put(row: &str, column: &str, value: &str) -> BatchUpdate {
    BatchUpdate {
        row: Bytes::from(row.to_string()),
        ops: vec![BatchOp::Put {
            column: column.to_string(),
            value: Bytes::from(value.to_string()),
        }],
    }
}

#[tokio::test]
async fn test_put_then_get_and_get_row() {
    let dir = tempfile::tempdir().unwrap();
    let (region, _wal) = open_region(dir.path(), RegionConfig::default()).await;

    region.batch_update(10, &put("alice", "f:x", "1")).await.unwrap();
    region.batch_update(20, &put("alice", "f:y", "2")).await.unwrap();

    let cells = region.get(&Bytes::from_static(b"alice"), "f:x", 1, u64::MAX);
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value, Bytes::from_static(b"1"));
    assert_eq!(cells[0].timestamp, 10);

    let row = region
        .get_row(&Bytes::from_static(b"alice"), u64::MAX)
        .expect("row exists");
    assert_eq!(row.cells.len(), 2);
    assert_eq!(row.cells["f:y"].value, Bytes::from_static(b"2"));

    assert!(region.get_row(&Bytes::from_static(b"bob"), u64::MAX).is_none());
}

#[tokio::test]
async fn test_versions_and_timestamp_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let (region, _wal) = open_region(dir.path(), RegionConfig::default()).await;

    for ts in [10, 20, 30] {
        region
            .batch_update(ts, &put("k", "f:x", &format!("v{ts}")))
            .await
            .unwrap();
    }

    let newest_two = region.get(&Bytes::from_static(b"k"), "f:x", 2, u64::MAX);
    assert_eq!(newest_two.len(), 2);
    assert_eq!(newest_two[0].value, Bytes::from_static(b"v30"));
    assert_eq!(newest_two[1].value, Bytes::from_static(b"v20"));

    // A timestamp ceiling hides newer versions.
    let as_of_25 = region.get(&Bytes::from_static(b"k"), "f:x", 1, 25);
    assert_eq!(as_of_25[0].value, Bytes::from_static(b"v20"));
}

#[tokio::test]
async fn test_delete_all_masks_older_versions_only() {
    let dir = tempfile::tempdir().unwrap();
    let (region, _wal) = open_region(dir.path(), RegionConfig::default()).await;
    let row = Bytes::from_static(b"k");

    region.batch_update(10, &put("k", "f:x", "old")).await.unwrap();
    region.delete_all(&row, Some("f:x"), 15).await.unwrap();
    assert!(region.get(&row, "f:x", 1, u64::MAX).is_empty());

    // A later put is unaffected by the old tombstone.
    region.batch_update(20, &put("k", "f:x", "new")).await.unwrap();
    let cells = region.get(&row, "f:x", 1, u64::MAX);
    assert_eq!(cells[0].value, Bytes::from_static(b"new"));
}

#[tokio::test]
async fn test_delete_family_spares_other_families() {
    let dir = tempfile::tempdir().unwrap();
    let schema = TableSchema::new("users", vec!["f".to_string(), "g".to_string()]);
    let descriptor = RegionDescriptor::new(schema, Bytes::new(), Bytes::new(), 7);
    let wal = Arc::new(
        Wal::create(
            dir.path().join("log"),
            64 * 1024 * 1024,
            Arc::new(RollSignal::default()),
        )
        .await
        .unwrap(),
    );
    let region = Region::open(descriptor, dir.path(), wal, RegionConfig::default(), &|| {})
        .await
        .unwrap();
    let row = Bytes::from_static(b"k");

    region.batch_update(10, &put("k", "f:x", "1")).await.unwrap();
    region.batch_update(10, &put("k", "g:x", "2")).await.unwrap();
    region.delete_family(&row, "f", 99).await.unwrap();

    let remaining = region.get_row(&row, u64::MAX).expect("g survives");
    assert_eq!(remaining.cells.len(), 1);
    assert!(remaining.cells.contains_key("g:x"));
}

#[tokio::test]
async fn test_flush_keeps_data_readable_and_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    let (region, _wal) = open_region(dir.path(), RegionConfig::default()).await;

    region.batch_update(10, &put("alice", "f:x", "1")).await.unwrap();
    region.flush_cache().await.unwrap();
    assert_eq!(region.memtable_size(), 0);

    let cells = region.get(&Bytes::from_static(b"alice"), "f:x", 1, u64::MAX);
    assert_eq!(cells[0].value, Bytes::from_static(b"1"));
    assert!(region.flushed_sequence_id() >= 1);

    // Reopen the region from disk: the flushed cell is still there.
    drop(region);
    let dir2 = dir.path();
    let (reopened, _wal2) = {
        let wal = Arc::new(
            Wal::create(
                dir2.join("log2"),
                64 * 1024 * 1024,
                Arc::new(RollSignal::default()),
            )
            .await
            .unwrap(),
        );
        let region = Region::open(descriptor(), dir2, wal.clone(), RegionConfig::default(), &|| {})
            .await
            .unwrap();
        (region, wal)
    };
    let cells = reopened.get(&Bytes::from_static(b"alice"), "f:x", 1, u64::MAX);
    assert_eq!(cells[0].value, Bytes::from_static(b"1"));
}

#[tokio::test]
async fn test_flush_reports_when_compaction_is_warranted() {
    let dir = tempfile::tempdir().unwrap();
    let conf = RegionConfig {
        compaction_threshold: 2,
        ..RegionConfig::default()
    };
    let (region, _wal) = open_region(dir.path(), conf).await;

    region.batch_update(1, &put("a", "f:x", "1")).await.unwrap();
    assert!(!region.flush_cache().await.unwrap());
    region.batch_update(2, &put("b", "f:x", "2")).await.unwrap();
    // Second store file reaches the threshold.
    assert!(region.flush_cache().await.unwrap());

    // Compaction merges the files; both rows stay readable.
    region.compact_stores().await.unwrap();
    assert!(!region.get(&Bytes::from_static(b"a"), "f:x", 1, u64::MAX).is_empty());
    assert!(!region.get(&Bytes::from_static(b"b"), "f:x", 1, u64::MAX).is_empty());
}

#[tokio::test]
async fn test_get_closest_row_before() {
    let dir = tempfile::tempdir().unwrap();
    let (region, _wal) = open_region(dir.path(), RegionConfig::default()).await;

    region.batch_update(1, &put("apple", "f:x", "1")).await.unwrap();
    region.batch_update(1, &put("cherry", "f:x", "2")).await.unwrap();

    let hit = region
        .get_closest_row_before(&Bytes::from_static(b"banana"))
        .expect("apple precedes banana");
    assert_eq!(hit.row, Bytes::from_static(b"apple"));

    let exact = region
        .get_closest_row_before(&Bytes::from_static(b"cherry"))
        .expect("exact match counts");
    assert_eq!(exact.row, Bytes::from_static(b"cherry"));

    assert!(region
        .get_closest_row_before(&Bytes::from_static(b"aardvark"))
        .is_none());
}

#[tokio::test]
async fn test_rejects_rows_outside_the_key_range_and_unknown_families() {
    let dir = tempfile::tempdir().unwrap();
    let schema = TableSchema::new("users", vec!["f".to_string()]);
    let descriptor = RegionDescriptor::new(
        schema,
        Bytes::from_static(b"m"),
        Bytes::from_static(b"z"),
        7,
    );
    let wal = Arc::new(
        Wal::create(
            dir.path().join("log"),
            64 * 1024 * 1024,
            Arc::new(RollSignal::default()),
        )
        .await
        .unwrap(),
    );
    let region = Region::open(descriptor, dir.path(), wal, RegionConfig::default(), &|| {})
        .await
        .unwrap();

    assert!(region.batch_update(1, &put("alice", "f:x", "1")).await.is_err());
    assert!(region.batch_update(1, &put("nancy", "q:x", "1")).await.is_err());
    assert!(region.batch_update(1, &put("nancy", "f:x", "1")).await.is_ok());
}

#[tokio::test]
async fn test_closed_region_refuses_writes() {
    let dir = tempfile::tempdir().unwrap();
    let (region, _wal) = open_region(dir.path(), RegionConfig::default()).await;

    region.batch_update(1, &put("a", "f:x", "1")).await.unwrap();
    region.close(false).await.unwrap();
    assert!(region.is_closed());
    assert!(region.batch_update(2, &put("b", "f:x", "2")).await.is_err());

    // Reads still work for retiring scanners.
    assert!(!region.get(&Bytes::from_static(b"a"), "f:x", 1, u64::MAX).is_empty());
}
