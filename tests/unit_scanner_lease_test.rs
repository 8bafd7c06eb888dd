use bytes::Bytes;
use regiond::config::RegionConfig;
use regiond::core::leases::Leases;
use regiond::core::region::{
    BatchOp, BatchUpdate, ColumnFilter, Region, RegionDescriptor, RegionScanner, ScanFilter,
    TableSchema,
};
use regiond::core::scanners::ScannerRegistry;
use regiond::core::wal::{RollSignal, Wal};
use regiond::RegionServerError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn region_with_rows(root: &Path, rows: &[&str]) -> Arc<Region> {
    let wal = Arc::new(
        Wal::create(
            root.join("log"),
            64 * 1024 * 1024,
            Arc::new(RollSignal::default()),
        )
        .await
        .unwrap(),
    );
    let descriptor = RegionDescriptor::new(
        TableSchema::new("users", vec!["f".to_string()]),
        Bytes::new(),
        Bytes::new(),
        1,
    );
    let region = Region::open(descriptor, root, wal, RegionConfig::default(), &|| {})
        .await
        .unwrap();
    for (i, row) in rows.iter().enumerate() {
        let update = BatchUpdate {
            row: Bytes::from(row.to_string()),
            ops: vec![BatchOp::Put {
                column: "f:x".to_string(),
                value: Bytes::from(format!("v{i}")),
            }],
        };
        region.batch_update(10, &update).await.unwrap();
    }
    region
}

#[test]
fn test_lease_lifecycle() {
    let leases = Leases::new(Duration::from_millis(50));
    assert!(leases.create("a"));
    // Creating an existing lease is refused.
    assert!(!leases.create("a"));
    assert!(leases.renew("a"));
    assert!(leases.cancel("a"));
    assert!(!leases.renew("a"));

    leases.create("due");
    let later = Instant::now() + Duration::from_millis(100);
    let due = leases.expire_due(later);
    assert_eq!(due, vec!["due".to_string()]);
    assert!(leases.is_empty());
}

#[test]
fn test_renew_pushes_expiry_out() {
    let leases = Leases::new(Duration::from_secs(60));
    leases.create("a");
    assert!(leases.expire_due(Instant::now() + Duration::from_secs(30)).is_empty());
    leases.renew("a");
    assert!(leases.expire_due(Instant::now() + Duration::from_secs(45)).is_empty());
    assert_eq!(
        leases.expire_due(Instant::now() + Duration::from_secs(120)),
        vec!["a".to_string()]
    );
}

#[tokio::test]
async fn test_scan_visits_rows_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let region = region_with_rows(dir.path(), &["a", "b", "c"]).await;
    let mut scanner = RegionScanner::new(
        region,
        ColumnFilter::all(),
        Bytes::new(),
        u64::MAX,
        None,
    );

    let rows: Vec<Bytes> = std::iter::from_fn(|| scanner.next_row().map(|r| r.row)).collect();
    assert_eq!(
        rows,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c")
        ]
    );
}

#[tokio::test]
async fn test_stop_row_filter_ends_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let region = region_with_rows(dir.path(), &["a", "b", "c"]).await;
    let mut scanner = RegionScanner::new(
        region,
        ColumnFilter::all(),
        Bytes::new(),
        u64::MAX,
        Some(ScanFilter::StopRow(Bytes::from_static(b"c"))),
    );

    assert_eq!(scanner.next_row().unwrap().row, Bytes::from_static(b"a"));
    assert_eq!(scanner.next_row().unwrap().row, Bytes::from_static(b"b"));
    assert!(scanner.next_row().is_none());
}

#[tokio::test]
async fn test_open_next_close_leaves_the_registry_clean() {
    let dir = tempfile::tempdir().unwrap();
    let region = region_with_rows(dir.path(), &["a"]).await;
    let registry = ScannerRegistry::new(Duration::from_secs(60));
    assert!(registry.is_empty());
    assert!(registry.leases().is_empty());

    let scanner = RegionScanner::new(region, ColumnFilter::all(), Bytes::new(), u64::MAX, None);
    let id = registry.open(scanner).unwrap();
    assert!(registry.contains(id));
    assert_eq!(registry.leases().len(), 1);

    assert!(registry.next(id).unwrap().is_some());
    assert!(registry.next(id).unwrap().is_none());
    registry.close(id).unwrap();

    // Exactly the state before open.
    assert!(registry.is_empty());
    assert!(registry.leases().is_empty());
    assert!(matches!(
        registry.next(id),
        Err(RegionServerError::UnknownScanner(_))
    ));
}

#[tokio::test]
async fn test_expired_lease_invalidates_the_scanner() {
    let dir = tempfile::tempdir().unwrap();
    let region = region_with_rows(dir.path(), &["a"]).await;
    let registry = ScannerRegistry::new(Duration::from_millis(10));

    let scanner = RegionScanner::new(region, ColumnFilter::all(), Bytes::new(), u64::MAX, None);
    let id = registry.open(scanner).unwrap();

    // Drive the lease past its deadline the way the lease checker does.
    let due = registry
        .leases()
        .expire_due(Instant::now() + Duration::from_secs(1));
    assert_eq!(due.len(), 1);
    for lease in due {
        registry.expire(&lease);
    }

    assert!(!registry.contains(id));
    assert!(matches!(
        registry.next(id),
        Err(RegionServerError::UnknownScanner(_))
    ));
}
