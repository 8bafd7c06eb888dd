use bytes::Bytes;
use regiond::config::RegionConfig;
use regiond::core::region::{Region, RegionDescriptor, TableSchema};
use regiond::core::registry::RegionRegistry;
use regiond::core::wal::{RollSignal, Wal};
use regiond::RegionServerError;
use std::path::Path;
use std::sync::Arc;

async fn make_region(root: &Path, table: TableSchema, id: u64) -> Arc<Region> {
    let wal = Arc::new(
        Wal::create(
            root.join(format!("log-{id}")),
            64 * 1024 * 1024,
            Arc::new(RollSignal::default()),
        )
        .await
        .unwrap(),
    );
    let descriptor = RegionDescriptor::new(table, Bytes::new(), Bytes::new(), id);
    Region::open(descriptor, root, wal, RegionConfig::default(), &|| {})
        .await
        .unwrap()
}

#[tokio::test]
async fn test_insert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegionRegistry::new();
    let region = make_region(
        dir.path(),
        TableSchema::new("users", vec!["f".to_string()]),
        1,
    )
    .await;

    assert!(registry.insert_online(region.clone()));
    assert!(!registry.insert_online(region.clone()));
    assert_eq!(registry.online_count(), 1);
}

#[tokio::test]
async fn test_get_consults_retiring_only_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegionRegistry::new();
    let region = make_region(
        dir.path(),
        TableSchema::new("users", vec!["f".to_string()]),
        1,
    )
    .await;
    let name = region.name().to_string();
    registry.insert_online(region);

    assert!(registry.get(&name, false).is_ok());

    assert!(registry.retire(&name));
    assert!(matches!(
        registry.get(&name, false),
        Err(RegionServerError::NotServingRegion(_))
    ));
    assert!(registry.get(&name, true).is_ok());

    // A retiring region cannot be re-inserted under the same name.
    registry.drop_retired(&name);
    assert!(matches!(
        registry.get(&name, true),
        Err(RegionServerError::NotServingRegion(_))
    ));
}

#[tokio::test]
async fn test_drain_user_regions_retains_catalog_regions() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegionRegistry::new();

    let meta = make_region(dir.path(), TableSchema::meta(), 1).await;
    let root = make_region(dir.path(), TableSchema::root(), 2).await;
    let user = make_region(
        dir.path(),
        TableSchema::new("users", vec!["f".to_string()]),
        3,
    )
    .await;
    registry.insert_online(meta);
    registry.insert_online(root);
    registry.insert_online(user.clone());

    let drained = registry.drain_user_regions();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].name(), user.name());
    assert_eq!(registry.online_count(), 2);

    let drained_all = registry.drain_online();
    assert_eq!(drained_all.len(), 2);
    assert!(registry.online_is_empty());
}
