// src/core/catalog.rs

//! Catalog-table updates performed on behalf of a split.
//!
//! Split edits are ordinary row mutations against the hosting catalog
//! region: the parent's row is rewritten offline+split with its children in
//! dedicated columns, then each child gets a fresh row. The root table
//! records meta regions; the meta table records everything else.

use crate::core::RegionServerError;
use crate::core::now_ms;
use crate::core::region::descriptor::{
    COL_REGIONINFO, COL_SPLIT_A, COL_SPLIT_B, META_TABLE_NAME, ROOT_TABLE_NAME,
};
use crate::core::region::{BatchOp, BatchUpdate, Region, RegionDescriptor};
use crate::core::state::ServerState;
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

/// Records a completed split in the catalog. The parent's offline+split row
/// update is durable before either child row is inserted; the caller only
/// reports the split to the master after this returns.
pub async fn apply_split(
    state: &ServerState,
    parent: &RegionDescriptor,
    child_a: &RegionDescriptor,
    child_b: &RegionDescriptor,
) -> Result<(), RegionServerError> {
    let table = if parent.table.is_meta() {
        ROOT_TABLE_NAME
    } else {
        META_TABLE_NAME
    };
    let timestamp = now_ms();

    let parent_row = region_row(parent);
    let parent_update = BatchUpdate {
        row: parent_row.clone(),
        ops: vec![
            BatchOp::Put {
                column: COL_REGIONINFO.to_string(),
                value: parent.to_cell_value(),
            },
            BatchOp::Put {
                column: COL_SPLIT_A.to_string(),
                value: child_a.to_cell_value(),
            },
            BatchOp::Put {
                column: COL_SPLIT_B.to_string(),
                value: child_b.to_cell_value(),
            },
        ],
    };
    find_catalog_region(state, table, &parent_row)?
        .batch_update(timestamp, &parent_update)
        .await?;

    for child in [child_a, child_b] {
        let row = region_row(child);
        let update = BatchUpdate {
            row: row.clone(),
            ops: vec![BatchOp::Put {
                column: COL_REGIONINFO.to_string(),
                value: child.to_cell_value(),
            }],
        };
        find_catalog_region(state, table, &row)?
            .batch_update(timestamp, &update)
            .await?;
    }

    info!(
        "Recorded split of {} into {} and {} in the {} table",
        parent.region_name(),
        child_a.region_name(),
        child_b.region_name(),
        table
    );
    Ok(())
}

/// A region's catalog row key is its name.
fn region_row(descriptor: &RegionDescriptor) -> Bytes {
    Bytes::from(descriptor.region_name().into_bytes())
}

/// Resolves the online catalog region of `table` hosting `row`. This server
/// hosting the catalog region it writes is the expected deployment; a miss
/// is an IO-class failure the compactor's error path handles.
fn find_catalog_region(
    state: &ServerState,
    table: &str,
    row: &Bytes,
) -> Result<Arc<Region>, RegionServerError> {
    state
        .registry
        .online_snapshot()
        .into_iter()
        .find(|region| {
            let descriptor = region.descriptor();
            descriptor.table.name == table && descriptor.contains_row(row)
        })
        .ok_or_else(|| {
            RegionServerError::IoString(format!(
                "no online {table} catalog region hosts row for this split"
            ))
        })
}
