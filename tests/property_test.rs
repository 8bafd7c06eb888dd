use bytes::Bytes;
use proptest::prelude::*;
use regiond::core::region::{CellKey, CellValue, ColumnFilter, Memtable, assemble_row};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Op {
    row: String,
    column: &'static str,
    timestamp: u64,
    delete: bool,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    (
        prop::sample::select(vec!["a", "ab", "b", "bc", "c"]),
        prop::sample::select(vec!["f:x", "f:y", "g:z"]),
        1u64..50,
        prop::bool::ANY,
    )
        .prop_map(|(row, column, timestamp, delete)| Op {
            row: row.to_string(),
            column,
            timestamp,
            delete,
        })
}

proptest! {
    /// The memtable always iterates (row asc, column asc, timestamp desc),
    /// no matter the insertion order.
    #[test]
    fn memtable_iteration_is_always_sorted(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut memtable = Memtable::new();
        for op in &ops {
            let value = if op.delete {
                CellValue::Delete
            } else {
                CellValue::Put(Bytes::from(format!("v{}", op.timestamp)))
            };
            memtable.insert(
                CellKey::new(Bytes::from(op.row.clone()), op.column, op.timestamp),
                value,
            );
        }

        let keys: Vec<&CellKey> = memtable.cells().keys().collect();
        for pair in keys.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let left_tuple = (&left.row, &left.column, std::cmp::Reverse(left.timestamp));
            let right_tuple = (&right.row, &right.column, std::cmp::Reverse(right.timestamp));
            prop_assert!(left_tuple < right_tuple);
        }
    }

    /// Row assembly respects tombstones: a returned version is newer than
    /// every tombstone of its column (within the timestamp ceiling), and
    /// versions come newest first.
    #[test]
    fn assembled_rows_never_resurrect_deleted_cells(
        ops in prop::collection::vec(op_strategy(), 1..60),
        ceiling in 1u64..60,
    ) {
        let row = Bytes::from_static(b"a");
        let mut merged: BTreeMap<CellKey, CellValue> = BTreeMap::new();
        for op in ops.iter().filter(|op| op.row == "a") {
            let value = if op.delete {
                CellValue::Delete
            } else {
                CellValue::Put(Bytes::from(format!("v{}", op.timestamp)))
            };
            merged.insert(
                CellKey::new(row.clone(), op.column, op.timestamp),
                value,
            );
        }

        let assembled = assemble_row(&merged, ceiling, u32::MAX, &ColumnFilter::all());
        for (column, entries) in &assembled {
            let newest_tombstone = merged
                .iter()
                .filter(|(k, v)| {
                    &k.column == column && k.timestamp <= ceiling && v.is_delete()
                })
                .map(|(k, _)| k.timestamp)
                .max();
            for pair in entries.windows(2) {
                prop_assert!(pair[0].timestamp > pair[1].timestamp);
            }
            for entry in entries {
                prop_assert!(entry.timestamp <= ceiling);
                if let Some(tombstone) = newest_tombstone {
                    prop_assert!(entry.timestamp > tombstone);
                }
            }
        }
    }
}
