// src/core/region/descriptor.rs

//! Table and region descriptors: the metadata that identifies a region and
//! its place in the catalog hierarchy.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Name of the root catalog table, which locates the meta regions.
pub const ROOT_TABLE_NAME: &str = "root";
/// Name of the meta catalog table, which maps user rows to hosting servers.
pub const META_TABLE_NAME: &str = "meta";
/// The column family carried by the catalog tables.
pub const CATALOG_FAMILY: &str = "info";
/// Catalog column holding a region's serialized descriptor.
pub const COL_REGIONINFO: &str = "info:regioninfo";
/// Catalog column holding the lower-half child descriptor of a split parent.
pub const COL_SPLIT_A: &str = "info:splita";
/// Catalog column holding the upper-half child descriptor of a split parent.
pub const COL_SPLIT_B: &str = "info:splitb";

/// Schema of a table: its name and the column families rows may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub families: Vec<String>,
    /// How many versions of a cell reads return by default and compaction retains.
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,
}

fn default_max_versions() -> u32 {
    3
}

impl TableSchema {
    pub fn new(name: impl Into<String>, families: Vec<String>) -> Self {
        Self {
            name: name.into(),
            families,
            max_versions: default_max_versions(),
        }
    }

    /// The schema of the root catalog table.
    pub fn root() -> Self {
        Self::new(ROOT_TABLE_NAME, vec![CATALOG_FAMILY.to_string()])
    }

    /// The schema of the meta catalog table.
    pub fn meta() -> Self {
        Self::new(META_TABLE_NAME, vec![CATALOG_FAMILY.to_string()])
    }

    pub fn is_root(&self) -> bool {
        self.name == ROOT_TABLE_NAME
    }

    pub fn is_meta(&self) -> bool {
        self.name == META_TABLE_NAME
    }

    /// Whether this table is part of the catalog hierarchy (root or meta).
    pub fn is_catalog(&self) -> bool {
        self.is_root() || self.is_meta()
    }
}

/// Identifies one region: a contiguous key range of a table.
///
/// The region name is derived from the table, start key and creation id and
/// is the key under which the registry and the catalog track the region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub table: TableSchema,
    /// Inclusive lower bound of the key range; empty means unbounded.
    pub start_key: Bytes,
    /// Exclusive upper bound of the key range; empty means unbounded.
    pub end_key: Bytes,
    /// Creation timestamp in milliseconds; disambiguates successive regions
    /// over the same key range.
    pub region_id: u64,
    /// Set in the catalog once the region has stopped serving.
    #[serde(default)]
    pub offline: bool,
    /// Set in the catalog once the region has been split.
    #[serde(default)]
    pub split: bool,
}

impl RegionDescriptor {
    pub fn new(table: TableSchema, start_key: Bytes, end_key: Bytes, region_id: u64) -> Self {
        Self {
            table,
            start_key,
            end_key,
            region_id,
            offline: false,
            split: false,
        }
    }

    /// The unique name of this region: `<table>,<start key hex>,<region id>`.
    pub fn region_name(&self) -> String {
        let mut hex = String::with_capacity(self.start_key.len() * 2);
        for b in self.start_key.iter() {
            hex.push_str(&format!("{b:02x}"));
        }
        format!("{},{},{}", self.table.name, hex, self.region_id)
    }

    /// Whether the given row key falls inside this region's range.
    pub fn contains_row(&self, row: &[u8]) -> bool {
        (self.start_key.is_empty() || row >= &self.start_key[..])
            && (self.end_key.is_empty() || row < &self.end_key[..])
    }

    /// Serialized form stored in catalog cells.
    pub fn to_cell_value(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("descriptor serializes"))
    }

    /// Parses a descriptor out of a catalog cell value.
    pub fn from_cell_value(value: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(value)
    }
}
