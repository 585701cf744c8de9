//! Static statistics catalogs (YAML or JSON).
//!
//! ```yaml
//! datasets:
//!   transactions:
//!     row_count_estimate: 1000000
//!     byte_size_estimate: 200000000
//!     distinct_key_counts: { country: 50 }
//!   users:
//!     row_count_estimate: 1000
//!     byte_size_estimate: 50000
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use planwise_core::stats::DatasetStats;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsCatalog {
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetStats>,
}

impl StatsCatalog {
    pub fn from_yaml_str(src: &str) -> Result<Self, CatalogError> {
        Ok(serde_yaml::from_str(src)?)
    }

    pub fn from_json_str(src: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(src)?)
    }

    /// Load a catalog file; `.json` is parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let src = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&src),
            _ => Self::from_yaml_str(&src),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, CatalogError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
