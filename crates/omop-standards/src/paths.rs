//! Packaged resource path resolution.

use std::path::PathBuf;

/// Environment variable for overriding the resources directory.
pub const RESOURCES_ENV_VAR: &str = "OMOP_RESOURCES_DIR";

/// Get the resources root directory.
///
/// Resolution order:
/// 1. `OMOP_RESOURCES_DIR` environment variable
/// 2. `resources/` directory relative to workspace root
///
/// # Example
///
/// ```rust,ignore
/// let root = omop_standards::resources_root();
/// let schema = root.join("schema/omop_cdm_v5_4.csv");
/// ```
pub fn resources_root() -> PathBuf {
    if let Ok(root) = std::env::var(RESOURCES_ENV_VAR) {
        return PathBuf::from(root);
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../resources")
}

/// OMOP CDM v5.4 target schema.
pub fn default_schema_path() -> PathBuf {
    resources_root().join("schema/omop_cdm_v5_4.csv")
}

pub fn default_structural_mapping_path() -> PathBuf {
    resources_root().join("mappings/structural.csv")
}

pub fn default_static_mapping_path() -> PathBuf {
    resources_root().join("mappings/static.csv")
}
