#![deny(unsafe_code)]

pub mod csv_utils;
pub mod error;
pub mod hash;
pub mod paths;
pub mod schema;

pub use crate::error::StandardsError;
pub use crate::hash::{sha256_file, sha256_hex};
pub use crate::paths::{
    RESOURCES_ENV_VAR, default_schema_path, default_static_mapping_path,
    default_structural_mapping_path, resources_root,
};
pub use crate::schema::{load_default_schema, load_schema, parse_schema_csv};
