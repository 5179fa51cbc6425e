#![deny(unsafe_code)]

use std::fmt;

use crate::ModelError;

/// Marker used in mapping files for "any trial" and "any value".
pub const WILDCARD: &str = "*";

/// Normalizes a source field name for lookup: trimmed, BOM-stripped, lowercase.
pub fn normalize_field_name(raw: &str) -> String {
    raw.trim().trim_matches('\u{feff}').to_lowercase()
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TrialId(String);

impl TrialId {
    pub fn new(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == WILDCARD {
            return Err(ModelError::InvalidTrialId(value));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target table name. OMOP table names are lowercase; input is normalized.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TableName(String);

impl TableName {
    pub fn new(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        let normalized = value.trim().to_ascii_lowercase();
        if !is_identifier(&normalized) {
            return Err(ModelError::InvalidTableName(value));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ColumnName(String);

impl ColumnName {
    pub fn new(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        let normalized = value.trim().to_ascii_lowercase();
        if !is_identifier(&normalized) {
            return Err(ModelError::InvalidColumnName(value));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_lowercased() {
        let name = TableName::new(" Person ").unwrap();
        assert_eq!(name.as_str(), "person");
    }

    #[test]
    fn rejects_non_identifiers() {
        assert!(TableName::new("").is_err());
        assert!(TableName::new("observation period").is_err());
        assert!(ColumnName::new("9lives").is_err());
        assert!(TrialId::new("*").is_err());
    }

    #[test]
    fn field_names_normalize() {
        assert_eq!(normalize_field_name("\u{feff} DOB "), "dob");
    }
}
