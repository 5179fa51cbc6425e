//! Target (OMOP CDM) schema: tables, typed columns, keys and relationships.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{ColumnName, TableName};
use crate::value::Value;

/// Declared type of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Date,
    DateTime,
    /// Integer standard concept identifier.
    Concept,
}

impl ColumnType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "bigint" => Some(Self::Integer),
            "float" | "numeric" => Some(Self::Float),
            "text" | "varchar" => Some(Self::Text),
            "date" => Some(Self::Date),
            "datetime" | "timestamp" => Some(Self::DateTime),
            "concept" => Some(Self::Concept),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Concept => "concept",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: TableName,
    pub column: ColumnName,
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: ColumnName,
    pub column_type: ColumnType,
    /// NOT NULL in the target schema.
    pub required: bool,
    pub primary_key: bool,
    pub references: Option<ForeignKey>,
    pub max_length: Option<usize>,
    /// Date column of the same table this column must not precede.
    pub not_before: Option<ColumnName>,
}

impl ColumnDef {
    pub fn new(name: ColumnName, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            required: false,
            primary_key: false,
            references: None,
            max_length: None,
            not_before: None,
        }
    }

    /// Coerces a raw source value for this column. Blank input yields `Null`.
    pub fn coerce(&self, raw: Option<&str>) -> Result<Value> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Value::Null);
        };
        let value = Value::parse_as(raw, self.column_type)?;
        self.check_length(value)
    }

    /// Re-types a computed value for this column, applying the length limit.
    pub fn accept(&self, value: Value) -> Result<Value> {
        let value = value.convert_to(self.column_type)?;
        self.check_length(value)
    }

    fn check_length(&self, value: Value) -> Result<Value> {
        if let (Some(limit), Value::Text(text)) = (self.max_length, &value)
            && text.chars().count() > limit
        {
            return Err(ModelError::Coercion {
                raw: text.clone(),
                column_type: self.column_type,
                message: format!("longer than {limit} characters"),
            });
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &ColumnName) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| &column.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.primary_key)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|column| column.required)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDef, &ForeignKey)> {
        self.columns
            .iter()
            .filter_map(|column| column.references.as_ref().map(|fk| (column, fk)))
    }
}

/// The fixed target schema the engine loads into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    tables: BTreeMap<TableName, TableDef>,
}

impl TargetSchema {
    pub fn new(tables: impl IntoIterator<Item = TableDef>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|table| (table.name.clone(), table))
                .collect(),
        }
    }

    pub fn table(&self, name: &TableName) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    pub fn column(&self, table: &TableName, column: &ColumnName) -> Option<&ColumnDef> {
        self.table(table).and_then(|def| def.column(column))
    }

    /// `(referencing table, referenced table)` pairs for every declared foreign key.
    pub fn dependency_edges(&self) -> Vec<(TableName, TableName)> {
        let mut edges = Vec::new();
        for table in self.tables.values() {
            for (_, fk) in table.foreign_keys() {
                edges.push((table.name.clone(), fk.table.clone()));
            }
        }
        edges.sort();
        edges.dedup();
        edges
    }
}
