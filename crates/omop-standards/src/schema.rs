#![deny(unsafe_code)]

//! Target schema loading from the packaged schema CSV.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use omop_model::{ColumnDef, ColumnName, ColumnType, ForeignKey, TableDef, TableName, TargetSchema};
use tracing::debug;

use crate::csv_utils::{CsvRow, read_csv_table};
use crate::error::StandardsError;
use crate::paths::default_schema_path;

const REQUIRED_COLUMNS: &[&str] = &["table", "column", "type"];

pub fn load_default_schema() -> Result<TargetSchema, StandardsError> {
    load_schema(&default_schema_path())
}

pub fn load_schema(path: &Path) -> Result<TargetSchema, StandardsError> {
    let bytes = std::fs::read(path).map_err(|e| StandardsError::io(path, e))?;
    parse_schema_csv(bytes.as_slice(), path)
}

/// Parses a schema document. `path` is only used in error messages.
pub fn parse_schema_csv<R: Read>(reader: R, path: &Path) -> Result<TargetSchema, StandardsError> {
    let table = read_csv_table(reader).map_err(|e| StandardsError::csv(path, &e))?;
    for column in REQUIRED_COLUMNS {
        if !table.has_column(column) {
            return Err(StandardsError::MissingColumn {
                path: path.to_path_buf(),
                column: (*column).to_string(),
            });
        }
    }

    let mut tables: BTreeMap<TableName, TableDef> = BTreeMap::new();
    for row in &table.rows {
        let invalid = |message: String| StandardsError::InvalidRow {
            path: path.to_path_buf(),
            line: row.line,
            message,
        };
        let table_name = TableName::new(row.get("table")).map_err(|e| invalid(e.to_string()))?;
        let column = parse_column(row).map_err(invalid)?;
        let def = tables
            .entry(table_name.clone())
            .or_insert_with(|| TableDef::new(table_name.clone()));
        if def.column(&column.name).is_some() {
            return Err(invalid(format!(
                "column {}.{} declared twice",
                table_name, column.name
            )));
        }
        if column.primary_key && def.primary_key().is_some() {
            return Err(invalid(format!(
                "table {table_name} declares more than one primary key"
            )));
        }
        def.columns.push(column);
    }

    let schema = TargetSchema::new(tables.into_values());
    check_references(&schema, path)?;
    debug!(
        path = %path.display(),
        tables = schema.table_names().count(),
        "loaded target schema"
    );
    Ok(schema)
}

fn parse_column(row: &CsvRow) -> Result<ColumnDef, String> {
    let name = ColumnName::new(row.get("column")).map_err(|e| e.to_string())?;
    let column_type = ColumnType::parse(row.get("type"))
        .ok_or_else(|| format!("unknown column type {:?}", row.get("type")))?;
    let primary_key = parse_flag(row, "primary_key")?;
    let required = parse_flag(row, "required")? || primary_key;

    let references = row
        .get_optional("references")
        .map(|raw| {
            let (table, column) = raw
                .split_once('.')
                .ok_or_else(|| format!("reference {raw:?} is not table.column"))?;
            Ok::<_, String>(ForeignKey {
                table: TableName::new(table).map_err(|e| e.to_string())?,
                column: ColumnName::new(column).map_err(|e| e.to_string())?,
            })
        })
        .transpose()?;

    let max_length = row
        .get_optional("max_length")
        .map(|raw| {
            raw.parse::<usize>()
                .map_err(|_| format!("max_length {raw:?} is not a positive integer"))
        })
        .transpose()?;

    let not_before = row
        .get_optional("not_before")
        .map(ColumnName::new)
        .transpose()
        .map_err(|e| e.to_string())?;

    Ok(ColumnDef {
        name,
        column_type,
        required,
        primary_key,
        references,
        max_length,
        not_before,
    })
}

fn parse_flag(row: &CsvRow, column: &str) -> Result<bool, String> {
    match row.get(column).to_ascii_uppercase().as_str() {
        "" | "N" | "NO" | "FALSE" => Ok(false),
        "Y" | "YES" | "TRUE" => Ok(true),
        other => Err(format!("{column} must be Y or N, got {other:?}")),
    }
}

fn check_references(schema: &TargetSchema, path: &Path) -> Result<(), StandardsError> {
    let invalid = |message: String| StandardsError::InvalidSchema {
        path: path.to_path_buf(),
        message,
    };
    for table in schema.tables() {
        for column in &table.columns {
            if let Some(fk) = &column.references {
                let Some(target) = schema.column(&fk.table, &fk.column) else {
                    return Err(invalid(format!(
                        "{}.{} references unknown column {fk}",
                        table.name, column.name
                    )));
                };
                if !target.primary_key {
                    return Err(invalid(format!(
                        "{}.{} references {fk}, which is not a primary key",
                        table.name, column.name
                    )));
                }
            }
            if let Some(other) = &column.not_before {
                let is_temporal = |def: &ColumnDef| {
                    matches!(def.column_type, ColumnType::Date | ColumnType::DateTime)
                };
                match table.column(other) {
                    Some(def) if is_temporal(def) && is_temporal(column) => {}
                    _ => {
                        return Err(invalid(format!(
                            "{}.{} not_before {other} must name a date column of the same table",
                            table.name, column.name
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}
