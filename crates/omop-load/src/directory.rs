//! Relational sink persisted as one CSV file per table.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use omop_model::{ColumnDef, RowValues, TableDef, TableName, TargetSchema};
use tracing::{debug, info};

use crate::memory::MemorySink;
use crate::sink::{Query, RelationalSink, SinkError};

/// A [`MemorySink`] whose committed state lives in `<dir>/<table>.csv`.
///
/// Existing table files are read on open. On commit every table the
/// transaction touched is written to a temp file which is then renamed over
/// the table file.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    inner: MemorySink,
}

impl DirectorySink {
    pub fn open(dir: impl Into<PathBuf>, schema: TargetSchema) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SinkError::io(&dir, e))?;
        let mut inner = MemorySink::new(schema);
        let tables: Vec<TableDef> = inner.schema().tables().cloned().collect();
        for table in &tables {
            let path = table_path(&dir, &table.name);
            if !path.is_file() {
                continue;
            }
            let rows = read_table(&path, table)?;
            debug!(table = %table.name, rows = rows.len(), "loaded existing table file");
            inner.restore(&table.name, rows)?;
        }
        Ok(Self { dir, inner })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, table: &TableName) -> PathBuf {
        table_path(&self.dir, table)
    }

    pub fn rows(&self, table: &TableName) -> &[RowValues] {
        self.inner.rows(table)
    }

    fn persist(&self, tables: &[TableName]) -> Result<(), SinkError> {
        let mut staged = Vec::with_capacity(tables.len());
        for table in tables {
            let def = self
                .inner
                .schema()
                .table(table)
                .ok_or_else(|| SinkError::UnknownTable(table.clone()))?;
            let rows = self.inner.query(&Query::table(table.clone()))?;
            let path = self.table_path(table);
            let temp_path = path.with_extension("csv.tmp");
            if let Err(error) = write_table(&temp_path, def, &rows) {
                discard(&staged);
                let _ = fs::remove_file(&temp_path);
                return Err(error);
            }
            staged.push((temp_path, path));
        }
        for (temp_path, path) in &staged {
            fs::rename(temp_path, path).map_err(|e| SinkError::io(path, e))?;
        }
        Ok(())
    }
}

fn table_path(dir: &Path, table: &TableName) -> PathBuf {
    dir.join(format!("{table}.csv"))
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (temp_path, _) in staged {
        let _ = fs::remove_file(temp_path);
    }
}

fn read_table(path: &Path, def: &TableDef) -> Result<Vec<RowValues>, SinkError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| SinkError::io(path, e))?;
    let headers = reader.headers().map_err(|e| SinkError::io(path, e))?.clone();
    let columns: Vec<Option<&ColumnDef>> = headers
        .iter()
        .map(|header| {
            def.columns
                .iter()
                .find(|column| column.name.as_str() == header.trim())
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SinkError::io(path, e))?;
        let mut row = RowValues::new();
        for (cell, column) in record.iter().zip(&columns) {
            let Some(column) = column else {
                continue;
            };
            let value = column
                .coerce(Some(cell))
                .map_err(|e| SinkError::io(path, e))?;
            if !value.is_null() {
                row.insert(column.name.clone(), value);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

fn write_table(path: &Path, def: &TableDef, rows: &[RowValues]) -> Result<(), SinkError> {
    let file = File::create(path).map_err(|e| SinkError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(def.columns.iter().map(|column| column.name.as_str()))
        .map_err(|e| SinkError::io(path, e))?;
    for row in rows {
        writer
            .write_record(def.columns.iter().map(|column| {
                row.get(&column.name)
                    .map(omop_model::Value::render)
                    .unwrap_or_default()
            }))
            .map_err(|e| SinkError::io(path, e))?;
    }
    let file = writer.into_inner().map_err(|e| SinkError::io(path, e))?;
    file.sync_all().map_err(|e| SinkError::io(path, e))
}

impl RelationalSink for DirectorySink {
    fn begin(&mut self) -> Result<(), SinkError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        let touched = self.inner.touched_tables();
        if let Err(error) = self.persist(&touched) {
            self.inner.rollback()?;
            return Err(error);
        }
        self.inner.commit()?;
        if !touched.is_empty() {
            info!(dir = %self.dir.display(), tables = touched.len(), "committed table files");
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SinkError> {
        self.inner.rollback()
    }

    fn truncate(&mut self, table: &TableName) -> Result<(), SinkError> {
        self.inner.truncate(table)
    }

    fn insert_batch(&mut self, table: &TableName, rows: &[RowValues]) -> Result<(), SinkError> {
        self.inner.insert_batch(table, rows)
    }

    fn query(&self, query: &Query) -> Result<Vec<RowValues>, SinkError> {
        self.inner.query(query)
    }
}
