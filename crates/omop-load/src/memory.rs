//! In-memory relational sink with snapshot transactions.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use omop_model::{RowValues, TableDef, TableName, TargetSchema};
use tracing::trace;

use crate::sink::{Query, RelationalSink, SinkError};

#[derive(Debug, Clone, Default, PartialEq)]
struct TableData {
    rows: Vec<RowValues>,
    keys: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Transient { remaining: u32 },
    Permanent,
}

#[derive(Debug, Clone)]
struct Transaction {
    tables: BTreeMap<TableName, TableData>,
    touched: BTreeSet<TableName>,
}

/// Tables held in memory, typed by the target schema.
///
/// Primary keys are always enforced. Foreign keys are enforced on insert and
/// truncate only when enabled with [`MemorySink::with_foreign_keys`].
#[derive(Debug)]
pub struct MemorySink {
    schema: TargetSchema,
    committed: BTreeMap<TableName, TableData>,
    transaction: Option<Transaction>,
    enforce_foreign_keys: bool,
    insert_faults: BTreeMap<TableName, Fault>,
    query_faults: Cell<u32>,
}

impl MemorySink {
    pub fn new(schema: TargetSchema) -> Self {
        Self {
            schema,
            committed: BTreeMap::new(),
            transaction: None,
            enforce_foreign_keys: false,
            insert_faults: BTreeMap::new(),
            query_faults: Cell::new(0),
        }
    }

    pub fn with_foreign_keys(mut self) -> Self {
        self.enforce_foreign_keys = true;
        self
    }

    pub fn schema(&self) -> &TargetSchema {
        &self.schema
    }

    /// Committed rows of a table, in insertion order.
    pub fn rows(&self, table: &TableName) -> &[RowValues] {
        self.committed
            .get(table)
            .map(|data| data.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn row_count(&self, table: &TableName) -> usize {
        self.rows(table).len()
    }

    /// Tables holding at least one committed row.
    pub fn populated_tables(&self) -> Vec<TableName> {
        self.committed
            .iter()
            .filter(|(_, data)| !data.rows.is_empty())
            .map(|(table, _)| table.clone())
            .collect()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// The next `times` inserts into `table` fail with a transient error.
    pub fn fail_transiently(&mut self, table: &TableName, times: u32) {
        self.insert_faults
            .insert(table.clone(), Fault::Transient { remaining: times });
    }

    /// Every insert into `table` fails with a non-retryable error.
    pub fn fail_permanently(&mut self, table: &TableName) {
        self.insert_faults.insert(table.clone(), Fault::Permanent);
    }

    /// The next `times` queries fail with a transient error.
    pub fn fail_queries_transiently(&mut self, times: u32) {
        self.query_faults.set(times);
    }

    pub(crate) fn touched_tables(&self) -> Vec<TableName> {
        self.transaction
            .as_ref()
            .map(|transaction| transaction.touched.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Replaces a table's committed rows, checking primary keys.
    pub(crate) fn restore(
        &mut self,
        table: &TableName,
        rows: Vec<RowValues>,
    ) -> Result<(), SinkError> {
        let def = self.table_def(table)?.clone();
        let mut data = TableData::default();
        for row in rows {
            insert_row(&def, &mut data, row)?;
        }
        self.committed.insert(table.clone(), data);
        Ok(())
    }

    fn table_def(&self, table: &TableName) -> Result<&TableDef, SinkError> {
        self.schema
            .table(table)
            .ok_or_else(|| SinkError::UnknownTable(table.clone()))
    }

    fn visible(&self) -> &BTreeMap<TableName, TableData> {
        self.transaction
            .as_ref()
            .map_or(&self.committed, |transaction| &transaction.tables)
    }

    fn check_injected_fault(&mut self, table: &TableName) -> Result<(), SinkError> {
        match self.insert_faults.get_mut(table) {
            Some(Fault::Permanent) => Err(SinkError::constraint(table, "injected failure")),
            Some(Fault::Transient { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                Err(SinkError::Transient(format!(
                    "injected connection reset on {table}"
                )))
            }
            _ => Ok(()),
        }
    }
}

fn check_foreign_keys(
    tables: &BTreeMap<TableName, TableData>,
    def: &TableDef,
    own_keys: &BTreeSet<String>,
    row: &RowValues,
) -> Result<(), SinkError> {
    for (column, fk) in def.foreign_keys() {
        let Some(value) = row.get(&column.name).filter(|value| !value.is_null()) else {
            continue;
        };
        let key = value.render();
        let in_parent = tables
            .get(&fk.table)
            .is_some_and(|parent| parent.keys.contains(&key));
        let in_own_table = fk.table == def.name && own_keys.contains(&key);
        if !in_parent && !in_own_table {
            return Err(SinkError::constraint(
                &def.name,
                format!("{}={key} has no parent row in {fk}", column.name),
            ));
        }
    }
    Ok(())
}

fn insert_row(def: &TableDef, data: &mut TableData, row: RowValues) -> Result<(), SinkError> {
    if let Some(column) = row.keys().find(|column| def.column(column).is_none()) {
        return Err(SinkError::constraint(
            &def.name,
            format!("unknown column {column}"),
        ));
    }
    if let Some(pk) = def.primary_key() {
        let key = row
            .get(&pk.name)
            .filter(|value| !value.is_null())
            .map(omop_model::Value::render)
            .ok_or_else(|| {
                SinkError::constraint(&def.name, format!("primary key {} is null", pk.name))
            })?;
        if !data.keys.insert(key.clone()) {
            return Err(SinkError::constraint(
                &def.name,
                format!("duplicate primary key {}={key}", pk.name),
            ));
        }
    }
    data.rows.push(row);
    Ok(())
}

impl RelationalSink for MemorySink {
    fn begin(&mut self) -> Result<(), SinkError> {
        if self.transaction.is_some() {
            return Err(SinkError::TransactionOpen);
        }
        self.transaction = Some(Transaction {
            tables: self.committed.clone(),
            touched: BTreeSet::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        let transaction = self.transaction.take().ok_or(SinkError::NoTransaction)?;
        self.committed = transaction.tables;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SinkError> {
        self.transaction
            .take()
            .map(|_| ())
            .ok_or(SinkError::NoTransaction)
    }

    fn truncate(&mut self, table: &TableName) -> Result<(), SinkError> {
        self.table_def(table)?;
        if self.enforce_foreign_keys {
            let tables = self.visible();
            for child in self.schema.tables() {
                if &child.name == table {
                    continue;
                }
                let references = child.foreign_keys().any(|(_, fk)| &fk.table == table);
                let populated = tables.get(&child.name).is_some_and(|data| !data.rows.is_empty());
                if references && populated {
                    return Err(SinkError::constraint(
                        table,
                        format!("rows in {} still reference it", child.name),
                    ));
                }
            }
        }
        let transaction = self.transaction.as_mut().ok_or(SinkError::NoTransaction)?;
        transaction.tables.remove(table);
        transaction.touched.insert(table.clone());
        trace!(table = %table, "truncated");
        Ok(())
    }

    fn insert_batch(&mut self, table: &TableName, rows: &[RowValues]) -> Result<(), SinkError> {
        if self.transaction.is_none() {
            return Err(SinkError::NoTransaction);
        }
        let def = self.table_def(table)?.clone();
        self.check_injected_fault(table)?;

        let Some(transaction) = self.transaction.as_ref() else {
            return Err(SinkError::NoTransaction);
        };
        let mut data = transaction.tables.get(table).cloned().unwrap_or_default();
        for row in rows {
            if self.enforce_foreign_keys {
                check_foreign_keys(&transaction.tables, &def, &data.keys, row)?;
            }
            insert_row(&def, &mut data, row.clone())?;
        }

        let transaction = self.transaction.as_mut().ok_or(SinkError::NoTransaction)?;
        transaction.tables.insert(table.clone(), data);
        transaction.touched.insert(table.clone());
        trace!(table = %table, rows = rows.len(), "inserted batch");
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<RowValues>, SinkError> {
        self.table_def(&query.table)?;
        let pending_faults = self.query_faults.get();
        if pending_faults > 0 {
            self.query_faults.set(pending_faults - 1);
            return Err(SinkError::Transient(format!(
                "injected timeout querying {}",
                query.table
            )));
        }
        Ok(self
            .visible()
            .get(&query.table)
            .map(|data| {
                data.rows
                    .iter()
                    .filter(|row| query.predicate.matches(row))
                    .map(|row| query.project(row))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omop_model::{ColumnDef, ColumnName, ColumnType, ForeignKey, Value};

    fn name(value: &str) -> TableName {
        TableName::new(value).unwrap()
    }

    fn column(value: &str) -> ColumnName {
        ColumnName::new(value).unwrap()
    }

    fn schema() -> TargetSchema {
        let mut person_id = ColumnDef::new(column("person_id"), ColumnType::Integer);
        person_id.primary_key = true;
        person_id.required = true;
        let mut period_id = ColumnDef::new(column("observation_period_id"), ColumnType::Integer);
        period_id.primary_key = true;
        period_id.required = true;
        let mut period_person = ColumnDef::new(column("person_id"), ColumnType::Integer);
        period_person.references = Some(ForeignKey {
            table: name("person"),
            column: column("person_id"),
        });
        TargetSchema::new([
            TableDef::new(name("person")).with_column(person_id),
            TableDef::new(name("observation_period"))
                .with_column(period_id)
                .with_column(period_person),
        ])
    }

    fn row(values: &[(&str, i64)]) -> RowValues {
        values
            .iter()
            .map(|(key, value)| (column(key), Value::Integer(*value)))
            .collect()
    }

    #[test]
    fn rollback_discards_writes() {
        let mut sink = MemorySink::new(schema());
        sink.begin().unwrap();
        sink.insert_batch(&name("person"), &[row(&[("person_id", 1)])])
            .unwrap();
        sink.rollback().unwrap();
        assert_eq!(sink.row_count(&name("person")), 0);
        assert!(!sink.in_transaction());
    }

    #[test]
    fn writes_outside_transaction_are_refused() {
        let mut sink = MemorySink::new(schema());
        let result = sink.insert_batch(&name("person"), &[row(&[("person_id", 1)])]);
        assert!(matches!(result, Err(SinkError::NoTransaction)));
    }

    #[test]
    fn duplicate_primary_key_is_a_constraint_error() {
        let mut sink = MemorySink::new(schema());
        sink.begin().unwrap();
        let result = sink.insert_batch(
            &name("person"),
            &[row(&[("person_id", 1)]), row(&[("person_id", 1)])],
        );
        assert!(matches!(result, Err(SinkError::Constraint { .. })));
    }

    #[test]
    fn foreign_keys_are_enforced_when_enabled() {
        let mut sink = MemorySink::new(schema()).with_foreign_keys();
        sink.begin().unwrap();
        let orphan = sink.insert_batch(
            &name("observation_period"),
            &[row(&[("observation_period_id", 10), ("person_id", 1)])],
        );
        assert!(matches!(orphan, Err(SinkError::Constraint { .. })));

        sink.insert_batch(&name("person"), &[row(&[("person_id", 1)])])
            .unwrap();
        sink.insert_batch(
            &name("observation_period"),
            &[row(&[("observation_period_id", 10), ("person_id", 1)])],
        )
        .unwrap();
        assert!(sink.truncate(&name("person")).is_err());
        sink.truncate(&name("observation_period")).unwrap();
        sink.truncate(&name("person")).unwrap();
        sink.commit().unwrap();
        assert!(sink.populated_tables().is_empty());
    }

    #[test]
    fn transient_faults_run_out() {
        let mut sink = MemorySink::new(schema());
        sink.fail_transiently(&name("person"), 1);
        sink.begin().unwrap();
        let first = sink.insert_batch(&name("person"), &[row(&[("person_id", 1)])]);
        assert!(first.unwrap_err().is_transient());
        sink.insert_batch(&name("person"), &[row(&[("person_id", 1)])])
            .unwrap();
        sink.commit().unwrap();
        assert_eq!(sink.row_count(&name("person")), 1);
    }
}
