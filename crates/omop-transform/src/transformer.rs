//! Row Transformer: applies a trial's structural rules to source records.
//!
//! Each record is processed independently and produces one draft per
//! target slot fed by its source table. A record is accepted or rejected as
//! a whole, so a rejected person never leaves its observation period behind.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use omop_map::{ConceptResolver, MappingError, MappingIndex, ResolvedConcept};
use omop_model::{
    ColumnDef, ConceptOutput, ModelError, Provenance, RuleTransform, SourceRecord, StructuralRule,
    TableDef, TargetRowDraft, TargetSchema, TargetSlot, UnmappedPolicy, UnmappedValue, Value,
};
use serde::Serialize;
use tracing::trace;

use crate::derive;
use crate::error::RecordError;
use crate::surrogate::surrogate_key;

/// One concept lookup performed while transforming a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConceptLookup {
    pub source_field: String,
    pub raw_value: Option<String>,
    pub resolved: ResolvedConcept,
}

/// Everything a successfully transformed record produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordOutput {
    pub drafts: Vec<TargetRowDraft>,
    /// Values written as the unmapped placeholder concept.
    pub warnings: Vec<UnmappedValue>,
    /// Distinct concept lookups, one per source field.
    pub lookups: Vec<ConceptLookup>,
    /// Slots skipped because all of their source data was missing.
    pub skipped_empty: usize,
}

/// Result of transforming one record of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub source_table: String,
    pub line: usize,
    pub result: Result<RecordOutput, RecordError>,
}

struct CompiledRule<'a> {
    rule: &'a StructuralRule,
    column: &'a ColumnDef,
    /// Pre-coerced value of a constant rule.
    constant: Value,
    /// Key namespace of a surrogate-key rule.
    namespace: String,
}

struct CompiledSlot<'a> {
    target: &'a TargetSlot,
    table: &'a TableDef,
    rules: Vec<CompiledRule<'a>>,
    /// Inputs of direct, concept-lookup and derived rules.
    source_fields: Vec<&'a str>,
    /// Namespace of the surrogate key written to the primary key column.
    key_namespace: Option<String>,
    /// Namespaces of surrogate keys written to other columns.
    references: Vec<String>,
}

impl CompiledSlot<'_> {
    fn is_empty_for(&self, record: &SourceRecord) -> bool {
        !self.source_fields.is_empty()
            && self
                .source_fields
                .iter()
                .all(|field| record.field(field).is_none())
    }

    fn references(&self, namespace: &str) -> bool {
        self.references.iter().any(|reference| reference == namespace)
    }
}

/// Marks the slots of a record that have no source data.
///
/// A slot whose key is referenced by a slot that is built is never skipped:
/// it is built too, and fails the record when its own data is incomplete.
fn skipped_slots(slots: &[CompiledSlot<'_>], record: &SourceRecord) -> Vec<bool> {
    let mut skipped: Vec<bool> = slots.iter().map(|slot| slot.is_empty_for(record)).collect();
    loop {
        let mut changed = false;
        for (position, slot) in slots.iter().enumerate() {
            let Some(namespace) = slot.key_namespace.as_deref() else {
                continue;
            };
            let referenced = slots
                .iter()
                .zip(&skipped)
                .any(|(other, &other_skipped)| !other_skipped && other.references(namespace));
            if skipped[position] && referenced {
                trace!(target_slot = %slot.target, line = record.line, "referenced slot is built");
                skipped[position] = false;
                changed = true;
            }
        }
        if !changed {
            return skipped;
        }
    }
}

pub struct RowTransformer<'a> {
    index: &'a MappingIndex,
    resolver: ConceptResolver<'a>,
    unmapped_policy: UnmappedPolicy,
    slots: HashMap<&'a str, Vec<CompiledSlot<'a>>>,
}

impl<'a> RowTransformer<'a> {
    /// Binds every rule to its target column. Fails when a rule targets a
    /// column outside the schema or a constant does not fit its column.
    pub fn new(
        index: &'a MappingIndex,
        schema: &'a TargetSchema,
        resolver: &ConceptResolver<'a>,
        unmapped_policy: UnmappedPolicy,
    ) -> Result<Self, MappingError> {
        index.check_against(schema)?;

        let mut slots: HashMap<&'a str, Vec<CompiledSlot<'a>>> = HashMap::new();
        let mut source_tables: Vec<&'a str> = index
            .structural_rules()
            .iter()
            .map(|rule| rule.source_table.as_str())
            .collect();
        source_tables.sort_unstable();
        source_tables.dedup();

        for source_table in source_tables {
            let mut compiled_slots = Vec::new();
            for slot in index.slots_for(source_table) {
                let table = schema
                    .table(&slot.target.table)
                    .ok_or_else(|| unknown_target(slot.rules.first().copied(), slot.target))?;
                let mut rules = Vec::with_capacity(slot.rules.len());
                let mut source_fields = Vec::new();
                let mut key_namespace = None;
                let mut references = Vec::new();
                for rule in slot.rules {
                    let column = table
                        .column(&rule.target_column)
                        .ok_or_else(|| unknown_target(Some(rule), slot.target))?;
                    if rule.is_source_driven() {
                        source_fields.extend(rule.input_fields());
                    }
                    let compiled = compile_rule(rule, column, slot.target)?;
                    if matches!(rule.transform, RuleTransform::SurrogateKey { .. }) {
                        if column.primary_key {
                            key_namespace = Some(compiled.namespace.clone());
                        } else {
                            references.push(compiled.namespace.clone());
                        }
                    }
                    rules.push(compiled);
                }
                source_fields.sort_unstable();
                source_fields.dedup();
                compiled_slots.push(CompiledSlot {
                    target: slot.target,
                    table,
                    rules,
                    source_fields,
                    key_namespace,
                    references,
                });
            }
            slots.insert(source_table, compiled_slots);
        }

        Ok(Self {
            index,
            resolver: *resolver,
            unmapped_policy,
            slots,
        })
    }

    pub fn index(&self) -> &MappingIndex {
        self.index
    }

    /// Transforms one record into its drafts, or rejects it.
    pub fn transform(&self, record: &SourceRecord) -> Result<RecordOutput, RecordError> {
        let mut output = RecordOutput::default();
        if &record.trial != self.index.trial() {
            trace!(trial = %record.trial, "record belongs to another trial");
            return Ok(output);
        }
        let Some(slots) = self.slots.get(record.source_table.as_str()) else {
            return Ok(output);
        };

        let mut lookups: BTreeMap<&'a str, ResolvedConcept> = BTreeMap::new();
        let skipped = skipped_slots(slots, record);
        for (slot, skip) in slots.iter().zip(skipped) {
            if skip {
                trace!(target_slot = %slot.target, line = record.line, "slot has no source data");
                output.skipped_empty += 1;
                continue;
            }
            let draft = self.build_draft(slot, record, &mut lookups, &mut output.warnings)?;
            output.drafts.push(draft);
        }

        output.lookups = lookups
            .into_iter()
            .map(|(field, resolved)| ConceptLookup {
                source_field: field.to_string(),
                raw_value: record.field(field).map(str::to_string),
                resolved,
            })
            .collect();
        Ok(output)
    }

    /// Lazily transforms a record stream.
    pub fn transform_all<I>(&self, records: I) -> impl Iterator<Item = RecordOutcome>
    where
        I: IntoIterator<Item = SourceRecord>,
    {
        records.into_iter().map(move |record| RecordOutcome {
            result: self.transform(&record),
            source_table: record.source_table,
            line: record.line,
        })
    }

    /// Produces the drafts of run-scoped rules (the `cdm_source` row).
    pub fn transform_run(&self, release_date: NaiveDate) -> Result<RecordOutput, RecordError> {
        let record = SourceRecord::run_record(self.index.trial().clone(), release_date);
        self.transform(&record)
    }

    fn build_draft(
        &self,
        slot: &CompiledSlot<'a>,
        record: &SourceRecord,
        lookups: &mut BTreeMap<&'a str, ResolvedConcept>,
        warnings: &mut Vec<UnmappedValue>,
    ) -> Result<TargetRowDraft, RecordError> {
        let mut values = BTreeMap::new();
        let mut rule_ids = Vec::with_capacity(slot.rules.len());
        for compiled in &slot.rules {
            let value = self.evaluate(slot.target, compiled, record, lookups, warnings)?;
            values.insert(compiled.column.name.clone(), value);
            rule_ids.push(compiled.rule.id.clone());
        }

        for column in slot.table.required_columns() {
            if values.get(&column.name).is_none_or(Value::is_null) {
                return Err(RecordError::Incomplete {
                    target: slot.target.clone(),
                    column: column.name.clone(),
                });
            }
        }

        Ok(TargetRowDraft {
            target: slot.target.clone(),
            values,
            provenance: Provenance {
                trial: record.trial.clone(),
                source_table: record.source_table.clone(),
                line: record.line,
                rule_ids,
            },
        })
    }

    fn evaluate(
        &self,
        target: &TargetSlot,
        compiled: &CompiledRule<'a>,
        record: &SourceRecord,
        lookups: &mut BTreeMap<&'a str, ResolvedConcept>,
        warnings: &mut Vec<UnmappedValue>,
    ) -> Result<Value, RecordError> {
        let rule = compiled.rule;
        let column = compiled.column;
        let coercion = |error: ModelError| coercion_error(target, column, error);
        let first_field = rule.source_fields.first().map(String::as_str);

        match &rule.transform {
            RuleTransform::Direct => column
                .coerce(first_field.and_then(|field| record.field(field)))
                .map_err(coercion),
            RuleTransform::Constant { .. } => Ok(compiled.constant.clone()),
            RuleTransform::ConceptLookup { output } => {
                let Some(field) = first_field else {
                    return Ok(Value::Null);
                };
                let resolved = lookups
                    .entry(field)
                    .or_insert_with(|| self.resolver.resolve(&record.trial, field, record.field(field)))
                    .clone();
                if resolved.is_unmapped() && *output == ConceptOutput::ConceptId {
                    let raw_value = resolved.source_value.clone().unwrap_or_default();
                    match self.unmapped_policy {
                        UnmappedPolicy::Reject => {
                            return Err(RecordError::UnmappedValue {
                                target: target.clone(),
                                column: column.name.clone(),
                                source_field: field.to_string(),
                                raw_value,
                                concept_id: resolved.concept_id,
                            });
                        }
                        UnmappedPolicy::Placeholder => warnings.push(UnmappedValue {
                            table: target.table.clone(),
                            column: column.name.clone(),
                            source_field: field.to_string(),
                            raw_value,
                            concept_id: resolved.concept_id,
                        }),
                    }
                }
                let value = match output {
                    ConceptOutput::ConceptId => Value::Integer(resolved.concept_id),
                    ConceptOutput::SourceValue => resolved.source_value.map_or(Value::Null, Value::Text),
                };
                column.accept(value).map_err(coercion)
            }
            RuleTransform::SurrogateKey { .. } => {
                let parts: Option<Vec<&str>> = rule
                    .source_fields
                    .iter()
                    .map(|field| record.field(field))
                    .collect();
                let Some(parts) = parts else {
                    return Ok(Value::Null);
                };
                let key = surrogate_key(record.trial.as_str(), &compiled.namespace, &parts);
                column.accept(Value::Integer(key)).map_err(coercion)
            }
            RuleTransform::Derived { derivation, inputs } => {
                let raw: Vec<Option<&str>> = inputs.iter().map(|field| record.field(field)).collect();
                let value =
                    derive::evaluate(*derivation, &raw).map_err(|message| RecordError::Derivation {
                        target: target.clone(),
                        column: column.name.clone(),
                        derivation: derivation.name().to_string(),
                        message,
                    })?;
                column.accept(value).map_err(coercion)
            }
        }
    }
}

fn compile_rule<'a>(
    rule: &'a StructuralRule,
    column: &'a ColumnDef,
    target: &TargetSlot,
) -> Result<CompiledRule<'a>, MappingError> {
    let constant = match &rule.transform {
        RuleTransform::Constant { value } => {
            column
                .coerce(Some(value))
                .map_err(|e| MappingError::InvalidConstant {
                    rule_id: rule.id.clone(),
                    target: format!("{target}.{}", column.name),
                    value: value.clone(),
                    message: e.to_string(),
                })?
        }
        _ => Value::Null,
    };
    let namespace = match &rule.transform {
        RuleTransform::SurrogateKey {
            namespace: Some(namespace),
        } => namespace.clone(),
        _ => target.to_string(),
    };
    Ok(CompiledRule {
        rule,
        column,
        constant,
        namespace,
    })
}

fn unknown_target(rule: Option<&StructuralRule>, target: &TargetSlot) -> MappingError {
    MappingError::UnknownTarget {
        rule_id: rule.map(|rule| rule.id.clone()).unwrap_or_default(),
        target: target.to_string(),
    }
}

fn coercion_error(target: &TargetSlot, column: &ColumnDef, error: ModelError) -> RecordError {
    match error {
        ModelError::Coercion {
            raw,
            column_type,
            message,
        } => RecordError::Coercion {
            target: target.clone(),
            column: column.name.clone(),
            raw,
            column_type,
            message,
        },
        other => RecordError::Coercion {
            target: target.clone(),
            column: column.name.clone(),
            raw: String::new(),
            column_type: column.column_type,
            message: other.to_string(),
        },
    }
}
