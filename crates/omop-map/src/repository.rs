//! Mapping Repository: parses and validates the structural and static
//! mapping files and builds a per-trial [`MappingIndex`].
//!
//! # File formats
//!
//! Structural mapping (`transform_arg` optional):
//! `trial, source_table, source_field, target_table, target_column, transform_kind, transform_arg`
//!
//! Static mapping (`target_source_value` optional):
//! `trial, source_field, source_value, target_concept_id, target_source_value`
//!
//! Every row of both files is validated, regardless of the trial requested.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use omop_model::{
    ColumnName, ConceptOutput, Derivation, KEY_SEPARATOR, RuleTransform, StaticRule,
    StructuralRule, TargetSlot, TransformKind, TrialId, TrialScope, ValuePattern,
    normalize_field_name,
};
use omop_standards::csv_utils::{CsvRow, read_csv_table};
use omop_standards::sha256_hex;
use tracing::{debug, info};

use crate::error::MappingError;
use crate::index::MappingIndex;

const STRUCTURAL_COLUMNS: &[&str] = &[
    "trial",
    "source_table",
    "source_field",
    "target_table",
    "target_column",
    "transform_kind",
];
const STATIC_COLUMNS: &[&str] = &["trial", "source_field", "source_value", "target_concept_id"];

/// Raw bytes of one mapping file plus the name used in rule ids and errors.
#[derive(Debug, Clone)]
pub struct MappingSource {
    name: String,
    bytes: Vec<u8>,
}

impl MappingSource {
    pub fn from_path(path: &Path) -> Result<Self, MappingError> {
        let bytes = std::fs::read(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> String {
        sha256_hex(&self.bytes)
    }
}

/// Every validated rule of both mapping files, across all trials.
#[derive(Debug, Clone)]
pub struct MappingRepository {
    structural: Vec<StructuralRule>,
    statics: Vec<StaticRule>,
    structural_digest: String,
    static_digest: String,
}

impl MappingRepository {
    /// Parses both files and builds the index for `trial`.
    pub fn load(
        structural_path: &Path,
        static_path: &Path,
        trial: &TrialId,
    ) -> Result<MappingIndex, MappingError> {
        let structural = MappingSource::from_path(structural_path)?;
        let statics = MappingSource::from_path(static_path)?;
        Self::parse(&structural, &statics)?.index(trial)
    }

    pub fn parse(structural: &MappingSource, statics: &MappingSource) -> Result<Self, MappingError> {
        let structural_rules = parse_structural(structural)?;
        let static_rules = parse_static(statics)?;
        debug!(
            structural = structural_rules.len(),
            statics = static_rules.len(),
            "parsed mapping files"
        );
        Ok(Self {
            structural: structural_rules,
            statics: static_rules,
            structural_digest: structural.digest(),
            static_digest: statics.digest(),
        })
    }

    /// Trials with at least one structural rule.
    pub fn trials(&self) -> BTreeSet<TrialId> {
        self.structural.iter().map(|rule| rule.trial.clone()).collect()
    }

    pub fn structural_rules(&self) -> &[StructuralRule] {
        &self.structural
    }

    pub fn static_rules(&self) -> &[StaticRule] {
        &self.statics
    }

    /// Builds the immutable index for one trial: its structural rules plus
    /// static rules scoped to it or to the wildcard trial.
    pub fn index(&self, trial: &TrialId) -> Result<MappingIndex, MappingError> {
        let structural: Vec<StructuralRule> = self
            .structural
            .iter()
            .filter(|rule| &rule.trial == trial)
            .cloned()
            .collect();
        if structural.is_empty() {
            return Err(MappingError::UnknownTrial {
                trial: trial.to_string(),
            });
        }
        let statics: Vec<StaticRule> = self
            .statics
            .iter()
            .filter(|rule| rule.trial.includes(trial))
            .cloned()
            .collect();
        info!(
            trial = %trial,
            structural = structural.len(),
            statics = statics.len(),
            "mapping index built"
        );
        Ok(MappingIndex::new(
            trial.clone(),
            structural,
            statics,
            self.structural_digest.clone(),
            self.static_digest.clone(),
        ))
    }
}

fn read_rows(source: &MappingSource, required: &[&str]) -> Result<Vec<CsvRow>, MappingError> {
    let table = read_csv_table(source.bytes.as_slice()).map_err(|e| MappingError::Csv {
        file: source.name.clone(),
        message: e.to_string(),
    })?;
    for column in required {
        if !table.has_column(column) {
            return Err(MappingError::malformed(
                &source.name,
                1,
                column,
                "required column missing from header",
            ));
        }
    }
    Ok(table.rows)
}

fn required<'a>(
    source: &MappingSource,
    row: &'a CsvRow,
    column: &str,
) -> Result<&'a str, MappingError> {
    row.get_optional(column)
        .ok_or_else(|| MappingError::malformed(&source.name, row.line, column, "value is required"))
}

fn parse_structural(source: &MappingSource) -> Result<Vec<StructuralRule>, MappingError> {
    let rows = read_rows(source, STRUCTURAL_COLUMNS)?;
    let mut rules = Vec::with_capacity(rows.len());
    let mut seen: BTreeMap<(TrialId, TargetSlot, ColumnName), usize> = BTreeMap::new();

    for row in &rows {
        let rule = parse_structural_row(source, row)?;
        let key = (
            rule.trial.clone(),
            rule.target.clone(),
            rule.target_column.clone(),
        );
        match seen.entry(key) {
            Entry::Occupied(first) => {
                return Err(MappingError::Conflicting {
                    file: source.name.clone(),
                    target: format!("{} {}.{}", rule.trial, rule.target, rule.target_column),
                    first_line: *first.get(),
                    second_line: row.line,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(row.line);
            }
        }
        rules.push(rule);
    }
    Ok(rules)
}

fn parse_structural_row(source: &MappingSource, row: &CsvRow) -> Result<StructuralRule, MappingError> {
    let malformed = |column: &str, message: String| {
        MappingError::malformed(&source.name, row.line, column, message)
    };

    let trial = TrialId::new(required(source, row, "trial")?)
        .map_err(|e| malformed("trial", e.to_string()))?;
    let source_table = normalize_field_name(required(source, row, "source_table")?);
    let target = TargetSlot::parse(required(source, row, "target_table")?)
        .map_err(|e| malformed("target_table", e.to_string()))?;
    let target_column = ColumnName::new(required(source, row, "target_column")?)
        .map_err(|e| malformed("target_column", e.to_string()))?;
    let raw_kind = required(source, row, "transform_kind")?;
    let kind = TransformKind::parse(raw_kind)
        .ok_or_else(|| malformed("transform_kind", format!("unknown transform kind {raw_kind:?}")))?;
    let arg = row.get_optional("transform_arg");

    let source_fields: Vec<String> = row
        .get_optional("source_field")
        .map(|raw| {
            raw.split(KEY_SEPARATOR)
                .map(normalize_field_name)
                .filter(|field| !field.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let single_field = |kind: TransformKind| match source_fields.len() {
        0 => Err(malformed("source_field", format!("{kind} rules need a source field"))),
        1 => Ok(()),
        _ => Err(malformed(
            "source_field",
            format!("{kind} rules take a single source field"),
        )),
    };

    let transform = match kind {
        TransformKind::Direct => {
            single_field(kind)?;
            RuleTransform::Direct
        }
        TransformKind::Constant => RuleTransform::Constant {
            value: arg
                .ok_or_else(|| malformed("transform_arg", "constant rules need a value".into()))?
                .to_string(),
        },
        TransformKind::Derived => {
            let raw = arg.ok_or_else(|| {
                malformed("transform_arg", "derived rules need a derivation name".into())
            })?;
            let (derivation, inputs) =
                parse_derivation(raw, &source_fields).map_err(|e| malformed("transform_arg", e))?;
            RuleTransform::Derived { derivation, inputs }
        }
        TransformKind::ConceptLookup => {
            single_field(kind)?;
            let output = match arg.map(str::to_ascii_lowercase).as_deref() {
                None | Some("concept_id") => ConceptOutput::ConceptId,
                Some("source_value") => ConceptOutput::SourceValue,
                Some(other) => {
                    return Err(malformed(
                        "transform_arg",
                        format!("concept lookup output must be concept_id or source_value, got {other:?}"),
                    ));
                }
            };
            RuleTransform::ConceptLookup { output }
        }
        TransformKind::SurrogateKey => {
            if source_fields.is_empty() {
                return Err(malformed(
                    "source_field",
                    "surrogate keys need a natural key field".into(),
                ));
            }
            let namespace = arg
                .map(|raw| {
                    TargetSlot::parse(raw)
                        .map(|slot| slot.to_string())
                        .map_err(|e| malformed("transform_arg", e.to_string()))
                })
                .transpose()?;
            RuleTransform::SurrogateKey { namespace }
        }
    };

    Ok(StructuralRule {
        id: format!("{}:{}", source.name, row.line),
        trial,
        source_table,
        source_fields,
        target,
        target_column,
        transform,
    })
}

/// Parses `name` or `name(field, field, ...)`. Without an argument list the
/// rule's own source fields are the inputs.
fn parse_derivation(
    raw: &str,
    source_fields: &[String],
) -> Result<(Derivation, Vec<String>), String> {
    let (name, inputs) = match raw.split_once('(') {
        Some((name, rest)) => {
            let list = rest
                .trim_end()
                .strip_suffix(')')
                .ok_or_else(|| format!("unterminated argument list in {raw:?}"))?;
            let inputs: Vec<String> = list
                .split(',')
                .map(normalize_field_name)
                .filter(|field| !field.is_empty())
                .collect();
            (name, inputs)
        }
        None => (raw, source_fields.to_vec()),
    };
    let derivation =
        Derivation::parse(name).ok_or_else(|| format!("unknown derivation {:?}", name.trim()))?;
    let arity = derivation.arity();
    if !arity.accepts(inputs.len()) {
        return Err(format!(
            "{} takes {arity} inputs, got {}",
            derivation.name(),
            inputs.len()
        ));
    }
    Ok((derivation, inputs))
}

fn parse_static(source: &MappingSource) -> Result<Vec<StaticRule>, MappingError> {
    let rows = read_rows(source, STATIC_COLUMNS)?;
    let mut rules: Vec<StaticRule> = Vec::with_capacity(rows.len());
    let mut seen: BTreeMap<(String, String, String), (usize, usize)> = BTreeMap::new();

    for row in &rows {
        let malformed = |column: &str, message: String| {
            MappingError::malformed(&source.name, row.line, column, message)
        };
        let trial = TrialScope::parse(required(source, row, "trial")?)
            .map_err(|e| malformed("trial", e.to_string()))?;
        let source_field = normalize_field_name(required(source, row, "source_field")?);
        let source_value = ValuePattern::parse(required(source, row, "source_value")?);
        let raw_concept = required(source, row, "target_concept_id")?;
        let target_concept_id = raw_concept.parse::<i64>().map_err(|_| {
            malformed(
                "target_concept_id",
                format!("concept id {raw_concept:?} is not an integer"),
            )
        })?;
        let rule = StaticRule {
            id: format!("{}:{}", source.name, row.line),
            trial,
            source_field,
            source_value,
            target_concept_id,
            target_source_value: row.get_optional("target_source_value").map(str::to_string),
        };

        let key = (
            rule.trial.to_string(),
            rule.source_field.clone(),
            rule.source_value.to_string(),
        );
        match seen.get(&key) {
            Some(&(first_line, index)) => {
                let first = &rules[index];
                if first.target_concept_id == rule.target_concept_id
                    && first.target_source_value == rule.target_source_value
                {
                    debug!(
                        file = %source.name,
                        line = row.line,
                        first_line,
                        "duplicate static rule collapsed"
                    );
                    continue;
                }
                return Err(MappingError::Conflicting {
                    file: source.name.clone(),
                    target: format!("{} {}={}", rule.trial, rule.source_field, rule.source_value),
                    first_line,
                    second_line: row.line,
                });
            }
            None => {
                seen.insert(key, (row.line, rules.len()));
                rules.push(rule);
            }
        }
    }
    Ok(rules)
}
