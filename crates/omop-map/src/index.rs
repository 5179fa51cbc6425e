//! Immutable, per-trial view over the mapping rules.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use omop_model::{
    ColumnName, RUN_SCOPE, RuleTransform, StaticRule, StructuralRule, TableName, TargetSchema,
    TargetSlot, TrialId, TrialScope, ValuePattern,
};

use crate::error::MappingError;

/// Rules writing one target slot from one source table, in file order.
#[derive(Debug, Clone)]
pub struct SlotRules<'a> {
    pub target: &'a TargetSlot,
    pub rules: Vec<&'a StructuralRule>,
}

/// Static rules of one source field, split by scope and pattern.
#[derive(Debug, Clone, Default)]
pub struct FieldStaticRules {
    trial_exact: HashMap<String, StaticRule>,
    wildcard_exact: HashMap<String, StaticRule>,
    trial_default: Option<StaticRule>,
    wildcard_default: Option<StaticRule>,
}

impl FieldStaticRules {
    fn insert(&mut self, rule: StaticRule) {
        let trial_scoped = matches!(rule.trial, TrialScope::Trial(_));
        match (&rule.source_value, trial_scoped) {
            (ValuePattern::Exact(value), true) => {
                self.trial_exact.insert(value.clone(), rule);
            }
            (ValuePattern::Exact(value), false) => {
                self.wildcard_exact.insert(value.clone(), rule);
            }
            (ValuePattern::Default, true) => self.trial_default = Some(rule),
            (ValuePattern::Default, false) => self.wildcard_default = Some(rule),
        }
    }

    pub fn trial_exact(&self, value: &str) -> Option<&StaticRule> {
        self.trial_exact.get(value)
    }

    pub fn wildcard_exact(&self, value: &str) -> Option<&StaticRule> {
        self.wildcard_exact.get(value)
    }

    pub fn trial_default(&self) -> Option<&StaticRule> {
        self.trial_default.as_ref()
    }

    pub fn wildcard_default(&self) -> Option<&StaticRule> {
        self.wildcard_default.as_ref()
    }
}

/// Queryable index over one trial's rules. Never mutated after construction,
/// so it can be shared freely between transformer invocations.
#[derive(Debug, Clone)]
pub struct MappingIndex {
    trial: TrialId,
    structural: Vec<StructuralRule>,
    by_source_table: HashMap<String, BTreeMap<TargetSlot, Vec<usize>>>,
    by_field: HashMap<String, Vec<usize>>,
    statics: HashMap<String, FieldStaticRules>,
    static_count: usize,
    structural_digest: String,
    static_digest: String,
}

impl MappingIndex {
    pub(crate) fn new(
        trial: TrialId,
        structural: Vec<StructuralRule>,
        statics: Vec<StaticRule>,
        structural_digest: String,
        static_digest: String,
    ) -> Self {
        let mut by_source_table: HashMap<String, BTreeMap<TargetSlot, Vec<usize>>> = HashMap::new();
        let mut by_field: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, rule) in structural.iter().enumerate() {
            by_source_table
                .entry(rule.source_table.clone())
                .or_default()
                .entry(rule.target.clone())
                .or_default()
                .push(idx);
            for field in rule.input_fields() {
                let entry = by_field.entry(field.to_string()).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
        }

        let static_count = statics.len();
        let mut by_static_field: HashMap<String, FieldStaticRules> = HashMap::new();
        for rule in statics {
            by_static_field
                .entry(rule.source_field.clone())
                .or_default()
                .insert(rule);
        }

        Self {
            trial,
            structural,
            by_source_table,
            by_field,
            statics: by_static_field,
            static_count,
            structural_digest,
            static_digest,
        }
    }

    pub fn trial(&self) -> &TrialId {
        &self.trial
    }

    pub fn structural_rules(&self) -> &[StructuralRule] {
        &self.structural
    }

    pub fn static_rule_count(&self) -> usize {
        self.static_count
    }

    /// Rules fed by `source_table`, in file order.
    pub fn rules_for(&self, source_table: &str) -> Vec<&StructuralRule> {
        let mut indices: Vec<usize> = self
            .by_source_table
            .get(source_table)
            .map(|slots| slots.values().flatten().copied().collect())
            .unwrap_or_default();
        indices.sort_unstable();
        indices.into_iter().map(|idx| &self.structural[idx]).collect()
    }

    /// Rules fed by `source_table`, grouped by target slot in slot order.
    pub fn slots_for(&self, source_table: &str) -> Vec<SlotRules<'_>> {
        let Some(slots) = self.by_source_table.get(source_table) else {
            return Vec::new();
        };
        slots
            .iter()
            .map(|(target, indices)| SlotRules {
                target,
                rules: indices.iter().map(|&idx| &self.structural[idx]).collect(),
            })
            .collect()
    }

    /// Rules reading `source_field` for `trial`. Empty for any other trial.
    pub fn rules_for_field(&self, trial: &TrialId, source_field: &str) -> Vec<&StructuralRule> {
        if trial != &self.trial {
            return Vec::new();
        }
        self.by_field
            .get(source_field)
            .map(|indices| indices.iter().map(|&idx| &self.structural[idx]).collect())
            .unwrap_or_default()
    }

    /// Static rules for `source_field`.
    pub fn static_rules(&self, source_field: &str) -> Option<&FieldStaticRules> {
        self.statics.get(source_field)
    }

    /// Distinct target tables the trial's rules produce.
    pub fn declared_tables(&self) -> BTreeSet<TableName> {
        self.structural
            .iter()
            .map(|rule| rule.target.table.clone())
            .collect()
    }

    /// Source tables read per record; run-scoped rules excluded.
    pub fn source_tables(&self) -> BTreeSet<String> {
        self.by_source_table
            .keys()
            .filter(|table| table.as_str() != RUN_SCOPE)
            .cloned()
            .collect()
    }

    pub fn has_run_rules(&self) -> bool {
        self.by_source_table.contains_key(RUN_SCOPE)
    }

    pub fn structural_digest(&self) -> &str {
        &self.structural_digest
    }

    pub fn static_digest(&self) -> &str {
        &self.static_digest
    }

    /// Every rule target, and every surrogate key namespace, must exist in
    /// the target schema.
    pub fn check_against(&self, schema: &TargetSchema) -> Result<(), MappingError> {
        for rule in &self.structural {
            let Some(table) = schema.table(&rule.target.table) else {
                return Err(MappingError::UnknownTarget {
                    rule_id: rule.id.clone(),
                    target: rule.target.table.to_string(),
                });
            };
            if table.column(&rule.target_column).is_none() {
                return Err(MappingError::UnknownTarget {
                    rule_id: rule.id.clone(),
                    target: format!("{}.{}", rule.target.table, rule.target_column),
                });
            }
            if let RuleTransform::SurrogateKey {
                namespace: Some(namespace),
            } = &rule.transform
            {
                let known = TargetSlot::parse(namespace)
                    .is_ok_and(|slot| schema.table(&slot.table).is_some());
                if !known {
                    return Err(MappingError::UnknownTarget {
                        rule_id: rule.id.clone(),
                        target: namespace.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Required schema columns no rule writes, per slot. Drafts for these
    /// slots will always be rejected as incomplete.
    pub fn uncovered_required_columns(&self, schema: &TargetSchema) -> Vec<(TargetSlot, ColumnName)> {
        let mut written: BTreeMap<&TargetSlot, BTreeSet<&ColumnName>> = BTreeMap::new();
        for rule in &self.structural {
            written
                .entry(&rule.target)
                .or_default()
                .insert(&rule.target_column);
        }
        let mut uncovered = Vec::new();
        for (slot, columns) in written {
            let Some(table) = schema.table(&slot.table) else {
                continue;
            };
            for column in table.required_columns() {
                if !columns.contains(&column.name) {
                    uncovered.push((slot.clone(), column.name.clone()));
                }
            }
        }
        uncovered
    }
}
