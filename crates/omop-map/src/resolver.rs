//! Concept Resolver: turns raw source values into standard concept ids.
//!
//! Lookup order for a non-missing value:
//! 1. exact rule for the trial
//! 2. exact rule for the wildcard trial
//! 3. default rule for the trial, then for the wildcard trial
//! 4. the unmapped placeholder concept
//!
//! Missing values (absent or blank) take the dedicated "no matching
//! concept" path instead of being reported as unmapped.

use std::collections::BTreeMap;

use omop_model::{
    FieldCoverage, RunOptions, StaticRule, TrialId, UnmappedValueCount, normalize_field_name,
};
use serde::{Deserialize, Serialize};

use crate::index::MappingIndex;

/// Concepts used when no static rule applies. OMOP reserves 0 for
/// "No matching concept".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolverPolicy {
    pub unmapped_concept_id: i64,
    pub missing_concept_id: i64,
}

impl From<&RunOptions> for ResolverPolicy {
    fn from(options: &RunOptions) -> Self {
        Self {
            unmapped_concept_id: options.unmapped_concept_id,
            missing_concept_id: options.missing_concept_id,
        }
    }
}

/// Which lookup step produced a concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Exact,
    WildcardTrial,
    Default,
    Missing,
    Unmapped,
}

impl Resolution {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Exact | Self::WildcardTrial | Self::Default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConcept {
    pub concept_id: i64,
    /// Rule passthrough value, else the trimmed raw value. `None` when missing.
    pub source_value: Option<String>,
    pub resolution: Resolution,
    /// Static rule applied, if any.
    pub rule_id: Option<String>,
}

impl ResolvedConcept {
    pub fn is_unmapped(&self) -> bool {
        self.resolution == Resolution::Unmapped
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConceptResolver<'a> {
    index: &'a MappingIndex,
    policy: ResolverPolicy,
}

impl<'a> ConceptResolver<'a> {
    pub fn new(index: &'a MappingIndex, policy: ResolverPolicy) -> Self {
        Self { index, policy }
    }

    pub fn policy(&self) -> ResolverPolicy {
        self.policy
    }

    /// Resolves one value. Total: every input yields exactly one concept.
    pub fn resolve(&self, trial: &TrialId, source_field: &str, raw: Option<&str>) -> ResolvedConcept {
        let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return ResolvedConcept {
                concept_id: self.policy.missing_concept_id,
                source_value: None,
                resolution: Resolution::Missing,
                rule_id: None,
            };
        };

        let field = normalize_field_name(source_field);
        let same_trial = trial == self.index.trial();
        let matched = self.index.static_rules(&field).and_then(|rules| {
            let trial_exact = same_trial
                .then(|| rules.trial_exact(value))
                .flatten()
                .map(|rule| (rule, Resolution::Exact));
            let trial_default = || {
                same_trial
                    .then(|| rules.trial_default())
                    .flatten()
                    .map(|rule| (rule, Resolution::Default))
            };
            trial_exact
                .or_else(|| {
                    rules
                        .wildcard_exact(value)
                        .map(|rule| (rule, Resolution::WildcardTrial))
                })
                .or_else(trial_default)
                .or_else(|| {
                    rules
                        .wildcard_default()
                        .map(|rule| (rule, Resolution::Default))
                })
        });

        match matched {
            Some((rule, resolution)) => applied(rule, value, resolution),
            None => ResolvedConcept {
                concept_id: self.policy.unmapped_concept_id,
                source_value: Some(value.to_string()),
                resolution: Resolution::Unmapped,
                rule_id: None,
            },
        }
    }
}

fn applied(rule: &StaticRule, value: &str, resolution: Resolution) -> ResolvedConcept {
    ResolvedConcept {
        concept_id: rule.target_concept_id,
        source_value: Some(
            rule.target_source_value
                .clone()
                .unwrap_or_else(|| value.to_string()),
        ),
        resolution,
        rule_id: Some(rule.id.clone()),
    }
}

/// Aggregates lookup outcomes per source field for the run report.
#[derive(Debug, Clone, Default)]
pub struct ConceptCoverage {
    fields: BTreeMap<String, FieldCoverage>,
    unmapped: BTreeMap<(String, String), (i64, usize)>,
}

impl ConceptCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source_field: &str, raw: Option<&str>, resolved: &ResolvedConcept) {
        match resolved.resolution {
            Resolution::Unmapped => {
                self.record_unmapped(source_field, raw.unwrap_or_default(), resolved.concept_id);
            }
            Resolution::Missing => self.field_entry(source_field).missing += 1,
            Resolution::Exact | Resolution::WildcardTrial | Resolution::Default => {
                self.field_entry(source_field).matched += 1;
            }
        }
    }

    /// Records a value with no concept mapping, including values whose
    /// record was rejected for it.
    pub fn record_unmapped(&mut self, source_field: &str, raw: &str, concept_id: i64) {
        self.field_entry(source_field).unmapped += 1;
        let slot = self
            .unmapped
            .entry((source_field.to_string(), raw.trim().to_string()))
            .or_insert((concept_id, 0));
        slot.1 += 1;
    }

    fn field_entry(&mut self, source_field: &str) -> &mut FieldCoverage {
        self.fields
            .entry(source_field.to_string())
            .or_insert_with(|| FieldCoverage {
                source_field: source_field.to_string(),
                ..FieldCoverage::default()
            })
    }

    pub fn field(&self, source_field: &str) -> Option<&FieldCoverage> {
        self.fields.get(source_field)
    }

    pub fn fields(&self) -> Vec<FieldCoverage> {
        self.fields.values().cloned().collect()
    }

    /// Distinct unmapped values, most frequent first.
    pub fn unmapped_values(&self) -> Vec<UnmappedValueCount> {
        let mut values: Vec<UnmappedValueCount> = self
            .unmapped
            .iter()
            .map(|((source_field, raw_value), (concept_id, occurrences))| UnmappedValueCount {
                source_field: source_field.clone(),
                raw_value: raw_value.clone(),
                concept_id: *concept_id,
                occurrences: *occurrences,
            })
            .collect();
        values.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        values
    }
}
