//! Declarative mapping rules.
//!
//! Two rule sets drive the engine:
//! - [`StructuralRule`]: source field -> target table/column, with a transform
//! - [`StaticRule`]: source value -> standard concept identifier
//!
//! Both are loaded once per run and never mutated afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{ColumnName, TableName, TrialId, WILDCARD};

/// Source table marker for rules evaluated once per run instead of once per record.
pub const RUN_SCOPE: &str = "@run";

/// Separator for composite natural keys in `source_field` (`patient_id+event_id`).
pub const KEY_SEPARATOR: char = '+';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Direct,
    Constant,
    Derived,
    ConceptLookup,
    SurrogateKey,
}

impl TransformKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" => Some(Self::Direct),
            "constant" => Some(Self::Constant),
            "derived" => Some(Self::Derived),
            "concept_lookup" => Some(Self::ConceptLookup),
            "surrogate_key" => Some(Self::SurrogateKey),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Constant => "constant",
            Self::Derived => "derived",
            Self::ConceptLookup => "concept_lookup",
            Self::SurrogateKey => "surrogate_key",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named pure functions available to `derived` rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    YearOf,
    MonthOf,
    DayOf,
    DateOf,
    DateTimeOf,
    DaysBetween,
    AddDays,
    Coalesce,
}

/// Number of inputs a derivation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

impl Derivation {
    pub const ALL: [Derivation; 8] = [
        Derivation::YearOf,
        Derivation::MonthOf,
        Derivation::DayOf,
        Derivation::DateOf,
        Derivation::DateTimeOf,
        Derivation::DaysBetween,
        Derivation::AddDays,
        Derivation::Coalesce,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::YearOf => "year_of",
            Self::MonthOf => "month_of",
            Self::DayOf => "day_of",
            Self::DateOf => "date_of",
            Self::DateTimeOf => "datetime_of",
            Self::DaysBetween => "days_between",
            Self::AddDays => "add_days",
            Self::Coalesce => "coalesce",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Self::YearOf | Self::MonthOf | Self::DayOf | Self::DateOf | Self::DateTimeOf => {
                Arity::Exactly(1)
            }
            Self::DaysBetween | Self::AddDays => Arity::Exactly(2),
            Self::Coalesce => Arity::AtLeast(1),
        }
    }
}

/// What a concept-lookup rule writes into its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptOutput {
    ConceptId,
    SourceValue,
}

/// A structural rule's transform, with its argument already parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleTransform {
    Direct,
    Constant {
        value: String,
    },
    Derived {
        derivation: Derivation,
        inputs: Vec<String>,
    },
    ConceptLookup {
        output: ConceptOutput,
    },
    SurrogateKey {
        /// Key namespace; defaults to the rule's own target slot.
        namespace: Option<String>,
    },
}

impl RuleTransform {
    pub fn kind(&self) -> TransformKind {
        match self {
            Self::Direct => TransformKind::Direct,
            Self::Constant { .. } => TransformKind::Constant,
            Self::Derived { .. } => TransformKind::Derived,
            Self::ConceptLookup { .. } => TransformKind::ConceptLookup,
            Self::SurrogateKey { .. } => TransformKind::SurrogateKey,
        }
    }
}

/// Target table plus an optional instance tag (`measurement#ecog`), so one
/// source record can produce several rows of the same table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetSlot {
    pub table: TableName,
    pub instance: Option<String>,
}

impl TargetSlot {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            instance: None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (table, instance) = match raw.split_once('#') {
            Some((table, instance)) => {
                let instance = instance.trim().to_ascii_lowercase();
                if instance.is_empty() {
                    return Err(ModelError::InvalidTarget(raw.to_string()));
                }
                (table, Some(instance))
            }
            None => (raw, None),
        };
        Ok(Self {
            table: TableName::new(table)?,
            instance,
        })
    }
}

impl fmt::Display for TargetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}#{instance}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// One row of the structural mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralRule {
    /// `<file-stem>:<line>`.
    pub id: String,
    pub trial: TrialId,
    /// Normalized source table name, or [`RUN_SCOPE`].
    pub source_table: String,
    /// Normalized source fields; several only for composite surrogate keys.
    pub source_fields: Vec<String>,
    pub target: TargetSlot,
    pub target_column: ColumnName,
    pub transform: RuleTransform,
}

impl StructuralRule {
    pub fn kind(&self) -> TransformKind {
        self.transform.kind()
    }

    pub fn is_run_scoped(&self) -> bool {
        self.source_table == RUN_SCOPE
    }

    /// Source fields whose values this rule reads.
    pub fn input_fields(&self) -> Vec<&str> {
        match &self.transform {
            RuleTransform::Constant { .. } => Vec::new(),
            RuleTransform::Derived { inputs, .. } => inputs.iter().map(String::as_str).collect(),
            _ => self.source_fields.iter().map(String::as_str).collect(),
        }
    }

    /// True when the rule carries source data (as opposed to constants and keys).
    pub fn is_source_driven(&self) -> bool {
        matches!(
            self.transform,
            RuleTransform::Direct | RuleTransform::Derived { .. } | RuleTransform::ConceptLookup { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialScope {
    Any,
    Trial(TrialId),
}

impl TrialScope {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim() == WILDCARD {
            Ok(Self::Any)
        } else {
            TrialId::new(raw).map(Self::Trial)
        }
    }

    pub fn includes(&self, trial: &TrialId) -> bool {
        match self {
            Self::Any => true,
            Self::Trial(own) => own == trial,
        }
    }
}

impl fmt::Display for TrialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Trial(trial) => write!(f, "{trial}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuePattern {
    /// Fallback for any value without an exact rule.
    Default,
    Exact(String),
}

impl ValuePattern {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == WILDCARD {
            Self::Default
        } else {
            Self::Exact(trimmed.to_string())
        }
    }
}

impl fmt::Display for ValuePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str(WILDCARD),
            Self::Exact(value) => f.write_str(value),
        }
    }
}

/// One row of the static (value-level) mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRule {
    pub id: String,
    pub trial: TrialScope,
    /// Normalized source field name.
    pub source_field: String,
    pub source_value: ValuePattern,
    pub target_concept_id: i64,
    pub target_source_value: Option<String>,
}
