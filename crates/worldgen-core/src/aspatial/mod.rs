//! Aspatial patch rules.
//!
//! A rule splits every spatial patch that references it into K "family"
//! sub-patches. Each rule carries a patch-level override table (one column per
//! family) and, per family, a stratum-level override table (one column per
//! canopy stratum). Blank cells fall back to the template's aggregated values.
pub mod expand;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorldgenError};
use crate::template::{parse_integer, Aggregation, IdSource, VariableDefinition};

pub use expand::AspatialExpander;

/// Name of the patch-level template variable that selects a patch's rule.
pub const RULE_VARIABLE: &str = "asp_rule";

/// Rule-table variable scaling each family's share of the spatial patch area.
pub const FAMILY_AREA_VARIABLE: &str = "pct_family_area";

/// One variable row of an override table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRow {
    pub name: String,
    /// Value per column (family or stratum); `None` is a blank cell.
    pub values: Vec<Option<f64>>,
}

/// Result of looking up one cell of an override table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Override {
    /// Variable not listed in the table.
    Absent,
    /// Variable listed but left blank for this column.
    Blank,
    Value(f64),
}

/// Variable × column override table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideTable {
    pub rows: Vec<OverrideRow>,
}

impl OverrideTable {
    /// Number of columns (families or strata).
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.values.len()).max().unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rows.iter().any(|r| r.name == name)
    }

    /// Override for `name` in 1-based `column`.
    pub fn lookup(&self, name: &str, column: usize) -> Override {
        match self.rows.iter().find(|r| r.name == name) {
            None => Override::Absent,
            Some(row) => match row.values.get(column - 1).copied().flatten() {
                Some(v) => Override::Value(v),
                None => Override::Blank,
            },
        }
    }
}

/// Overrides for one rule identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AspatialRule {
    pub patch_level_vars: OverrideTable,
    /// Stratum overrides, indexed by family - 1.
    #[serde(default)]
    pub strata_level_vars: Vec<OverrideTable>,
}

impl AspatialRule {
    /// Number of families K this rule splits a patch into.
    pub fn family_count(&self) -> usize {
        self.patch_level_vars.width()
    }

    /// Stratum override table of the 1-based `family`, if it declares any strata.
    pub fn strata(&self, family: usize) -> Option<&OverrideTable> {
        self.strata_level_vars
            .get(family - 1)
            .filter(|t| t.width() > 0)
    }
}

/// All rules of a rule document, keyed by rule identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AspatialRuleSet {
    pub rules: BTreeMap<i64, AspatialRule>,
}

impl AspatialRuleSet {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, rule: i64) -> Option<&AspatialRule> {
        self.rules.get(&rule)
    }
}

/// Per-cell rule source declared by the template's `asp_rule` variable:
/// a literal applies one rule to every cell, a map assigns rules per cell.
pub fn rule_source(def: &VariableDefinition) -> Result<IdSource> {
    let invalid = |reason: &str| WorldgenError::InvalidOperands {
        line: def.line,
        name: def.name.clone(),
        reason: reason.to_string(),
    };
    match &def.aggregation {
        Aggregation::Value { literal } | Aggregation::DValue { literal } => parse_integer(literal)
            .map(IdSource::Constant)
            .ok_or_else(|| WorldgenError::NonNumericLiteral {
                line: def.line,
                name: def.name.clone(),
                literal: literal.clone(),
            }),
        other => other
            .map()
            .map(|m| IdSource::Map(m.to_string()))
            .ok_or_else(|| invalid("rule identifier needs a literal or a map operand")),
    }
}
