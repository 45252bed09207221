//! Variable aggregation: one value per template variable per level grouping.
//!
//! Grouping key for a variable = level IDs from world down to the variable's
//! declared level. Stratum variables are defined once per stratum index, so
//! each index aggregates independently over the same stratum groups.
pub mod circular;
pub mod stats;

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::cell_table::CellTable;
use crate::error::{Result, WorldgenError};
use crate::levels::{Groups, LevelMatrix};
use crate::template::{Aggregation, Level, Template, VariableDefinition, VariableId};
use circular::circular_mean_deg;
use stats::{mean, mode};

/// Aggregated result for one variable definition.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatedVariable {
    /// Same value for every grouping.
    Constant(f64),
    /// One value per level-ID key of the variable's level.
    Grouped {
        level: Level,
        values: HashMap<Vec<i64>, f64>,
    },
}

impl AggregatedVariable {
    /// Value for the unit identified by `key`. Keys deeper than the variable's
    /// level are truncated to it.
    pub fn lookup(&self, key: &[i64]) -> Option<f64> {
        match self {
            AggregatedVariable::Constant(v) => Some(*v),
            AggregatedVariable::Grouped { level, values } => {
                let key = key.get(..level.key_len())?;
                values.get(key).copied()
            }
        }
    }
}

/// Aggregated values of every supported variable, addressed by [`VariableId`].
#[derive(Debug, Clone, Default)]
pub struct Aggregates {
    values: BTreeMap<VariableId, AggregatedVariable>,
}

impl Aggregates {
    pub fn get(&self, id: VariableId) -> Option<&AggregatedVariable> {
        self.values.get(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of `def` for the unit identified by `key`.
    /// A key with no aggregated group is a defect and aborts the run.
    pub fn value(&self, def: &VariableDefinition, key: &[i64]) -> Result<f64> {
        self.values
            .get(&def.id)
            .and_then(|agg| agg.lookup(key))
            .ok_or_else(|| WorldgenError::MissingGroup {
                name: def.name.clone(),
                key: key.to_vec(),
            })
    }
}

/// Aggregate every variable of `template` over the cells of `table`.
///
/// Unsupported operator lines are reported and skipped; everything else that
/// cannot be evaluated (non-numeric literal, missing column) is fatal.
pub fn aggregate(template: &Template, matrix: &LevelMatrix, table: &CellTable) -> Result<Aggregates> {
    let mut groups_by_level: HashMap<Level, Groups> = HashMap::new();
    let mut out = Aggregates::default();

    for def in &template.variables {
        let groups = groups_by_level
            .entry(def.level)
            .or_insert_with(|| matrix.groups(def.level));

        let agg = match &def.aggregation {
            Aggregation::Unsupported { keyword, line } => {
                warn!(line, keyword = %keyword, name = %def.name, "unsupported operator; template line skipped");
                continue;
            }
            Aggregation::Value { literal } => AggregatedVariable::Constant(parse_literal(literal, def)?),
            Aggregation::DValue { literal } => {
                AggregatedVariable::Constant(parse_literal(literal, def)?.trunc())
            }
            Aggregation::Area => {
                let cell_area = table.cell_area();
                per_group(def.level, groups, |cells| cells.len() as f64 * cell_area)
            }
            Aggregation::Aver { map } => {
                let col = table.column(map)?;
                per_group(def.level, groups, |cells| mean(col, cells))
            }
            Aggregation::Mode { map } => {
                let col = table.column(map)?;
                per_group(def.level, groups, |cells| mode(col, cells))
            }
            Aggregation::Eqn { scale, map } => {
                let scale = parse_literal(scale, def)?;
                let col = table.column(map)?;
                per_group(def.level, groups, |cells| mean(col, cells) * scale)
            }
            Aggregation::Spavg { map } => {
                let col = table.column(map)?;
                per_group(def.level, groups, |cells| circular_mean_deg(col, cells))
            }
        };
        out.values.insert(def.id, agg);
    }

    debug!(
        variables = out.len(),
        skipped = template.variables.len() - out.len(),
        "aggregation complete"
    );
    Ok(out)
}

fn per_group(level: Level, groups: &Groups, f: impl Fn(&[usize]) -> f64) -> AggregatedVariable {
    let values = groups
        .iter()
        .map(|(key, cells)| (key.to_vec(), f(cells)))
        .collect();
    AggregatedVariable::Grouped { level, values }
}

fn parse_literal(literal: &str, def: &VariableDefinition) -> Result<f64> {
    literal
        .trim()
        .parse::<f64>()
        .map_err(|_| WorldgenError::NonNumericLiteral {
            line: def.line,
            name: def.name.clone(),
            literal: literal.to_string(),
        })
}
