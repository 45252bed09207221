//! Parsed template model: level markers, variable lines, and the typed
//! definitions derived from them.
//!
//! The raw template document is parsed elsewhere; this module consumes the
//! already-structured entry list and turns it into a [`LevelBoundaries`]
//! value plus one [`VariableDefinition`] per (line, stratum) pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorldgenError};

// ── Raw parsed structure ──────────────────────────────────────────────────────

/// One operand of a template line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Literal text, interpreted as a number by the operators that need one.
    Literal(String),
    /// Reference to a column of the cell table.
    Map(String),
}

impl Operand {
    pub fn as_map(&self) -> Option<&str> {
        match self {
            Operand::Map(m) => Some(m),
            Operand::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Operand::Literal(l) => Some(l),
            Operand::Map(_) => None,
        }
    }
}

/// A single entry of the parsed template, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateEntry {
    Level {
        name: String,
        source: Operand,
        #[serde(default)]
        count: Option<u32>,
    },
    Variable {
        name: String,
        operator: String,
        #[serde(default)]
        operands: Vec<Operand>,
    },
}

/// The template as handed over by the external parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTemplate {
    pub entries: Vec<TemplateEntry>,
}

impl ParsedTemplate {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ── Levels ────────────────────────────────────────────────────────────────────

/// The six strictly nested spatial levels, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    World,
    Basin,
    Hillslope,
    Zone,
    Patch,
    Stratum,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::World,
        Level::Basin,
        Level::Hillslope,
        Level::Zone,
        Level::Patch,
        Level::Stratum,
    ];

    /// Column position in the level matrix; also the output nesting depth.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Length of the level-ID key that identifies a unit of this level.
    #[inline]
    pub fn key_len(self) -> usize {
        self.index() + 1
    }

    pub fn child(self) -> Option<Level> {
        Level::ALL.get(self.index() + 1).copied()
    }

    /// Label of the structural line carrying a unit's identifier.
    pub fn id_label(self) -> &'static str {
        match self {
            Level::World => "world_id",
            Level::Basin => "basin_ID",
            Level::Hillslope => "hillslope_ID",
            Level::Zone => "zone_ID",
            Level::Patch => "patch_ID",
            Level::Stratum => "canopy_strata_ID",
        }
    }

    /// Label of the structural line announcing how many units of this level follow.
    pub fn count_label(self) -> &'static str {
        match self {
            Level::World => "num_worlds",
            Level::Basin => "num_basins",
            Level::Hillslope => "num_hillslopes",
            Level::Zone => "num_zones",
            Level::Patch => "num_patches",
            Level::Stratum => "num_stratum",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::World => "world",
            Level::Basin => "basin",
            Level::Hillslope => "hillslope",
            Level::Zone => "zone",
            Level::Patch => "patch",
            Level::Stratum => "stratum",
        };
        f.write_str(s)
    }
}

/// Where a per-cell identifier (level or aspatial rule) comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum IdSource {
    Map(String),
    Constant(i64),
}

/// One of the six level markers of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelBoundary {
    pub level: Level,
    /// Marker name as written in the template.
    pub name: String,
    pub source: IdSource,
    /// Template line of the marker.
    pub line: usize,
    /// Declared unit count. Only meaningful for the stratum marker.
    pub count: u32,
}

/// The six markers, addressable by level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelBoundaries {
    markers: Vec<LevelBoundary>,
}

impl LevelBoundaries {
    pub fn get(&self, level: Level) -> &LevelBoundary {
        &self.markers[level.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelBoundary> {
        self.markers.iter()
    }

    /// Number of canopy strata declared by the template.
    pub fn stratum_count(&self) -> u32 {
        self.get(Level::Stratum).count
    }
}

// ── Variable definitions ──────────────────────────────────────────────────────

/// Stable identifier of a [`VariableDefinition`] within one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId(pub usize);

/// How a variable reduces per-cell values to one value per grouping.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Literal numeric constant.
    Value { literal: String },
    /// Literal truncated to an integer.
    DValue { literal: String },
    /// Arithmetic mean of a map.
    Aver { map: String },
    /// Most frequent map value; ties go to the value seen first.
    Mode { map: String },
    /// Mean of a map times a literal scale factor.
    Eqn { scale: String, map: String },
    /// Circular mean of a degree-valued map.
    Spavg { map: String },
    /// Cell count times cell area.
    Area,
    /// Operator keyword this crate does not know. Skipped with a diagnostic.
    Unsupported { keyword: String, line: usize },
}

impl Aggregation {
    /// Number of operands the operator consumes per stratum.
    fn arity(operator: &str) -> Option<usize> {
        match operator {
            "value" | "dvalue" | "aver" | "mode" | "spavg" => Some(1),
            "eqn" => Some(2),
            "area" => Some(0),
            _ => None,
        }
    }

    /// Build the aggregation for `operator` from exactly its operands.
    fn from_operands(operator: &str, operands: &[Operand], line: usize, name: &str) -> Result<Self> {
        let invalid = |reason: String| WorldgenError::InvalidOperands {
            line,
            name: name.to_string(),
            reason,
        };
        let literal = |op: &Operand| {
            op.as_literal()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("`{operator}` expects a literal operand")))
        };
        let map = |op: &Operand| {
            op.as_map()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("`{operator}` expects a map operand")))
        };

        let agg = match operator {
            "value" => Aggregation::Value { literal: literal(&operands[0])? },
            "dvalue" => Aggregation::DValue { literal: literal(&operands[0])? },
            "aver" => Aggregation::Aver { map: map(&operands[0])? },
            "mode" => Aggregation::Mode { map: map(&operands[0])? },
            "spavg" => Aggregation::Spavg { map: map(&operands[0])? },
            "eqn" => {
                let scale = operands.iter().find_map(Operand::as_literal);
                let source = operands.iter().find_map(Operand::as_map);
                match (scale, source) {
                    (Some(scale), Some(source)) => Aggregation::Eqn {
                        scale: scale.to_string(),
                        map: source.to_string(),
                    },
                    _ => return Err(invalid("`eqn` expects one literal scale and one map".into())),
                }
            }
            "area" => Aggregation::Area,
            other => Aggregation::Unsupported {
                keyword: other.to_string(),
                line,
            },
        };
        Ok(agg)
    }

    /// Map column read by this aggregation, if any.
    pub fn map(&self) -> Option<&str> {
        match self {
            Aggregation::Aver { map }
            | Aggregation::Mode { map }
            | Aggregation::Eqn { map, .. }
            | Aggregation::Spavg { map } => Some(map),
            _ => None,
        }
    }
}

/// A template variable line, resolved for one stratum where applicable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub id: VariableId,
    /// Template line the variable was declared on.
    pub line: usize,
    /// Output name.
    pub name: String,
    /// Deepest level the variable belongs to; also its grouping depth.
    pub level: Level,
    /// 1-based stratum index for variables below the stratum marker.
    pub stratum: Option<u32>,
    pub aggregation: Aggregation,
}

impl VariableDefinition {
    pub fn is_supported(&self) -> bool {
        !matches!(self.aggregation, Aggregation::Unsupported { .. })
    }
}

/// Level boundaries plus the flat, declaration-ordered variable list.
#[derive(Debug, Clone)]
pub struct Template {
    pub boundaries: LevelBoundaries,
    pub variables: Vec<VariableDefinition>,
}

impl Template {
    /// Derive boundaries and definitions from the parsed entry list.
    pub fn from_parsed(parsed: &ParsedTemplate) -> Result<Self> {
        let mut markers: Vec<LevelBoundary> = Vec::with_capacity(Level::ALL.len());
        let mut pending: Vec<(usize, &str, &str, &[Operand])> = Vec::new();
        let mut depths: Vec<Level> = Vec::new();

        for (line, entry) in parsed.entries.iter().enumerate() {
            match entry {
                TemplateEntry::Level { name, source, count } => {
                    let level = *Level::ALL.get(markers.len()).ok_or_else(|| {
                        WorldgenError::TemplateStructure {
                            reason: format!("line {line}: more than six level markers"),
                        }
                    })?;
                    let source = match source {
                        Operand::Map(m) => IdSource::Map(m.clone()),
                        Operand::Literal(l) => IdSource::Constant(parse_integer(l).ok_or_else(
                            || WorldgenError::NonNumericLiteral {
                                line,
                                name: name.clone(),
                                literal: l.clone(),
                            },
                        )?),
                    };
                    let count = count.unwrap_or(1);
                    if count == 0 {
                        return Err(WorldgenError::TemplateStructure {
                            reason: format!("line {line}: {level} marker declares zero units"),
                        });
                    }
                    markers.push(LevelBoundary {
                        level,
                        name: name.clone(),
                        source,
                        line,
                        count,
                    });
                }
                TemplateEntry::Variable { name, operator, operands } => {
                    let Some(current) = markers.last() else {
                        return Err(WorldgenError::TemplateStructure {
                            reason: format!("line {line}: variable `{name}` precedes the world marker"),
                        });
                    };
                    pending.push((line, name.as_str(), operator.as_str(), operands.as_slice()));
                    depths.push(current.level);
                }
            }
        }

        if markers.len() != Level::ALL.len() {
            return Err(WorldgenError::TemplateStructure {
                reason: format!("expected six level markers, found {}", markers.len()),
            });
        }
        let boundaries = LevelBoundaries { markers };
        let strata = boundaries.stratum_count() as usize;

        let mut variables = Vec::new();
        for ((line, name, operator, operands), level) in pending.into_iter().zip(depths) {
            let slices = operand_slices(operator, operands, level, strata, line, name)?;
            for (i, ops) in slices.into_iter().enumerate() {
                let stratum = (level == Level::Stratum).then_some(i as u32 + 1);
                variables.push(VariableDefinition {
                    id: VariableId(variables.len()),
                    line,
                    name: name.to_string(),
                    level,
                    stratum,
                    aggregation: Aggregation::from_operands(operator, ops, line, name)?,
                });
            }
        }

        Ok(Self { boundaries, variables })
    }

    /// Variables declared directly under `level`, in declaration order.
    /// For the stratum level, pass the 1-based stratum index.
    pub fn variables_at(&self, level: Level, stratum: Option<u32>) -> impl Iterator<Item = &VariableDefinition> {
        self.variables
            .iter()
            .filter(move |v| v.level == level && v.stratum == stratum)
    }

    /// Look up a patch-level variable by output name.
    pub fn patch_variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables
            .iter()
            .find(|v| v.level == Level::Patch && v.name == name)
    }

    /// Every cell-table column the template references, levels first, without duplicates.
    pub fn referenced_maps(&self) -> Vec<String> {
        let mut maps: Vec<String> = Vec::new();
        let levels = self.boundaries.iter().filter_map(|b| match &b.source {
            IdSource::Map(m) => Some(m.as_str()),
            IdSource::Constant(_) => None,
        });
        let vars = self.variables.iter().filter_map(|v| v.aggregation.map());
        for m in levels.chain(vars) {
            if !maps.iter().any(|seen| seen == m) {
                maps.push(m.to_string());
            }
        }
        maps
    }
}

/// Split a line's operands into one slice per stratum (or a single slice).
fn operand_slices<'a>(
    operator: &str,
    operands: &'a [Operand],
    level: Level,
    strata: usize,
    line: usize,
    name: &str,
) -> Result<Vec<&'a [Operand]>> {
    let copies = if level == Level::Stratum { strata } else { 1 };
    let Some(arity) = Aggregation::arity(operator) else {
        return Ok(vec![operands; copies]);
    };
    if arity == 0 {
        return Ok(vec![&operands[..0]; copies]);
    }
    if operands.len() == arity {
        return Ok(vec![operands; copies]);
    }
    if copies > 1 && operands.len() == arity * copies {
        return Ok(operands.chunks(arity).collect());
    }
    Err(WorldgenError::InvalidOperands {
        line,
        name: name.to_string(),
        reason: format!(
            "`{operator}` takes {arity} operand(s) per stratum, found {}",
            operands.len()
        ),
    })
}

/// Parse an integral literal such as `3` or `3.0`.
pub(crate) fn parse_integer(text: &str) -> Option<i64> {
    let v: f64 = text.trim().parse().ok()?;
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn lit(s: &str) -> Operand {
        Operand::Literal(s.to_string())
    }

    pub fn map(s: &str) -> Operand {
        Operand::Map(s.to_string())
    }

    pub fn level(name: &str, source: Operand, count: Option<u32>) -> TemplateEntry {
        TemplateEntry::Level { name: name.to_string(), source, count }
    }

    pub fn var(name: &str, operator: &str, operands: Vec<Operand>) -> TemplateEntry {
        TemplateEntry::Variable {
            name: name.to_string(),
            operator: operator.to_string(),
            operands,
        }
    }

    /// Six markers reading the conventional level maps, with `extra` spliced
    /// in after the marker of the given level.
    pub fn skeleton(strata: u32, extra: Vec<(Level, TemplateEntry)>) -> ParsedTemplate {
        let maps = ["world", "basin", "hill", "zone", "patch", "strata"];
        let mut entries = Vec::new();
        for (lvl, m) in Level::ALL.into_iter().zip(maps) {
            let count = (lvl == Level::Stratum).then_some(strata);
            entries.push(level(&format!("_{lvl}"), map(m), count));
            for (at, e) in &extra {
                if *at == lvl {
                    entries.push(e.clone());
                }
            }
        }
        ParsedTemplate { entries }
    }

    #[test]
    fn variables_take_depth_of_preceding_marker() {
        let parsed = skeleton(
            1,
            vec![
                (Level::Basin, var("x", "aver", vec![map("xmap")])),
                (Level::Zone, var("k", "value", vec![lit("5")])),
                (Level::Patch, var("area", "area", vec![])),
            ],
        );
        let t = Template::from_parsed(&parsed).unwrap();
        let levels: Vec<_> = t.variables.iter().map(|v| (v.name.as_str(), v.level)).collect();
        assert_eq!(
            levels,
            vec![("x", Level::Basin), ("k", Level::Zone), ("area", Level::Patch)]
        );
        assert_eq!(t.variables[2].line, 7);
    }

    #[test]
    fn stratum_variables_are_split_per_stratum() {
        let parsed = skeleton(
            2,
            vec![
                (Level::Stratum, var("lai", "value", vec![lit("1.5"), lit("3.0")])),
                (Level::Stratum, var("veg", "mode", vec![map("vegmap")])),
            ],
        );
        let t = Template::from_parsed(&parsed).unwrap();
        let lai: Vec<_> = t.variables.iter().filter(|v| v.name == "lai").collect();
        assert_eq!(lai.len(), 2);
        assert_eq!(lai[1].stratum, Some(2));
        assert_eq!(lai[1].aggregation, Aggregation::Value { literal: "3.0".into() });
        assert_eq!(t.variables_at(Level::Stratum, Some(2)).count(), 2);
    }

    #[test]
    fn unknown_operator_becomes_unsupported_variant() {
        let parsed = skeleton(1, vec![(Level::Zone, var("z", "median", vec![map("dem")]))]);
        let t = Template::from_parsed(&parsed).unwrap();
        assert!(!t.variables[0].is_supported());
    }

    #[test]
    fn eqn_accepts_operands_in_either_order() {
        let parsed = skeleton(1, vec![(Level::Zone, var("z", "eqn", vec![map("dem"), lit("0.1")]))]);
        let t = Template::from_parsed(&parsed).unwrap();
        assert_eq!(
            t.variables[0].aggregation,
            Aggregation::Eqn { scale: "0.1".into(), map: "dem".into() }
        );
    }

    #[test]
    fn wrong_operand_count_is_fatal() {
        let parsed = skeleton(1, vec![(Level::Zone, var("z", "aver", vec![]))]);
        let err = Template::from_parsed(&parsed).unwrap_err();
        assert!(matches!(err, WorldgenError::InvalidOperands { line: 4, .. }), "{err}");
    }

    #[test]
    fn missing_marker_is_fatal() {
        let mut parsed = skeleton(1, vec![]);
        parsed.entries.pop();
        assert!(matches!(
            Template::from_parsed(&parsed),
            Err(WorldgenError::TemplateStructure { .. })
        ));
    }

    #[test]
    fn parses_json_entries() {
        let json = r#"{"entries":[
            {"kind":"level","name":"_world","source":{"literal":"1"}},
            {"kind":"variable","name":"k","operator":"value","operands":[{"literal":"5"}]}
        ]}"#;
        let parsed = ParsedTemplate::from_json(json).unwrap();
        assert_eq!(parsed.entries[1], var("k", "value", vec![lit("5")]));
    }
}
