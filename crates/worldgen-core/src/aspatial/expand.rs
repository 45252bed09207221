//! Expansion of spatial patches into rule-defined family sub-patches.
//!
//! Family `f` of spatial patch `p` is emitted as patch `p * 100 + f`; its
//! strata are emitted per spatial stratum `d` of the patch, with base id
//! `d * 100 + f`. Values
//! resolve per variable as: rule override for the family if present and not
//! blank, otherwise the template's aggregated value for the spatial patch
//! (with `area` scaled by the family's `pct_family_area`). Rule variables the
//! template does not declare are emitted ahead of the template variables and
//! must carry a value.

use std::collections::HashMap;

use tracing::warn;

use super::{AspatialRule, AspatialRuleSet, Override, OverrideTable, FAMILY_AREA_VARIABLE};
use crate::aggregate::Aggregates;
use crate::error::{Result, WorldgenError};
use crate::levels::{HierarchyNode, LevelMatrix};
use crate::template::{Level, Template, VariableDefinition};
use crate::writer::block::{stratum_id, Block, Line};

/// Family IDs reserve two decimal digits below the spatial patch ID.
pub const FAMILY_ID_FACTOR: i64 = 100;

/// Template variable whose aggregated value is scaled by the family area share.
const AREA_VARIABLE: &str = "area";

pub struct AspatialExpander<'a> {
    template: &'a Template,
    aggregates: &'a Aggregates,
    rules: &'a AspatialRuleSet,
    /// Patch key → rule identifier.
    patch_rules: HashMap<Vec<i64>, i64>,
}

impl<'a> AspatialExpander<'a> {
    /// Resolve the single rule of every spatial patch.
    ///
    /// `matrix` must carry the per-cell rule column.
    pub fn new(
        template: &'a Template,
        aggregates: &'a Aggregates,
        rules: &'a AspatialRuleSet,
        matrix: &LevelMatrix,
    ) -> Result<Self> {
        let mut patch_rules = HashMap::new();
        for (key, cells) in matrix.groups(Level::Patch).iter() {
            let patch = key[key.len() - 1];
            let mut seen: Vec<i64> = Vec::new();
            for &c in cells {
                if let Some(rule) = matrix.rule(c) {
                    if !seen.contains(&rule) {
                        seen.push(rule);
                    }
                }
            }
            let rule = match seen.as_slice() {
                [rule] => *rule,
                [] => {
                    return Err(WorldgenError::TemplateStructure {
                        reason: format!("patch {patch}: no aspatial rule column"),
                    })
                }
                many => {
                    return Err(WorldgenError::AmbiguousRule {
                        patch,
                        rules: many.to_vec(),
                    })
                }
            };
            match rules.get(rule) {
                None => return Err(WorldgenError::UnknownRule { patch, rule }),
                Some(r) if r.family_count() == 0 => return Err(WorldgenError::EmptyRule { patch, rule }),
                Some(_) => {}
            }
            patch_rules.insert(key.to_vec(), rule);
        }
        Ok(Self {
            template,
            aggregates,
            rules,
            patch_rules,
        })
    }

    /// Rule identifier resolved for the patch with this key.
    pub fn rule_of(&self, patch_key: &[i64]) -> Option<i64> {
        self.patch_rules.get(patch_key).copied()
    }

    /// Family blocks replacing the spatial `patch`. `strata` are the patch's
    /// spatial stratum units; every family repeats them.
    pub fn expand(&self, patch: &HierarchyNode, strata: &[&HierarchyNode]) -> Result<Vec<Block>> {
        let rule_id = self.rule_of(&patch.key).ok_or_else(|| WorldgenError::MissingGroup {
            name: super::RULE_VARIABLE.to_string(),
            key: patch.key.clone(),
        })?;
        let rule = self
            .rules
            .get(rule_id)
            .ok_or(WorldgenError::UnknownRule { patch: patch.id, rule: rule_id })?;

        (1..=rule.family_count())
            .map(|family| -> Result<Block> {
                let ctx = FamilyContext { rule_id, rule, family, patch };
                Ok(Block {
                    level: Level::Patch,
                    id: family_id(patch.id, family)?,
                    lines: self.family_lines(&ctx)?,
                    children: self.family_strata(&ctx, strata)?,
                })
            })
            .collect()
    }

    /// Patch-level lines: rule-only extras first, then template variables.
    fn family_lines(&self, ctx: &FamilyContext<'_>) -> Result<Vec<Line>> {
        let table = &ctx.rule.patch_level_vars;
        let defs: Vec<&VariableDefinition> = self
            .template
            .variables_at(Level::Patch, None)
            .filter(|d| d.is_supported())
            .collect();

        let mut lines = extras(table, &defs, ctx, ctx.family)?;
        let area_share = match table.lookup(FAMILY_AREA_VARIABLE, ctx.family) {
            Override::Value(v) => v,
            Override::Absent | Override::Blank => 1.0,
        };
        for def in defs {
            let value = match table.lookup(&def.name, ctx.family) {
                Override::Value(v) => v,
                Override::Absent | Override::Blank => {
                    let v = self.aggregates.value(def, &ctx.patch.key)?;
                    if def.name == AREA_VARIABLE {
                        v * area_share
                    } else {
                        v
                    }
                }
            };
            lines.push(Line::new(value, &def.name));
        }
        Ok(lines)
    }

    /// Stratum blocks of one family, for every spatial stratum of the patch.
    /// The family's stratum table decides the stratum count; without one the
    /// template's count applies.
    fn family_strata(&self, ctx: &FamilyContext<'_>, strata: &[&HierarchyNode]) -> Result<Vec<Block>> {
        let template_count = self.template.boundaries.stratum_count();
        let table = ctx.rule.strata(ctx.family);
        let count = table.map_or(template_count, |t| t.width() as u32);

        let mut indices: Vec<(u32, Vec<&VariableDefinition>)> = Vec::with_capacity(count as usize);
        for s in 1..=count {
            let index = if s <= template_count {
                s
            } else {
                warn!(
                    patch = ctx.patch.id,
                    family = ctx.family,
                    stratum = s,
                    template_strata = template_count,
                    "rule declares more strata than the template; using template stratum 1 values"
                );
                1
            };
            let defs = self
                .template
                .variables_at(Level::Stratum, Some(index))
                .filter(|d| d.is_supported())
                .collect();
            indices.push((s, defs));
        }

        let mut blocks = Vec::with_capacity(strata.len() * indices.len());
        for spatial in strata {
            let base = family_id(spatial.id, ctx.family)?;
            for (s, defs) in &indices {
                let column = *s as usize;
                let mut lines = match table {
                    Some(t) => extras(t, defs, ctx, column)?,
                    None => Vec::new(),
                };
                for def in defs {
                    let over = table.map_or(Override::Absent, |t| t.lookup(&def.name, column));
                    let value = match over {
                        Override::Value(v) => v,
                        Override::Absent | Override::Blank => self.aggregates.value(def, &spatial.key)?,
                    };
                    lines.push(Line::new(value, &def.name));
                }
                blocks.push(Block {
                    level: Level::Stratum,
                    id: stratum_id(base, *s, count)?,
                    lines,
                    children: Vec::new(),
                });
            }
        }
        Ok(blocks)
    }
}

/// Identifier of `family` (1-based) derived from a spatial unit id.
fn family_id(base: i64, family: usize) -> Result<i64> {
    base.checked_mul(FAMILY_ID_FACTOR)
        .and_then(|id| id.checked_add(family as i64))
        .ok_or(WorldgenError::IdOverflow {
            id: base,
            level: Level::Patch,
        })
}

struct FamilyContext<'r> {
    rule_id: i64,
    rule: &'r AspatialRule,
    family: usize,
    patch: &'r HierarchyNode,
}

/// Lines for table rows the template does not declare, in table order.
/// Such rows have no template fallback, so a blank cell is fatal.
fn extras(
    table: &OverrideTable,
    defs: &[&VariableDefinition],
    ctx: &FamilyContext<'_>,
    column: usize,
) -> Result<Vec<Line>> {
    table
        .rows
        .iter()
        .filter(|row| !defs.iter().any(|d| d.name == row.name))
        .map(|row| match table.lookup(&row.name, column) {
            Override::Value(v) => Ok(Line::new(v, &row.name)),
            Override::Absent | Override::Blank => Err(WorldgenError::MissingOverride {
                rule: ctx.rule_id,
                family: ctx.family,
                name: row.name.clone(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::aspatial::tests::row;
    use crate::aspatial::{rule_source, OverrideTable, RULE_VARIABLE};
    use crate::cell_table::CellTable;
    use crate::levels::Hierarchy;
    use crate::template::tests::{lit, map, skeleton, var};
    use crate::template::TemplateEntry;
    use crate::writer::block::Assembler;
    use approx::assert_abs_diff_eq;

    /// One zone, patches 5 (3 cells) and 6 (1 cell); rule column per cell.
    fn table(rules: Vec<f64>) -> CellTable {
        CellTable::new(10.0, 10.0)
            .with_column("world", vec![1.0; 4])
            .with_column("basin", vec![1.0; 4])
            .with_column("hill", vec![1.0; 4])
            .with_column("zone", vec![1.0; 4])
            .with_column("patch", vec![5.0, 5.0, 6.0, 5.0])
            .with_column("strata", vec![5.0, 5.0, 6.0, 5.0])
            .with_column("lai_map", vec![1.0, 2.0, 3.0, 3.0])
            .with_column("rules", rules)
    }

    fn template_entries() -> Vec<(Level, TemplateEntry)> {
        vec![
            (Level::Patch, var(RULE_VARIABLE, "mode", vec![map("rules")])),
            (Level::Patch, var("area", "area", vec![])),
            (Level::Patch, var("leaf_area_index", "aver", vec![map("lai_map")])),
            (Level::Stratum, var("cover_fraction", "value", vec![lit("0.8")])),
        ]
    }

    fn rule_r() -> AspatialRule {
        AspatialRule {
            patch_level_vars: OverrideTable {
                rows: vec![
                    row("pct_family_area", &[Some(0.4), Some(0.6)]),
                    row("leaf_area_index", &[None, Some(3.2)]),
                ],
            },
            strata_level_vars: vec![
                OverrideTable::default(),
                OverrideTable {
                    rows: vec![row("cover_fraction", &[Some(0.5), None]), row("gap", &[Some(0.1), Some(0.2)])],
                },
            ],
        }
    }

    fn rule_set() -> AspatialRuleSet {
        let mut set = AspatialRuleSet::default();
        set.rules.insert(1, rule_r());
        set.rules.insert(
            2,
            AspatialRule {
                patch_level_vars: OverrideTable { rows: vec![row("pct_family_area", &[Some(1.0)])] },
                strata_level_vars: vec![],
            },
        );
        set
    }

    fn expand_world(rules_col: Vec<f64>, set: &AspatialRuleSet) -> Result<Block> {
        expand_cells(table(rules_col), set)
    }

    fn expand_cells(tab: CellTable, set: &AspatialRuleSet) -> Result<Block> {
        let t = Template::from_parsed(&skeleton(1, template_entries())).unwrap();
        let source = rule_source(t.patch_variable(RULE_VARIABLE).unwrap()).unwrap();
        let m = LevelMatrix::derive(&tab, &t.boundaries)?.with_rules(&tab, &source)?;
        let h = Hierarchy::derive(&m)?;
        let a = aggregate(&t, &m, &tab)?;
        let x = AspatialExpander::new(&t, &a, set, &m)?;
        Assembler::new(&t, &h, &a, Some(&x)).assemble()
    }

    fn patches(world: &Block) -> Vec<&Block> {
        let zone = &world.children[0].children[0].children[0];
        zone.children.iter().collect()
    }

    fn value(b: &Block, name: &str) -> f64 {
        b.lines.iter().find(|l| l.name == name).map(|l| l.value).unwrap()
    }

    #[test]
    fn families_get_ids_and_overrides() {
        let world = expand_world(vec![1.0, 1.0, 2.0, 1.0], &rule_set()).unwrap();
        let p = patches(&world);
        let ids: Vec<i64> = p.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![501, 502, 601]);
        // Family 1 falls back to the aggregated mean of patch 5: (1 + 2 + 3) / 3.
        assert_abs_diff_eq!(value(p[0], "leaf_area_index"), 2.0, epsilon = 1e-12);
        assert_eq!(value(p[1], "leaf_area_index"), 3.2);
    }

    #[test]
    fn family_areas_split_by_share() {
        let world = expand_world(vec![1.0, 1.0, 2.0, 1.0], &rule_set()).unwrap();
        let p = patches(&world);
        let spatial_area = 3.0 * 100.0;
        let total = value(p[0], "area") + value(p[1], "area");
        assert_abs_diff_eq!(total, spatial_area * (0.4 + 0.6), epsilon = 1e-9);
        assert_abs_diff_eq!(value(p[0], "area"), 120.0, epsilon = 1e-9);
    }

    #[test]
    fn extras_precede_template_variables() {
        let world = expand_world(vec![1.0, 1.0, 2.0, 1.0], &rule_set()).unwrap();
        let names: Vec<&str> = patches(&world)[0].lines.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["pct_family_area", RULE_VARIABLE, "area", "leaf_area_index"]);
    }

    #[test]
    fn family_strata_follow_rule_table() {
        let world = expand_world(vec![1.0, 1.0, 2.0, 1.0], &rule_set()).unwrap();
        let p = patches(&world);
        // Family 1 has no stratum table: template count, template values.
        assert_eq!(p[0].children.len(), 1);
        assert_eq!(p[0].children[0].id, 501);
        assert_eq!(value(&p[0].children[0], "cover_fraction"), 0.8);
        // Family 2 declares two strata; the second falls back to stratum 1 of the template.
        let s = &p[1].children;
        assert_eq!(s.iter().map(|b| b.id).collect::<Vec<_>>(), vec![5021, 5022]);
        assert_eq!(value(&s[0], "cover_fraction"), 0.5);
        assert_eq!(value(&s[1], "cover_fraction"), 0.8);
        assert_eq!(s[1].lines[0], Line::new(0.2, "gap"));
    }

    #[test]
    fn mixed_rules_in_one_patch_are_fatal() {
        let err = expand_world(vec![1.0, 2.0, 2.0, 1.0], &rule_set()).unwrap_err();
        assert!(matches!(err, WorldgenError::AmbiguousRule { patch: 5, .. }), "{err}");
    }

    #[test]
    fn unknown_rule_is_fatal() {
        let err = expand_world(vec![1.0, 1.0, 9.0, 1.0], &rule_set()).unwrap_err();
        assert!(matches!(err, WorldgenError::UnknownRule { patch: 6, rule: 9 }), "{err}");
    }

    #[test]
    fn blank_extra_without_template_default_is_fatal() {
        let mut set = rule_set();
        set.rules
            .get_mut(&2)
            .unwrap()
            .patch_level_vars
            .rows
            .push(row("sat_deficit", &[None]));
        let err = expand_world(vec![1.0, 1.0, 2.0, 1.0], &set).unwrap_err();
        assert!(
            matches!(err, WorldgenError::MissingOverride { rule: 2, family: 1, ref name } if name == "sat_deficit"),
            "{err}"
        );
    }

    #[test]
    fn every_spatial_stratum_is_kept_per_family() {
        // Patch 5 spans strata 51 (one cell) and 52 (two cells).
        let tab = table(vec![1.0, 1.0, 2.0, 1.0])
            .with_column("strata", vec![51.0, 52.0, 6.0, 52.0])
            .with_column("veg", vec![2.0, 3.0, 9.0, 4.0]);
        let mut parsed = skeleton(1, template_entries());
        parsed.entries.push(var("veg", "aver", vec![map("veg")]));
        let t = Template::from_parsed(&parsed).unwrap();
        let source = rule_source(t.patch_variable(RULE_VARIABLE).unwrap()).unwrap();
        let m = LevelMatrix::derive(&tab, &t.boundaries).unwrap().with_rules(&tab, &source).unwrap();
        let h = Hierarchy::derive(&m).unwrap();
        let a = aggregate(&t, &m, &tab).unwrap();
        let set = rule_set();
        let x = AspatialExpander::new(&t, &a, &set, &m).unwrap();
        let world = Assembler::new(&t, &h, &a, Some(&x)).assemble().unwrap();

        let p = patches(&world);
        let ids: Vec<i64> = p[0].children.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![5101, 5201]);
        assert_eq!(value(&p[0].children[0], "veg"), 2.0);
        assert_abs_diff_eq!(value(&p[0].children[1], "veg"), 3.5, epsilon = 1e-12);
        // Family 2 of rule 1 has a two-column stratum table.
        let ids: Vec<i64> = p[1].children.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![51021, 51022, 52021, 52022]);
        assert_eq!(value(&p[1].children[2], "cover_fraction"), 0.5);
        assert_abs_diff_eq!(value(&p[1].children[3], "veg"), 3.5, epsilon = 1e-12);
    }

    #[test]
    fn rule_without_families_is_fatal() {
        let mut set = rule_set();
        set.rules.insert(2, AspatialRule::default());
        let err = expand_world(vec![1.0, 1.0, 2.0, 1.0], &set).unwrap_err();
        assert!(matches!(err, WorldgenError::EmptyRule { patch: 6, rule: 2 }), "{err}");
    }

    #[test]
    fn oversized_patch_id_is_an_error() {
        let tab = table(vec![1.0, 1.0, 2.0, 1.0])
            .with_column("patch", vec![5.0, 5.0, 1e17, 5.0])
            .with_column("strata", vec![5.0, 5.0, 1e17, 5.0]);
        let err = expand_cells(tab, &rule_set()).unwrap_err();
        assert!(matches!(err, WorldgenError::IdOverflow { level: Level::Patch, .. }), "{err}");
    }
}
