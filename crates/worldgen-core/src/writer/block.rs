//! Resolved output tree: every unit with its identifier, its (value, name)
//! lines in emission order, and its child units. Built once from the
//! hierarchy, the aggregates and the optional aspatial expansion; the writer
//! only walks it.

use crate::aggregate::Aggregates;
use crate::aspatial::AspatialExpander;
use crate::error::{Result, WorldgenError};
use crate::levels::{Hierarchy, HierarchyNode};
use crate::template::{Level, Template};

/// One emitted (value, name) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub value: f64,
    pub name: String,
}

impl Line {
    pub fn new(value: f64, name: &str) -> Self {
        Self {
            value,
            name: name.to_string(),
        }
    }
}

/// One unit of the worldfile hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub level: Level,
    pub id: i64,
    pub lines: Vec<Line>,
    pub children: Vec<Block>,
}

impl Block {
    /// Number of blocks at `level` in this subtree, this block included.
    pub fn count_at(&self, level: Level) -> usize {
        if self.level == level {
            return 1;
        }
        self.children.iter().map(|c| c.count_at(level)).sum()
    }
}

/// Identifier of stratum `index` (1-based) of `count` under a unit whose
/// stratum map value is `base`. A single stratum keeps the map value.
pub fn stratum_id(base: i64, index: u32, count: u32) -> Result<i64> {
    if count == 1 {
        return Ok(base);
    }
    base.checked_mul(10)
        .and_then(|id| id.checked_add(i64::from(index)))
        .ok_or(WorldgenError::IdOverflow {
            id: base,
            level: Level::Stratum,
        })
}

/// Template variable lines of one unit, in declaration order. Unsupported
/// operator lines were skipped during aggregation and are left out here too.
pub fn template_lines(
    template: &Template,
    aggregates: &Aggregates,
    level: Level,
    stratum: Option<u32>,
    key: &[i64],
) -> Result<Vec<Line>> {
    template
        .variables_at(level, stratum)
        .filter(|def| def.is_supported())
        .map(|def| -> Result<Line> { Ok(Line::new(aggregates.value(def, key)?, &def.name)) })
        .collect()
}

/// Builds the [`Block`] tree for a whole world.
pub struct Assembler<'a> {
    template: &'a Template,
    hierarchy: &'a Hierarchy,
    aggregates: &'a Aggregates,
    expander: Option<&'a AspatialExpander<'a>>,
}

impl<'a> Assembler<'a> {
    pub fn new(
        template: &'a Template,
        hierarchy: &'a Hierarchy,
        aggregates: &'a Aggregates,
        expander: Option<&'a AspatialExpander<'a>>,
    ) -> Self {
        Self {
            template,
            hierarchy,
            aggregates,
            expander,
        }
    }

    pub fn assemble(&self) -> Result<Block> {
        self.block(self.hierarchy.world())
    }

    /// Block for a unit above the patch level, with its whole subtree.
    fn block(&self, node: &HierarchyNode) -> Result<Block> {
        let lines = template_lines(self.template, self.aggregates, node.level, None, &node.key)?;
        let mut children = Vec::new();
        for child in self.hierarchy.children(node) {
            if child.level == Level::Patch {
                children.extend(self.patch(child)?);
            } else {
                children.push(self.block(child)?);
            }
        }
        Ok(Block {
            level: node.level,
            id: node.id,
            lines,
            children,
        })
    }

    /// One block for a spatial patch, or K family blocks when expanded.
    fn patch(&self, node: &HierarchyNode) -> Result<Vec<Block>> {
        let strata: Vec<&HierarchyNode> = self.hierarchy.children(node).collect();
        if let Some(expander) = self.expander {
            return expander.expand(node, &strata);
        }
        Ok(vec![Block {
            level: Level::Patch,
            id: node.id,
            lines: template_lines(self.template, self.aggregates, Level::Patch, None, &node.key)?,
            children: self.spatial_strata(&strata)?,
        }])
    }

    /// Stratum blocks of a spatial patch: every stratum index for every
    /// distinct stratum map value.
    fn spatial_strata(&self, strata: &[&HierarchyNode]) -> Result<Vec<Block>> {
        let count = self.template.boundaries.stratum_count();
        let mut blocks = Vec::with_capacity(strata.len() * count as usize);
        for node in strata {
            for s in 1..=count {
                blocks.push(Block {
                    level: Level::Stratum,
                    id: stratum_id(node.id, s, count)?,
                    lines: template_lines(self.template, self.aggregates, Level::Stratum, Some(s), &node.key)?,
                    children: Vec::new(),
                });
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stratum_ids_keep_map_value_for_single_stratum() {
        assert_eq!(stratum_id(42, 1, 1).unwrap(), 42);
        assert_eq!(stratum_id(42, 1, 2).unwrap(), 421);
        assert_eq!(stratum_id(42, 2, 2).unwrap(), 422);
    }

    #[test]
    fn oversized_stratum_base_is_an_error() {
        assert_eq!(stratum_id(i64::MAX, 1, 1).unwrap(), i64::MAX);
        assert!(matches!(
            stratum_id(i64::MAX / 5, 2, 3),
            Err(WorldgenError::IdOverflow { level: Level::Stratum, .. })
        ));
    }

    #[test]
    fn count_at_walks_the_subtree() {
        let leaf = |id| Block { level: Level::Patch, id, lines: vec![], children: vec![] };
        let zone = Block {
            level: Level::Zone,
            id: 1,
            lines: vec![Line::new(5.0, "k")],
            children: vec![leaf(1), leaf(2)],
        };
        assert_eq!(zone.count_at(Level::Patch), 2);
        assert_eq!(zone.count_at(Level::Zone), 1);
        assert_eq!(zone.count_at(Level::Stratum), 0);
    }
}
