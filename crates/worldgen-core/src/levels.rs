//! Level hierarchy derivation.
//!
//! Turns the cell table into a per-cell matrix of level IDs and then into an
//! ordered tree of spatial units. Sibling order everywhere is the order in
//! which a unit first appears in the cell table, never numeric order: the
//! worldfile lists units in exactly that sequence.

use std::collections::HashMap;

use tracing::warn;

use crate::cell_table::CellTable;
use crate::error::{Result, WorldgenError};
use crate::template::{IdSource, Level, LevelBoundaries};

/// Number of level columns (world through stratum).
pub const N_LEVELS: usize = 6;

/// One row per cell, one integer ID per level, plus an optional rule-ID column.
#[derive(Debug, Clone)]
pub struct LevelMatrix {
    rows: Vec<[i64; N_LEVELS]>,
    rules: Option<Vec<i64>>,
}

impl LevelMatrix {
    /// Read the six level-ID columns named by `boundaries` from `table`.
    pub fn derive(table: &CellTable, boundaries: &LevelBoundaries) -> Result<Self> {
        let n = table.len();
        if n == 0 {
            return Err(WorldgenError::EmptyCellTable);
        }
        let mut rows = vec![[0i64; N_LEVELS]; n];
        for marker in boundaries.iter() {
            let ids = resolve_ids(table, &marker.source)?;
            for (row, id) in rows.iter_mut().zip(ids) {
                row[marker.level.index()] = id;
            }
        }
        Ok(Self { rows, rules: None })
    }

    /// Build a matrix directly from level-ID rows.
    pub fn from_rows(rows: Vec<[i64; N_LEVELS]>) -> Self {
        Self { rows, rules: None }
    }

    /// Append the per-cell aspatial rule column.
    pub fn with_rules(mut self, table: &CellTable, source: &IdSource) -> Result<Self> {
        self.rules = Some(resolve_ids(table, source)?);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn row(&self, cell: usize) -> &[i64; N_LEVELS] {
        &self.rows[cell]
    }

    /// Level-ID key of `cell` from world down to `level`, inclusive.
    #[inline]
    pub fn key(&self, cell: usize, level: Level) -> &[i64] {
        &self.rows[cell][..level.key_len()]
    }

    /// Rule ID of `cell`, when the rule column is present.
    #[inline]
    pub fn rule(&self, cell: usize) -> Option<i64> {
        self.rules.as_ref().map(|r| r[cell])
    }

    pub fn has_rules(&self) -> bool {
        self.rules.is_some()
    }

    /// Group cells by their key at `level`, in first-occurrence order.
    pub fn groups(&self, level: Level) -> Groups {
        let mut groups = Groups::default();
        for cell in 0..self.rows.len() {
            groups.push(self.key(cell, level), cell);
        }
        groups
    }
}

/// Convert a cell-table column (or a constant) into integer IDs.
fn resolve_ids(table: &CellTable, source: &IdSource) -> Result<Vec<i64>> {
    match source {
        IdSource::Constant(id) => Ok(vec![*id; table.len()]),
        IdSource::Map(name) => table
            .column(name)?
            .iter()
            .enumerate()
            .map(|(row, &value)| {
                if value.is_finite() && value.fract() == 0.0 {
                    Ok(value as i64)
                } else {
                    Err(WorldgenError::InvalidId {
                        column: name.clone(),
                        row,
                        value,
                    })
                }
            })
            .collect(),
    }
}

// ── Ordered grouping ──────────────────────────────────────────────────────────

/// Cells grouped by level-ID key. Groups and the cells inside each group keep
/// the cell table's order.
#[derive(Debug, Clone, Default)]
pub struct Groups {
    index: HashMap<Vec<i64>, usize>,
    keys: Vec<Vec<i64>>,
    members: Vec<Vec<usize>>,
}

impl Groups {
    fn push(&mut self, key: &[i64], cell: usize) {
        let slot = match self.index.get(key) {
            Some(&slot) => slot,
            None => {
                let slot = self.keys.len();
                self.index.insert(key.to_vec(), slot);
                self.keys.push(key.to_vec());
                self.members.push(Vec::new());
                slot
            }
        };
        self.members[slot].push(cell);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Cells of the group with this exact key.
    pub fn cells(&self, key: &[i64]) -> Option<&[usize]> {
        self.index.get(key).map(|&slot| self.members[slot].as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[i64], &[usize])> {
        self.keys
            .iter()
            .zip(&self.members)
            .map(|(k, m)| (k.as_slice(), m.as_slice()))
    }
}

// ── Unit tree ─────────────────────────────────────────────────────────────────

/// One spatial unit (basin, hillslope, ...) of the derived hierarchy.
#[derive(Debug, Clone)]
pub struct HierarchyNode {
    pub level: Level,
    pub id: i64,
    /// Level-ID key from world down to this unit.
    pub key: Vec<i64>,
    /// Child node indices, in first-occurrence order.
    pub children: Vec<usize>,
}

/// Strictly nested tree of spatial units with a single world at its root.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: Vec<HierarchyNode>,
    root: usize,
}

impl Hierarchy {
    pub fn derive(matrix: &LevelMatrix) -> Result<Self> {
        let mut nodes: Vec<HierarchyNode> = Vec::new();
        let mut by_key: HashMap<Vec<i64>, usize> = HashMap::new();
        let mut roots: Vec<usize> = Vec::new();
        // (level, id) -> parent key of the first unit seen with that id.
        let mut parents: HashMap<(Level, i64), Vec<i64>> = HashMap::new();

        for cell in 0..matrix.len() {
            let mut parent: Option<usize> = None;
            for level in Level::ALL {
                let key = matrix.key(cell, level);
                let node = match by_key.get(key) {
                    Some(&node) => node,
                    None => {
                        let node = nodes.len();
                        let id = key[key.len() - 1];
                        nodes.push(HierarchyNode {
                            level,
                            id,
                            key: key.to_vec(),
                            children: Vec::new(),
                        });
                        by_key.insert(key.to_vec(), node);
                        match parent {
                            Some(p) => nodes[p].children.push(node),
                            None => roots.push(node),
                        }
                        let parent_key = &key[..key.len() - 1];
                        match parents.get(&(level, id)) {
                            Some(first) if first.as_slice() != parent_key && level != Level::Stratum => {
                                warn!(%level, id, "unit id reused under a different parent; units are keyed by full level path");
                            }
                            Some(_) => {}
                            None => {
                                parents.insert((level, id), parent_key.to_vec());
                            }
                        }
                        node
                    }
                };
                parent = Some(node);
            }
        }

        match roots.as_slice() {
            [root] => Ok(Self { nodes, root: *root }),
            [] => Err(WorldgenError::EmptyCellTable),
            many => Err(WorldgenError::MultipleWorlds { count: many.len() }),
        }
    }

    pub fn world(&self) -> &HierarchyNode {
        &self.nodes[self.root]
    }

    pub fn node(&self, index: usize) -> &HierarchyNode {
        &self.nodes[index]
    }

    /// Child units of `node`, in first-occurrence order.
    pub fn children<'a>(&'a self, node: &'a HierarchyNode) -> impl Iterator<Item = &'a HierarchyNode> + 'a {
        node.children.iter().map(move |&c| &self.nodes[c])
    }

    /// Total number of units at `level`.
    pub fn count_at(&self, level: Level) -> usize {
        self.nodes.iter().filter(|n| n.level == level).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::skeleton;
    use crate::template::Template;

    fn table() -> CellTable {
        CellTable::new(10.0, 10.0)
            .with_column("world", vec![1.0; 6])
            .with_column("basin", vec![1.0; 6])
            .with_column("hill", vec![1.0; 6])
            .with_column("zone", vec![7.0, 3.0, 7.0, 3.0, 7.0, 3.0])
            .with_column("patch", vec![70.0, 31.0, 71.0, 30.0, 70.0, 31.0])
            .with_column("strata", vec![70.0, 31.0, 71.0, 30.0, 70.0, 31.0])
    }

    fn matrix() -> LevelMatrix {
        let t = Template::from_parsed(&skeleton(1, vec![])).unwrap();
        LevelMatrix::derive(&table(), &t.boundaries).unwrap()
    }

    #[test]
    fn siblings_follow_first_occurrence_not_numeric_order() {
        let h = Hierarchy::derive(&matrix()).unwrap();
        let basin = h.children(h.world()).next().unwrap();
        let hill = h.children(basin).next().unwrap();
        let zones: Vec<i64> = h.children(hill).map(|z| z.id).collect();
        assert_eq!(zones, vec![7, 3]);
        let zone3 = h.children(hill).nth(1).unwrap();
        let patches: Vec<i64> = h.children(zone3).map(|p| p.id).collect();
        assert_eq!(patches, vec![31, 30]);
        assert_eq!(h.count_at(Level::Patch), 4);
    }

    #[test]
    fn groups_keep_cell_order_within_group() {
        let g = matrix().groups(Level::Patch);
        assert_eq!(g.len(), 4);
        assert_eq!(g.cells(&[1, 1, 1, 3, 31]).unwrap(), &[1, 5]);
        let first: Vec<&[i64]> = g.iter().map(|(k, _)| k).collect();
        assert_eq!(first[0], &[1, 1, 1, 7, 70]);
    }

    #[test]
    fn non_integral_level_id_is_fatal() {
        let t = Template::from_parsed(&skeleton(1, vec![])).unwrap();
        let bad = table().with_column("patch", vec![1.5, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let err = LevelMatrix::derive(&bad, &t.boundaries).unwrap_err();
        assert!(matches!(err, WorldgenError::InvalidId { row: 0, .. }), "{err}");
    }

    #[test]
    fn two_worlds_are_rejected() {
        let m = LevelMatrix::from_rows(vec![[1, 1, 1, 1, 1, 1], [2, 1, 1, 1, 1, 1]]);
        assert!(matches!(
            Hierarchy::derive(&m),
            Err(WorldgenError::MultipleWorlds { count: 2 })
        ));
    }

    #[test]
    fn constant_rule_source_fills_every_cell() {
        let m = matrix().with_rules(&table(), &IdSource::Constant(4)).unwrap();
        assert!((0..m.len()).all(|c| m.rule(c) == Some(4)));
    }
}
