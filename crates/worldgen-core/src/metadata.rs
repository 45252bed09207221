//! Metadata handed to the downstream flow-network construction step.

use serde::{Deserialize, Serialize};

use crate::aspatial::AspatialRuleSet;
use crate::cell_table::CellTable;
use crate::template::{IdSource, Template};

/// A cell-table map referenced by the template, with the role it plays:
/// a level name (`basin`, `patch`, ...) or the variable that reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapReference {
    pub role: String,
    pub map: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInputs {
    pub maps: Vec<MapReference>,
    /// Cell side length (the cell width).
    pub cell_length: f64,
    // Auxiliary feature maps; filled in by the network step, unknown here.
    pub streams: Option<String>,
    pub roads: Option<String>,
    pub impervious: Option<String>,
    pub roofs: Option<String>,
    /// Rule set used for aspatial expansion, if expansion ran.
    pub aspatial_rules: Option<AspatialRuleSet>,
}

impl NetworkInputs {
    pub fn new(template: &Template, cells: &CellTable, aspatial_rules: Option<AspatialRuleSet>) -> Self {
        let mut maps: Vec<MapReference> = Vec::new();
        let mut add = |role: String, map: &str| {
            if !maps.iter().any(|m| m.role == role && m.map == map) {
                maps.push(MapReference { role, map: map.to_string() });
            }
        };
        for marker in template.boundaries.iter() {
            if let IdSource::Map(m) = &marker.source {
                add(marker.level.to_string(), m);
            }
        }
        for def in &template.variables {
            if let Some(m) = def.aggregation.map() {
                add(def.name.clone(), m);
            }
        }

        Self {
            maps,
            cell_length: cells.cell_width,
            streams: None,
            roads: None,
            impervious: None,
            roofs: None,
            aspatial_rules,
        }
    }
}
