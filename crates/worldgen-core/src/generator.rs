//! Pipeline orchestrator: runs every worldfile generation stage in order.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::aspatial::{rule_source, AspatialExpander, AspatialRuleSet, RULE_VARIABLE};
use crate::cell_table::CellTable;
use crate::error::Result;
use crate::levels::{Hierarchy, LevelMatrix};
use crate::metadata::NetworkInputs;
use crate::template::{Level, ParsedTemplate, Template};
use crate::writer::{Assembler, ProgressObserver, WorldfileWriter, DEFAULT_VALUE_DIGITS};

// ── Public structs ────────────────────────────────────────────────────────────

/// Run options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateParams {
    /// Significant digits for emitted values.
    pub value_digits: usize,
    /// Expand patches into aspatial families when a rule set is supplied.
    pub aspatial: bool,
    /// Report per-basin progress.
    pub progress: bool,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            value_digits: DEFAULT_VALUE_DIGITS,
            aspatial: true,
            progress: true,
        }
    }
}

/// The three externally prepared inputs of a run.
#[derive(Debug, Clone, Copy)]
pub struct WorldInputs<'a> {
    pub template: &'a ParsedTemplate,
    pub cells: &'a CellTable,
    pub rules: Option<&'a AspatialRuleSet>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct WorldGenerator {
    params: GenerateParams,
}

impl WorldGenerator {
    pub fn new(params: GenerateParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GenerateParams {
        &self.params
    }

    /// Run the full pipeline and write the worldfile into `sink`.
    ///
    /// Pipeline order:
    ///   1. Template boundaries and variable definitions
    ///   2. Input checks (every referenced map present, equal column lengths)
    ///   3. Level matrix (+ rule column when aspatial expansion is active)
    ///   4. Hierarchy
    ///   5. Aggregation
    ///   6. Aspatial rule resolution
    ///   7. Block assembly
    ///   8. Write
    ///
    /// Any error aborts the run; whatever reached `sink` must then be discarded.
    pub fn generate<W: Write>(
        &self,
        inputs: &WorldInputs<'_>,
        sink: W,
        observer: &mut dyn ProgressObserver,
    ) -> Result<NetworkInputs> {
        // ── 1. Template ─────────────────────────────────────────────────────
        let template = Template::from_parsed(inputs.template)?;
        debug!(
            variables = template.variables.len(),
            strata = template.boundaries.stratum_count(),
            "template resolved"
        );

        // ── 2. Input checks ─────────────────────────────────────────────────
        inputs.cells.validate()?;
        for map in template.referenced_maps() {
            inputs.cells.column(&map)?;
        }

        // ── 3. Level matrix ─────────────────────────────────────────────────
        let mut matrix = LevelMatrix::derive(inputs.cells, &template.boundaries)?;
        let rules = self.active_rules(&template, inputs.rules);
        if let (Some(rules), Some(def)) = (rules, template.patch_variable(RULE_VARIABLE)) {
            matrix = matrix.with_rules(inputs.cells, &rule_source(def)?)?;
            info!(rules = rules.rules.len(), "aspatial patch expansion enabled");
        }

        // ── 4. Hierarchy ────────────────────────────────────────────────────
        let hierarchy = Hierarchy::derive(&matrix)?;
        info!(
            cells = matrix.len(),
            basins = hierarchy.count_at(Level::Basin),
            patches = hierarchy.count_at(Level::Patch),
            "level hierarchy derived"
        );

        // ── 5. Aggregation ──────────────────────────────────────────────────
        let aggregates = aggregate(&template, &matrix, inputs.cells)?;

        // ── 6. Aspatial rules ───────────────────────────────────────────────
        let expander = match rules {
            Some(rules) => Some(AspatialExpander::new(&template, &aggregates, rules, &matrix)?),
            None => None,
        };

        // ── 7. Assembly ─────────────────────────────────────────────────────
        let world = Assembler::new(&template, &hierarchy, &aggregates, expander.as_ref()).assemble()?;

        // ── 8. Write ────────────────────────────────────────────────────────
        WorldfileWriter::new(sink, self.params.value_digits).write(&world, observer)?;
        info!(patches = world.count_at(Level::Patch), "worldfile written");

        Ok(NetworkInputs::new(&template, inputs.cells, rules.cloned()))
    }

    /// The rule set, when aspatial expansion applies to this run.
    fn active_rules<'r>(&self, template: &Template, rules: Option<&'r AspatialRuleSet>) -> Option<&'r AspatialRuleSet> {
        let rules = rules?;
        if !self.params.aspatial {
            debug!("aspatial expansion disabled by configuration");
            return None;
        }
        if template.patch_variable(RULE_VARIABLE).is_none() {
            warn!("rule set supplied but the template declares no patch-level `{RULE_VARIABLE}`; expansion skipped");
            return None;
        }
        Some(rules)
    }
}

impl Default for WorldGenerator {
    fn default() -> Self {
        Self::new(GenerateParams::default())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
