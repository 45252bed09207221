//! Fatal error taxonomy for a worldfile generation run.
//!
//! Every variant aborts the whole run. The only recoverable condition, an
//! unrecognized operator keyword, never reaches this type: it is logged and
//! the offending line is skipped.

use crate::template::Level;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorldgenError>;

#[derive(Debug, thiserror::Error)]
pub enum WorldgenError {
    // ── Input errors ────────────────────────────────────────────────────────
    #[error("cell table has no column named `{name}`")]
    MissingColumn { name: String },

    #[error("cell table column `{name}` has {found} cells, expected {expected}")]
    ColumnLength {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("cell table is empty")]
    EmptyCellTable,

    #[error("cell {row}: `{column}` value {value} is not an integer id")]
    InvalidId { column: String, row: usize, value: f64 },

    #[error("cell table spans {count} world ids; a worldfile holds exactly one world")]
    MultipleWorlds { count: usize },

    #[error("invalid input: {0}")]
    Json(#[from] serde_json::Error),

    // ── Template semantic errors ────────────────────────────────────────────
    #[error("template structure: {reason}")]
    TemplateStructure { reason: String },

    #[error("template line {line} (`{name}`): literal `{literal}` is not numeric")]
    NonNumericLiteral {
        line: usize,
        name: String,
        literal: String,
    },

    #[error("template line {line} (`{name}`): {reason}")]
    InvalidOperands {
        line: usize,
        name: String,
        reason: String,
    },

    #[error("variable `{name}` has no value for group {key:?}")]
    MissingGroup { name: String, key: Vec<i64> },

    // ── Aspatial consistency errors ─────────────────────────────────────────
    #[error("patch {patch}: cells reference several aspatial rules {rules:?}")]
    AmbiguousRule { patch: i64, rules: Vec<i64> },

    #[error("patch {patch}: aspatial rule {rule} is not defined in the rule set")]
    UnknownRule { patch: i64, rule: i64 },

    #[error("patch {patch}: aspatial rule {rule} defines no families")]
    EmptyRule { patch: i64, rule: i64 },

    #[error("unit id {id} is too large to derive a {level} id from")]
    IdOverflow { id: i64, level: Level },

    #[error("rule {rule}, family {family}: `{name}` is blank and has no template default")]
    MissingOverride {
        rule: i64,
        family: usize,
        name: String,
    },

    // ── Output sink ─────────────────────────────────────────────────────────
    #[error("writing worldfile: {0}")]
    Io(#[from] std::io::Error),
}
