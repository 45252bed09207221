//! Worldfile generation: turns a parsed hierarchical template plus per-cell
//! raster values into the tab-indented world/basin/hillslope/zone/patch/stratum
//! parameter file read by the ecohydrological simulator.
pub mod aggregate;
pub mod aspatial;
pub mod cell_table;
pub mod error;
pub mod generator;
pub mod levels;
pub mod metadata;
pub mod template;
pub mod writer;

pub use error::{Result, WorldgenError};
pub use generator::{GenerateParams, WorldGenerator, WorldInputs};
