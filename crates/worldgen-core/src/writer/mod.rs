//! Worldfile writer: one depth-first pass over the resolved [`Block`] tree.
//!
//! Layout (depth d = d leading tabs):
//! ```text
//! 1	world_id
//! 1	num_basins
//! 	11	basin_ID
//! 	<value>	<basin variable>
//! 	2	num_hillslopes
//! 		...
//! ```
//! Each unit emits its ID line, its variable lines, then the count of its
//! children at its own depth; children follow one level deeper.
pub mod block;

use std::io::Write;

use tracing::info;

use crate::error::Result;
use crate::template::Level;
pub use block::{Assembler, Block, Line};

/// Default number of significant digits for emitted values.
pub const DEFAULT_VALUE_DIGITS: usize = 8;

/// Notified after each top-level unit (basin) has been written.
pub trait ProgressObserver {
    fn unit_written(&mut self, level: Level, done: usize, total: usize);
}

/// Ignores progress.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn unit_written(&mut self, _level: Level, _done: usize, _total: usize) {}
}

/// Reports progress through `tracing`.
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn unit_written(&mut self, level: Level, done: usize, total: usize) {
        info!(%level, done, total, "worldfile progress");
    }
}

/// Format a value with at most `digits` significant digits. Integral values
/// print without a fractional part.
pub fn format_value(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let rounded: f64 = format!("{:.*e}", digits.max(1) - 1, value)
        .parse()
        .unwrap_or(value);
    if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

/// Streams a [`Block`] tree into a sink. Holds the sink for the whole pass.
pub struct WorldfileWriter<W: Write> {
    sink: W,
    digits: usize,
}

impl<W: Write> WorldfileWriter<W> {
    pub fn new(sink: W, digits: usize) -> Self {
        Self { sink, digits }
    }

    /// Write the whole world and flush the sink.
    pub fn write(&mut self, world: &Block, observer: &mut dyn ProgressObserver) -> Result<()> {
        self.id_line(0, world.id, world.level)?;
        for line in &world.lines {
            self.value_line(0, line)?;
        }
        self.count_line(0, world.children.len(), Level::Basin)?;

        let total = world.children.len();
        for (i, basin) in world.children.iter().enumerate() {
            self.block(basin, 1)?;
            observer.unit_written(Level::Basin, i + 1, total);
        }
        self.sink.flush()?;
        Ok(())
    }

    /// Consume the writer, returning the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn block(&mut self, block: &Block, depth: usize) -> Result<()> {
        self.id_line(depth, block.id, block.level)?;
        for line in &block.lines {
            self.value_line(depth, line)?;
        }
        if let Some(child) = block.level.child() {
            self.count_line(depth, block.children.len(), child)?;
            for c in &block.children {
                self.block(c, depth + 1)?;
            }
        }
        Ok(())
    }

    fn id_line(&mut self, depth: usize, id: i64, level: Level) -> Result<()> {
        self.raw(depth, &id.to_string(), level.id_label())
    }

    fn count_line(&mut self, depth: usize, count: usize, child: Level) -> Result<()> {
        self.raw(depth, &count.to_string(), child.count_label())
    }

    fn value_line(&mut self, depth: usize, line: &Line) -> Result<()> {
        let value = format_value(line.value, self.digits);
        self.raw(depth, &value, &line.name)
    }

    fn raw(&mut self, depth: usize, value: &str, name: &str) -> Result<()> {
        for _ in 0..depth {
            self.sink.write_all(b"\t")?;
        }
        writeln!(self.sink, "{value}\t{name}")?;
        Ok(())
    }
}
