//! Worldfile generator: reads a parsed template, a per-cell table and an
//! optional aspatial rule set (all JSON) and writes the hierarchical worldfile.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tempfile::NamedTempFile;
use tracing::info;
use tracing_subscriber::EnvFilter;

use worldgen_core::aspatial::AspatialRuleSet;
use worldgen_core::cell_table::CellTable;
use worldgen_core::template::ParsedTemplate;
use worldgen_core::writer::{LogProgress, NoProgress, ProgressObserver};
use worldgen_core::{GenerateParams, WorldGenerator, WorldInputs};

#[derive(Parser, Debug)]
#[command(name = "worldgen", about = "Generate a hierarchical worldfile from a parsed template and cell table")]
struct Args {
    /// Parsed template JSON.
    #[arg(short, long)]
    template: PathBuf,

    /// Cell table JSON (one value per cell for every referenced map).
    #[arg(short, long)]
    cells: PathBuf,

    /// Aspatial rule set JSON.
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Worldfile to write.
    #[arg(short, long)]
    output: PathBuf,

    /// Also write the network-construction metadata as JSON here.
    #[arg(short, long)]
    metadata: Option<PathBuf>,

    /// Run options JSON (value_digits, aspatial, progress).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replace the output file if it already exists.
    #[arg(long)]
    overwrite: bool,

    /// Significant digits for emitted values (overrides the config file).
    #[arg(long)]
    digits: Option<usize>,

    /// Ignore the rule set and keep every patch spatial.
    #[arg(long)]
    no_aspatial: bool,

    /// Suppress per-basin progress reporting.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    run(Args::parse())
}

fn run(args: Args) -> Result<()> {
    // ── Input checks: everything here aborts before any computation ──────────
    let mut inputs = vec![&args.template, &args.cells];
    inputs.extend(args.rules.as_ref());
    inputs.extend(args.config.as_ref());
    for path in inputs {
        if !path.is_file() {
            bail!("input file not found: {}", path.display());
        }
    }
    if args.output.exists() && !args.overwrite {
        bail!(
            "output {} already exists; pass --overwrite to replace it",
            args.output.display()
        );
    }

    let params = load_params(&args)?;
    let template = ParsedTemplate::from_json(&read_text(&args.template)?)
        .with_context(|| format!("parsing {}", args.template.display()))?;
    let cells = CellTable::from_json(&read_text(&args.cells)?)
        .with_context(|| format!("parsing {}", args.cells.display()))?;
    let rules = match &args.rules {
        Some(path) => Some(
            AspatialRuleSet::from_json(&read_text(path)?)
                .with_context(|| format!("parsing {}", path.display()))?,
        ),
        None => None,
    };

    // ── Generate into a temporary file beside the output ─────────────────────
    let dir = match args.output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;

    let mut observer: Box<dyn ProgressObserver> = if params.progress {
        Box::new(LogProgress)
    } else {
        Box::new(NoProgress)
    };
    let inputs = WorldInputs {
        template: &template,
        cells: &cells,
        rules: rules.as_ref(),
    };
    let metadata = WorldGenerator::new(params)
        .generate(&inputs, BufWriter::new(tmp.as_file_mut()), observer.as_mut())
        .with_context(|| format!("generating {}", args.output.display()))?;

    // Only a complete run reaches the output path; on error the temp file is dropped.
    tmp.persist(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(output = %args.output.display(), "worldfile complete");

    if let Some(path) = &args.metadata {
        fs::write(path, serde_json::to_string_pretty(&metadata)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn load_params(args: &Args) -> Result<GenerateParams> {
    let mut params: GenerateParams = match &args.config {
        Some(path) => serde_json::from_str(&read_text(path)?)
            .with_context(|| format!("parsing {}", path.display()))?,
        None => GenerateParams::default(),
    };
    if let Some(digits) = args.digits {
        params.value_digits = digits;
    }
    if args.no_aspatial {
        params.aspatial = false;
    }
    if args.quiet {
        params.progress = false;
    }
    Ok(params)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
