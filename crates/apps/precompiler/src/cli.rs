//! Command line arguments

use clap::Parser;
use std::path::{Path, PathBuf};

/// File name for diagnostics when `--diagnostics` is not given
pub const DEFAULT_DIAGNOSTICS: &str = "compile_error.json";

#[derive(Debug, Parser)]
#[command(name = "precompiler")]
#[command(about = "Run the map conditions and write the styled map", long_about = None)]
pub struct Cli {
    /// Map to compile
    pub map: PathBuf,

    /// Where to write the result [default: <map dir>/styled/<map file>]
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Compile configuration (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Rules file; may be given several times and loads in order
    #[arg(short, long)]
    pub rules: Vec<PathBuf>,

    /// Map holding template brushes and entities
    #[arg(short, long)]
    pub templates: Option<PathBuf>,

    /// Where a map error is written for the viewer [default: <map dir>/compile_error.json]
    #[arg(short, long)]
    pub diagnostics: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn output_path(&self) -> PathBuf {
        match &self.out {
            Some(path) => path.clone(),
            None => default_output(&self.map),
        }
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        match &self.diagnostics {
            Some(path) => path.clone(),
            None => map_dir(&self.map).join(DEFAULT_DIAGNOSTICS),
        }
    }
}

fn map_dir(map: &Path) -> &Path {
    map.parent().unwrap_or_else(|| Path::new(""))
}

/// `<map dir>/styled/<map file>`
pub fn default_output(map: &Path) -> PathBuf {
    let mut out = map_dir(map).join("styled");
    if let Some(name) = map.file_name() {
        out.push(name);
    }
    out
}
