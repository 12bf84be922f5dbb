//! Map pre-compiler
//!
//! Reads a map, runs the conditions over its instances, regenerates tiles
//! and outputs, and writes the styled map for the downstream compiler.
//! A map error aborts the compile and is written out as JSON for the
//! diagnostic viewer.

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod output;
pub mod pipeline;

pub use cli::Cli;
pub use config::{CompileConfig, SeedConfig};
pub use pipeline::{compile, Compiled, Inputs, RuleFile};
