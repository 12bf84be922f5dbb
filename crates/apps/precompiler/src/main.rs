use anyhow::Context;
use clap::Parser;
use precompiler::{compile, diagnostics, output, Cli, CompileConfig, Inputs};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let loaded = load(&cli);
    let (config, inputs) = match loaded {
        Ok(loaded) => loaded,
        Err(err) => {
            let user = diagnostics::configuration_error(&err);
            diagnostics::write_user_error(&cli.diagnostics_path(), &user)?;
            return Err(err);
        }
    };
    info!(map = %cli.map.display(), rules = inputs.rules.len(), "Compiling");

    let compiled = match compile(inputs, &config) {
        Ok(compiled) => compiled,
        Err(err) => {
            diagnostics::report_compile_error(&cli.diagnostics_path(), &err)?;
            return Err(err).context("Compile failed");
        }
    };

    let out = cli.output_path();
    output::write_atomic(&out, compiled.vmf.serialize().as_bytes())?;
    info!(
        out = %out.display(),
        results = compiled.results,
        relays = compiled.relays,
        "Wrote styled map"
    );
    Ok(())
}

fn load(cli: &Cli) -> anyhow::Result<(CompileConfig, Inputs)> {
    let config = match &cli.config {
        Some(path) => CompileConfig::load(path)?,
        None => CompileConfig::default(),
    };
    let inputs = Inputs::load(&cli.map, cli.rules.as_slice(), cli.templates.as_deref())?;
    Ok((config, inputs))
}
