//! forge - Main entry point
//!
//! Thin shell over the library: parse arguments, load the template, run the
//! pipeline, report. All filesystem work lives in `forge::pipeline`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use forge::cli::{Cli, Commands};
use forge::{ConsoleProgress, IoMode, Pipeline, RunConfig, Template};

/// Initialize tracing; RUST_LOG overrides the default level
fn init_logging(verbose: bool) {
    let default_level = if verbose { "forge=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);
    debug!("CLI arguments parsed");

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Validate { template } => {
            let loaded = load_template(&template)?;
            println!("✓ Template is valid: {}", loaded.name);
            Ok(())
        }
        Commands::Init {
            template, target, ..
        } => {
            let loaded = load_template(&template)?;
            let root = forge::template::template_root(&template);
            info!(template = %loaded.name, target_dir = %target.display(), "materializing template");

            println!("Creating project from template '{}'", loaded.name);
            let config = RunConfig::materialize().with_env_overrides();
            Pipeline::new(&loaded, root, config)
                .materialize(&target, &mut ConsoleProgress)
                .with_context(|| format!("failed to create project in {}", target.display()))?;

            println!("\n✓ Project created successfully in {}", target.display());
            Ok(())
        }
        Commands::Test {
            template,
            interactive,
        } => {
            let loaded = load_template(&template)?;
            let root = forge::template::template_root(&template);
            let mode = if interactive {
                IoMode::Attached
            } else {
                IoMode::Captured
            };
            info!(template = %loaded.name, %mode, "testing template");

            println!("Testing template '{}'", loaded.name);
            let config = RunConfig::inspect().with_mode(mode).with_env_overrides();
            let report = Pipeline::new(&loaded, root, config)
                .inspect(&mut ConsoleProgress)
                .context("template test failed")?;

            println!("\n✓ Template test completed successfully");
            println!("Inspect the result with: ls -la {}", report.workspace.display());
            Ok(())
        }
    }
}

fn load_template(path: &Path) -> Result<Template> {
    Template::load_from_file(path)
        .with_context(|| format!("failed to load template from {}", path.display()))
}
