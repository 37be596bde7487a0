use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// forge - Materialize project templates through a staging workspace
#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Build a project from a template in a temporary workspace, then commit it")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Materialize a template into a target directory
    Init {
        /// Template directory or path to its template.json
        template: PathBuf,

        /// Directory to create (must be absent or empty)
        #[arg(default_value = ".")]
        target: PathBuf,

        /// Accepted for symmetry with `test`; commands are always attached to the terminal here
        #[arg(short, long)]
        interactive: bool,
    },
    /// Run a template in a workspace and keep it for inspection, without committing
    Test {
        /// Template directory or path to its template.json
        template: PathBuf,

        /// Attach commands to the terminal instead of capturing their output
        #[arg(short, long)]
        interactive: bool,
    },
    /// Validate a template manifest
    Validate {
        /// Template directory or path to its template.json
        template: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
