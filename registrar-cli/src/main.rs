//! Registrar — offline tooling for container registry policies.
//!
//! # Usage
//!
//! ```text
//! registrar policies [--json]
//! registrar render --policy <name> --containers <file> [--config <file>] [--json]
//! registrar check <dir>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, policies::PoliciesArgs, render::RenderArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "registrar",
    version,
    about = "Inspect and dry-run registrar service discovery policies",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the builtin policies and their config schemas.
    Policies(PoliciesArgs),

    /// Evaluate a policy against container inspect documents.
    Render(RenderArgs),

    /// Validate a static policy configuration directory.
    Check(CheckArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Policies(args) => args.run(),
        Commands::Render(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
