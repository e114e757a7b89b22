use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "govsync")]
#[command(about = "Converge governance resources to a declared state")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to govsync.toml when present)
    #[arg(short, long, global = true, env = "GOVSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Converge every resource of a manifest
    Apply(ApplyArgs),
    /// Check a manifest without contacting the API
    Validate(ValidateArgs),
}

#[derive(clap::Args)]
pub struct ApplyArgs {
    /// Manifest file
    pub manifest: PathBuf,
    /// Run against an empty in-memory API instead of the configured endpoint
    #[arg(long)]
    pub dry_run: bool,
    /// Stop after the first wave that has a failing resource
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    /// Manifest file
    pub manifest: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "govsync",
            "--config",
            "prod.toml",
            "apply",
            "resources.toml",
            "--dry-run",
            "--fail-fast",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("prod.toml")));
        match cli.command {
            Commands::Apply(args) => {
                assert_eq!(args.manifest, PathBuf::from("resources.toml"));
                assert!(args.dry_run);
                assert!(args.fail_fast);
            }
            Commands::Validate(_) => panic!("expected apply"),
        }
    }

    #[test]
    fn test_validate_requires_manifest() {
        assert!(Cli::try_parse_from(["govsync", "validate"]).is_err());
    }
}
