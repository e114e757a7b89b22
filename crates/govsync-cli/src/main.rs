use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use govsync_api::{DynRemoteApi, HttpRemoteApi};
use govsync_cli::apply::{self, ApplyOptions};
use govsync_cli::cli::{ApplyArgs, Cli, Commands, ValidateArgs};
use govsync_cli::config::{AppConfig, load_config};
use govsync_cli::manifest::Manifest;
use govsync_cli::observability;
use govsync_cli::output::{print_error, print_report, print_success, print_warning};
use govsync_engine::Engine;

#[tokio::main]
async fn main() {
    // Not an error if .env doesn't exist
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        print_warning(&format!("failed to load .env file: {e}"));
    }

    observability::init_tracing();

    let cli = Cli::parse();
    let cfg = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            print_error(&format!("configuration error: {e}"));
            std::process::exit(2);
        }
    };
    observability::apply_logging_level(&cfg.logging.level);

    let result = match &cli.command {
        Commands::Apply(args) => run_apply(&cfg, args).await,
        Commands::Validate(args) => run_validate(args),
    };
    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

async fn run_apply(cfg: &AppConfig, args: &ApplyArgs) -> Result<bool> {
    let manifest = Manifest::from_path(&args.manifest)?;

    let api: DynRemoteApi = if args.dry_run {
        println!("{}", "Dry run against an empty in-memory API".yellow());
        govsync_memory::create_memory_api()
    } else {
        let client = cfg
            .api
            .client_config()
            .map_err(anyhow::Error::msg)
            .context("invalid api settings")?;
        Arc::new(HttpRemoteApi::new(&client).context("failed to build HTTP client")?)
    };

    let engine = Engine::new(api, cfg.engine.clone());
    let session = engine.session();
    tracing::info!(session = %session.id(), manifest = %args.manifest.display(), "apply started");

    let cancel = session.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let options = ApplyOptions {
        fail_fast: args.fail_fast,
    };
    let report = apply::apply(&engine, &session, &manifest, options).await?;
    print_report(&report);

    if report.is_success() {
        print_success("all resources converged");
        Ok(true)
    } else {
        print_error(&format!("{} resource(s) did not converge", report.failures()));
        Ok(false)
    }
}

fn run_validate(args: &ValidateArgs) -> Result<bool> {
    let manifest = Manifest::from_path(&args.manifest)?;
    let waves = manifest.waves()?;
    for (number, wave) in waves.iter().enumerate() {
        let handles: Vec<&str> = wave
            .iter()
            .map(|&i| manifest.resources[i].handle.as_str())
            .collect();
        println!("{} {}: {}", "Wave".cyan(), number + 1, handles.join(", "));
    }
    print_success(&format!(
        "{} kinds, {} resources, {} waves",
        manifest.kinds.len(),
        manifest.resources.len(),
        waves.len()
    ));
    Ok(true)
}
