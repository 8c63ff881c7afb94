//! Promo Index CLI - build code indexes ahead of a deployment and check codes.
//!
//! `build` warms every index (and bloom prefilter) so the service starts on
//! the reuse path. `check` reports the verdict a request handler would get.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use promo_index::{config::split_csv, promo_files_from_env, IndexConfig, PromoValidator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "promo-index")]
#[command(about = "Build promo code indexes and check codes against them")]
struct Args {
    /// Comma-separated promo files (defaults to $PROMO_FILES)
    #[arg(long, global = true)]
    files: Option<String>,

    /// Maximum number of indexes built concurrently
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Skip building bloom prefilters
    #[arg(long, global = true)]
    no_prefilter: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build or reuse every index, then exit
    Build,
    /// Print the verdict for each code
    Check {
        /// Codes to check
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let files: Vec<PathBuf> = match args.files.as_deref() {
        Some(raw) => split_csv(raw),
        None => promo_files_from_env(),
    };
    if files.is_empty() {
        bail!("no promo files given; pass --files or set PROMO_FILES");
    }

    let mut config = IndexConfig::from_env();
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    if args.no_prefilter {
        config.enable_prefilter = false;
    }

    let validator = PromoValidator::open(&files, &config).await?;

    let outcome = match args.command {
        Command::Build => {
            for store in validator.index().stores() {
                info!(
                    "{}: {} codes ({})",
                    store.source_path().display(),
                    store.record_count(),
                    if store.was_reused() { "reused" } else { "built" }
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { codes } => check(&validator, &codes),
    };

    validator.close();
    outcome
}

fn check(validator: &PromoValidator, codes: &[String]) -> Result<ExitCode> {
    for code in codes {
        let verdict = validator.validate(code)?;
        println!("{}\t{:?}", code.trim(), verdict);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_with_files() {
        let args = Args::try_parse_from([
            "promo-index",
            "check",
            "--files",
            "/a, /b,/c",
            "happyhrs",
            "FIFTYOFF",
        ])
        .unwrap();

        assert_eq!(args.files.as_deref().map(split_csv).map(|f| f.len()), Some(3));
        match args.command {
            Command::Check { codes } => assert_eq!(codes, vec!["happyhrs", "FIFTYOFF"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_build_flags() {
        let args =
            Args::try_parse_from(["promo-index", "--no-prefilter", "--workers", "2", "build"])
                .unwrap();

        assert!(args.no_prefilter);
        assert_eq!(args.workers, Some(2));
        assert!(args.files.is_none());
        assert!(matches!(args.command, Command::Build));
    }

    #[test]
    fn test_check_requires_codes() {
        assert!(Args::try_parse_from(["promo-index", "check"]).is_err());
    }
}
