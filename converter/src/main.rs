use anyhow::Context;
use clap::{Arg, ArgAction, Command, value_parser};
use common::config::Settings;
use converter::processor::{Codec, ConvertConfig};
use converter::services::RunReport;
use converter::storage::StorageLocation;
use std::process;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("docket-cli")
        .version("1.0")
        .about("Converts regulatory docket JSON into per-docket parquet tables")
        .arg(
            Arg::new("data_path")
                .required(true)
                .value_name("PATH")
                .help("Source root, a local directory or s3://bucket/prefix"),
        )
        .arg(
            Arg::new("output_path")
                .short('o')
                .long("output-path")
                .value_name("PATH")
                .help("Output root; defaults to <PATH>/derived-data"),
        )
        .arg(
            Arg::new("agency")
                .short('a')
                .long("agency")
                .value_name("CODE")
                .help("Only convert dockets of this agency"),
        )
        .arg(
            Arg::new("docket_pattern")
                .short('p')
                .long("docket-pattern")
                .value_name("GLOB")
                .help("Only convert dockets whose id matches, e.g. CMS-2025-*"),
        )
        .arg(
            Arg::new("compression")
                .long("compression")
                .value_parser(Codec::NAMES)
                .default_value("snappy")
                .help("Parquet compression codec"),
        )
        .arg(
            Arg::new("concurrency")
                .short('j')
                .long("concurrency")
                .value_parser(value_parser!(usize))
                .help("Dockets converted at the same time"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Sets a custom config file"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Informational logging"),
        )
}

fn init_logging(debug: bool, verbose: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();
}

fn print_summary(report: &RunReport) {
    println!();
    if report.stats.interrupted {
        println!("Conversion interrupted");
    }
    println!("Conversion summary: {}", report.stats);
    for (docket, reason) in &report.failed_dockets {
        println!("  failed {}: {}", docket, reason);
    }
    if let Some(e) = &report.fatal {
        println!("Aborted on fatal error: {}", e);
    } else if report.stats.errored > report.error_tolerance {
        println!(
            "{} dockets failed, tolerance is {}",
            report.stats.errored, report.error_tolerance
        );
    }
}

async fn run(matches: clap::ArgMatches) -> anyhow::Result<bool> {
    let settings = Settings::new(matches.get_one::<String>("config").map(String::as_str))
        .context("failed to load settings")?;

    let source = matches
        .get_one::<String>("data_path")
        .context("missing data path")?;
    let mut config = ConvertConfig::new(StorageLocation::parse(source)?);
    if let Some(output) = matches.get_one::<String>("output_path") {
        config = config.with_output(StorageLocation::parse(output)?);
    }
    if let Some(agency) = matches.get_one::<String>("agency") {
        config = config.with_agency(agency.as_str());
    }
    if let Some(pattern) = matches.get_one::<String>("docket_pattern") {
        config = config.with_docket_pattern(pattern.as_str());
    }
    if let Some(codec) = matches.get_one::<String>("compression") {
        config = config.with_codec(codec.parse()?);
    }
    if let Some(concurrency) = matches.get_one::<usize>("concurrency") {
        config = config.with_concurrency(*concurrency);
    }

    println!("Converting dockets from {}", config.source);
    println!("Writing parquet tables to {}", config.output_root());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, waiting for in-flight dockets...");
            let _ = cancel_tx.send(true);
        }
    });

    let report = converter::run_conversion(&config, &settings, cancel_rx)
        .await
        .context("conversion failed")?;
    print_summary(&report);
    Ok(report.is_success())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("debug"), matches.get_flag("verbose"));

    match run(matches).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Docket conversion error: {:#}", e);
            process::exit(1);
        }
    }
}
