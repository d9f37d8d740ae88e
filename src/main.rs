//! dissoc_de command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use dissoc_de::cli::{Cli, Commands};
use dissoc_de::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Bulk { args }) => args.load().and_then(|config| run_bulk(&config, false)),
        Some(Commands::Pseudobulk { args }) => args.load().and_then(|config| run_bulk(&config, true)),
        Some(Commands::Gsea { args, gmt }) => args.load().and_then(|mut config| {
            if gmt.is_some() {
                config.gsea.gmt = gmt;
            }
            run_gsea_command(&config)
        }),
        Some(Commands::Report { args }) => args.load().and_then(|config| {
            let report = run_report(&config, &config.comparison.name)?;
            info!("Wrote {} report files to {}", report.files.len(), report.dir.display());
            Ok(())
        }),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_no_args() {
    println!("dissoc_de v{}", VERSION);
    println!("Run `dissoc_de -h` for usage or `dissoc_de <COMMAND> --help` for command options.");
}

fn run_bulk(config: &Config, pseudobulk: bool) -> Result<()> {
    let outcome = if pseudobulk {
        run_pseudobulk_comparison(config)?
    } else {
        run_bulk_comparison(config)?
    };
    info!(
        "{}: {} genes kept, {} removed by the total-read filter",
        outcome.comparison, outcome.filter.kept, outcome.filter.dropped
    );
    for (res, dir) in outcome.results.iter().zip(&outcome.results_dirs) {
        let summary = res.summary();
        info!(
            "FDR {}: {} significant ({} up, {} down) -> {}",
            summary.alpha,
            summary.significant,
            summary.upregulated,
            summary.downregulated,
            dir.display()
        );
    }
    Ok(())
}

fn run_gsea_command(config: &Config) -> Result<()> {
    let comparison = &config.comparison.name;
    let res = run_enrichment(config, comparison)?;
    let significant = res.rows.iter().filter(|r| r.padj < config.gsea.alpha).count();
    info!(
        "{}: {} gene sets tested, {} with padj < {}; tables in {}",
        comparison,
        res.len(),
        significant,
        config.gsea.alpha,
        config.gsea_dir(comparison).display()
    );
    Ok(())
}
