//! Command-line interface for dissoc_de

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::error::Result;

#[derive(Parser)]
#[command(name = "dissoc_de")]
#[command(version)]
#[command(about = "Differential expression and GSEA for dissociation-effect RNA-seq comparisons")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// TOML run configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Comparison name; overrides `comparison.name`
    #[arg(long, value_name = "NAME")]
    pub comparison: Option<String>,

    /// Output root; overrides `paths.local_data`
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<PathBuf>,
}

impl ConfigArgs {
    /// Layered configuration with command-line overrides applied last
    pub fn load(&self) -> Result<Config> {
        let mut config: Config = Config::figment(&self.config).extract()?;
        if let Some(name) = &self.comparison {
            config.comparison.name = name.clone();
        }
        if let Some(out) = &self.out {
            config.paths.local_data = out.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Real bulk samples: numerator vs reference with size-factor normalization
    #[command(after_long_help = "\
Example:
  dissoc_de bulk -c dissoc.toml --comparison chunk_vs_dissociated")]
    Bulk {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Real samples plus pseudobulk columns with GC/length normalization
    #[command(after_long_help = "\
Example:
  dissoc_de pseudobulk -c dissoc.toml --comparison chunk_vs_pseudobulk")]
    Pseudobulk {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Gene-set enrichment on a persisted results table
    Gsea {
        #[command(flatten)]
        args: ConfigArgs,

        /// Gene-set collection; overrides `gsea.gmt`
        #[arg(long, value_name = "FILE")]
        gmt: Option<PathBuf>,
    },

    /// Top-gene tables and figures for a persisted comparison
    Report {
        #[command(flatten)]
        args: ConfigArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::try_parse_from([
            "dissoc_de", "-v", "gsea", "--comparison", "pb", "--gmt", "sets.gmt", "--out", "/tmp/o",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Gsea { args, gmt }) => {
                assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
                assert_eq!(args.comparison.as_deref(), Some("pb"));
                assert_eq!(gmt, Some(PathBuf::from("sets.gmt")));
                assert_eq!(args.out, Some(PathBuf::from("/tmp/o")));
            }
            _ => panic!("expected gsea"),
        }
    }

    #[test]
    fn overrides_applied_on_load() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "run.toml",
                r#"
                [[samples]]
                id = "S1"
                condition = "chunk"

                [comparison]
                name = "from_file"
                "#,
            )?;
            let args = ConfigArgs {
                config: PathBuf::from("run.toml"),
                comparison: Some("from_cli".into()),
                out: Some(PathBuf::from("elsewhere")),
            };
            let config = args.load().unwrap();
            assert_eq!(config.comparison.name, "from_cli");
            assert_eq!(config.paths.local_data, PathBuf::from("elsewhere"));
            Ok(())
        });
    }
}
