//! edinet-xbrl CLI - Inspect EDINET filing archives

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser as ClapParser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use edinet_xbrl::{
    DocumentFormat, ExtractConfig, Extractor, FilingStatements, StatementData, StatementType, StatementValidator,
    Taxonomy,
};

/// Safe extraction and normalization of EDINET filing archives
#[derive(ClapParser)]
#[command(name = "edinet-xbrl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log pipeline progress
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract normalized statements from a filing archive
    Parse {
        /// Filing archive (zip)
        input: PathBuf,

        /// Statement to extract (bs, pl, cf, all)
        #[arg(short, long, default_value = "all")]
        statement: String,

        /// Reporting period end date (YYYY-MM-DD)
        #[arg(short, long)]
        period_end: NaiveDate,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also list unresolved raw facts
        #[arg(long)]
        raw: bool,

        /// Try the tabular extract before the XBRL instance
        #[arg(long)]
        tabular: bool,
    },

    /// List canonical labels of a statement
    Labels {
        /// Statement (bs, pl, cf)
        #[arg(short, long, default_value = "pl")]
        statement: String,

        /// Taxonomy file instead of the built-in table
        #[arg(short, long)]
        taxonomy: Option<PathBuf>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Run consistency checks on a filing archive
    Validate {
        /// Filing archive (zip)
        input: PathBuf,

        /// Reporting period end date (YYYY-MM-DD)
        #[arg(short, long)]
        period_end: NaiveDate,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Try the tabular extract before the XBRL instance
        #[arg(long)]
        tabular: bool,
    },

    /// Benchmark the extraction pipeline
    Bench {
        /// Filing archive (zip)
        input: PathBuf,

        /// Reporting period end date (YYYY-MM-DD)
        #[arg(short, long)]
        period_end: NaiveDate,

        /// Number of iterations
        #[arg(short, long, default_value = "20")]
        iterations: usize,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "edinet_xbrl=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn parse_statement(value: &str) -> Result<Option<StatementType>> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    value.parse::<StatementType>().map(Some).map_err(|e| anyhow!(e))
}

fn load_extractor(config: Option<&Path>, tabular: bool) -> Result<Extractor> {
    let mut config = match config {
        Some(path) => ExtractConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExtractConfig::default(),
    };
    if tabular {
        config = config.with_preference(DocumentFormat::Tabular);
    }
    Extractor::from_config(config).context("Failed to load taxonomy")
}

#[cfg(feature = "mmap")]
fn read_archive(path: &Path) -> Result<memmap2::Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    // SAFETY: the mapping is read-only and dropped before the command returns.
    let map = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("Failed to map {}", path.display()))?;
    Ok(map)
}

#[cfg(not(feature = "mmap"))]
fn read_archive(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_statement(data: &StatementData, raw: bool) {
    let source = data.source.as_deref().unwrap_or("-");
    println!("{} {} ({})", "■".cyan().bold(), data.statement, source.dimmed());
    if data.is_empty() {
        println!("  {}", "no line items".yellow());
    }
    for item in data.items() {
        let current = item.values.current().map(|v| v.to_string()).unwrap_or_default();
        let prior = item.values.prior().map(|v| v.to_string()).unwrap_or_default();
        println!("  {:<40} {:>20} {:>20}", item.label, current, prior);
    }
    println!(
        "  Items: {}  Raw facts: {}",
        data.len(),
        data.raw_items().len()
    );
    if raw {
        let used: std::collections::HashSet<usize> = data
            .items()
            .iter()
            .flat_map(|item| item.provenance.iter().copied())
            .collect();
        for (index, fact) in data.raw_items().iter().enumerate() {
            if !used.contains(&index) {
                println!(
                    "    {} {} [{}] {:?}",
                    "·".dimmed(),
                    fact.qualified_name(),
                    fact.context_ref,
                    fact.value
                );
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Parse {
            input,
            statement,
            period_end,
            json,
            config,
            raw,
            tabular,
        } => {
            let statement = parse_statement(&statement)?;
            let extractor = load_extractor(config.as_deref(), tabular)?;
            let bytes = read_archive(&input)?;

            let start = Instant::now();
            match statement {
                Some(statement) => {
                    let data = extractor
                        .extract(&bytes, statement, period_end)
                        .with_context(|| format!("Failed to extract {}", input.display()))?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&data)?);
                    } else {
                        println!("{} {}", "✓".green().bold(), input.display());
                        print_statement(&data, raw);
                    }
                }
                None => {
                    let filing = extractor
                        .extract_all(&bytes, period_end)
                        .with_context(|| format!("Failed to extract {}", input.display()))?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&filing)?);
                    } else {
                        println!(
                            "{} {} [{}]",
                            "✓".green().bold(),
                            input.display(),
                            filing.standard
                        );
                        for statement in StatementType::ALL {
                            print_statement(filing.statement(statement), raw);
                        }
                    }
                }
            }
            if !json {
                println!("  Time: {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
            }
        }

        Commands::Labels {
            statement,
            taxonomy,
            json,
        } => {
            let statement = parse_statement(&statement)?
                .ok_or_else(|| anyhow!("labels needs a single statement (bs, pl, cf)"))?;
            let taxonomy = match &taxonomy {
                Some(path) => Taxonomy::from_path(path)
                    .with_context(|| format!("Failed to load taxonomy {}", path.display()))?,
                None => Taxonomy::builtin()?,
            };
            let labels = taxonomy.labels(statement);
            if json {
                println!("{}", serde_json::to_string_pretty(&labels)?);
            } else {
                for label in labels {
                    println!(
                        "  {:<45} {:<35} {}",
                        label.id,
                        label.label,
                        label.label_en.unwrap_or("").dimmed()
                    );
                }
            }
        }

        Commands::Validate {
            input,
            period_end,
            config,
            strict,
            tabular,
        } => {
            let extractor = load_extractor(config.as_deref(), tabular)?;
            let bytes = read_archive(&input)?;
            let filing: FilingStatements = extractor
                .extract_all(&bytes, period_end)
                .with_context(|| format!("Failed to extract {}", input.display()))?;

            let validator = if strict {
                StatementValidator::new().strict()
            } else {
                StatementValidator::new()
            };
            let report = validator
                .validate(&filing)
                .with_context(|| format!("Strict validation failed for {}", input.display()))?;
            if report.is_clean() {
                println!(
                    "{} {} - Statements are consistent",
                    "✓".green().bold(),
                    input.display()
                );
            } else {
                println!(
                    "{} {} - {} warning(s)",
                    "!".yellow().bold(),
                    input.display(),
                    report.warnings.len()
                );
                for warning in &report.warnings {
                    println!("  {} {}", "WARNING:".yellow(), warning);
                }
            }
        }

        Commands::Bench {
            input,
            period_end,
            iterations,
        } => {
            let extractor = load_extractor(None, false)?;
            let bytes = read_archive(&input)?;
            let iterations = iterations.max(1);

            // Warmup
            for _ in 0..3 {
                let _ = extractor.extract_all(&bytes, period_end)?;
            }

            let mut times = Vec::with_capacity(iterations);
            let mut items = 0;
            for _ in 0..iterations {
                let start = Instant::now();
                let filing = extractor.extract_all(&bytes, period_end)?;
                times.push(start.elapsed());
                items = StatementType::ALL
                    .iter()
                    .map(|&s| filing.statement(s).len())
                    .sum();
            }

            times.sort();
            let min = times[0];
            let max = times[times.len() - 1];
            let median = times[times.len() / 2];
            let mean = times.iter().sum::<std::time::Duration>() / times.len() as u32;

            println!("Benchmark Results for {}", input.display());
            println!("  Iterations: {}", iterations);
            println!("  Line items: {}", items);
            println!("  Min:    {:.3}ms", min.as_secs_f64() * 1000.0);
            println!("  Median: {:.3}ms", median.as_secs_f64() * 1000.0);
            println!("  Mean:   {:.3}ms", mean.as_secs_f64() * 1000.0);
            println!("  Max:    {:.3}ms", max.as_secs_f64() * 1000.0);
        }
    }

    Ok(())
}
