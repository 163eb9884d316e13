use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use paperclaw::config::{find_config_file, load_config, write_default_config, Config};
use paperclaw::models::{BatchSummary, Identifier, ItemStatus};
use paperclaw::retrieval::{export_identifiers, BatchCoordinator, BatchOptions, Retriever};
use paperclaw::sources::SourceRegistry;
use paperclaw::utils::HttpClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Locate and download scholarly PDFs through a prioritized chain of
/// upstream sources.
#[derive(Parser, Debug)]
#[command(name = "paperclaw")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Download scholarly PDFs by DOI, preprint ID or title", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a single paper by DOI, preprint ID or title
    #[command(alias = "f")]
    Fetch {
        /// The identifier: a DOI in any common form, an arXiv ID, or a title
        identifier: String,

        /// Output directory (overrides the config file)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Fetch every identifier listed in a file, one per line
    #[command(alias = "b")]
    Batch {
        /// Newline-delimited identifier list; `#` starts a comment
        file: PathBuf,

        /// Output directory (overrides the config file)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Concurrent identifiers in flight (overrides the config file)
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,

        /// Re-download identifiers already present in the output directory
        #[arg(long)]
        no_skip_existing: bool,

        /// Abort the batch after this many seconds
        #[arg(long)]
        deadline: Option<u64>,
    },

    /// Write the list of successfully downloaded identifiers
    Export {
        /// Output directory of a previous run
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Destination file
        #[arg(long, short, default_value = "identifiers.txt")]
        dest: PathBuf,
    },

    /// List the configured source chain
    Sources,

    /// Write a commented starter configuration file
    ConfigInit {
        /// Destination path
        #[arg(default_value = "paperclaw.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("loading configuration")?;

    // Precedence: RUST_LOG, then -q/-v flags, then [logging] level.
    let log_level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = if cli.quiet { "error" } else { log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("paperclaw={env_filter}")),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.config.is_none() {
        if let Some(found) = find_config_file() {
            tracing::debug!("using config file: {}", found.display());
        }
    }

    match cli.command {
        Commands::Fetch { identifier, output } => {
            let summary = run_batch(
                &config,
                vec![identifier],
                output,
                None,
                false,
                None,
                cli.quiet,
            )
            .await?;
            finish(summary, cli.quiet)
        }
        Commands::Batch {
            file,
            output,
            concurrency,
            no_skip_existing,
            deadline,
        } => {
            let raw = read_identifier_file(&file)?;
            let summary = run_batch(
                &config,
                raw,
                output,
                concurrency,
                no_skip_existing,
                deadline.map(Duration::from_secs),
                cli.quiet,
            )
            .await?;
            finish(summary, cli.quiet)
        }
        Commands::Export { output, dest } => {
            let dir = output.unwrap_or_else(|| config.downloads.output_dir.clone());
            let count = export_identifiers(&dir, &dest)
                .await
                .context("exporting identifiers")?;
            if !cli.quiet {
                println!("exported {count} identifiers to {}", dest.display());
            }
            Ok(())
        }
        Commands::Sources => {
            print_sources(&config)?;
            Ok(())
        }
        Commands::ConfigInit { path } => {
            if path.exists() {
                anyhow::bail!("{} already exists, not overwriting", path.display());
            }
            write_default_config(&path).context("writing starter config")?;
            if !cli.quiet {
                println!("wrote {}", path.display());
            }
            Ok(())
        }
    }
}

fn read_identifier_file(path: &PathBuf) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading identifier list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Resolve identifiers, wire up cancellation, and run the batch.
/// Rejected identifiers (denylisted DOIs, empty lines) never reach the
/// retriever.
#[allow(clippy::too_many_arguments)]
async fn run_batch(
    config: &Config,
    raw: Vec<String>,
    output: Option<PathBuf>,
    concurrency: Option<usize>,
    no_skip_existing: bool,
    deadline: Option<Duration>,
    quiet: bool,
) -> Result<BatchSummary> {
    let mut identifiers = Vec::with_capacity(raw.len());
    let mut rejected = 0usize;
    for input in raw {
        match Identifier::resolve(&input) {
            Ok(ident) => identifiers.push(ident),
            Err(e) => {
                rejected += 1;
                eprintln!("{} {input}: {e}", "rejected".yellow().bold());
            }
        }
    }
    if identifiers.is_empty() {
        anyhow::bail!("no usable identifiers ({rejected} rejected)");
    }

    let http = HttpClient::with_proxy(&config.proxy).context("building HTTP client")?;
    let registry = SourceRegistry::from_config(config, &http).context("building source chain")?;
    let retriever = Arc::new(Retriever::new(registry, config));

    let mut options = BatchOptions::from_config(config);
    if let Some(dir) = output {
        options.output_dir = dir;
    }
    if let Some(n) = concurrency {
        options.concurrency = n;
    }
    if no_skip_existing {
        options.skip_existing = false;
    }
    options.deadline = deadline;
    options.progress = !quiet && identifiers.len() > 1;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let coordinator = BatchCoordinator::new(retriever, options);
    let summary = coordinator
        .run(identifiers, cancel_rx)
        .await
        .context("running batch")?;
    Ok(summary)
}

fn finish(summary: BatchSummary, quiet: bool) -> Result<()> {
    if !quiet {
        print_summary(&summary);
    }
    if summary.failed > 0 || summary.interrupted || summary.total() == 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    for item in &summary.items {
        match item.status {
            ItemStatus::Downloaded => {
                let path = item
                    .result
                    .output_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                let via = item.result.source_used.as_deref().unwrap_or("?");
                println!(
                    "{} {} {} {path}",
                    "ok".green().bold(),
                    item.result.identifier,
                    format!("[{via}]").dimmed(),
                );
            }
            ItemStatus::Skipped => {
                println!(
                    "{} {} already present",
                    "skip".cyan().bold(),
                    item.result.identifier
                );
            }
            ItemStatus::Failed => {
                println!(
                    "{} {} after {} attempts",
                    "fail".red().bold(),
                    item.result.identifier,
                    item.result.attempts.len()
                );
                for attempt in &item.result.attempts {
                    println!("     {}: {} ({})", attempt.source, attempt.outcome, attempt.detail);
                }
            }
        }
    }
    let line = format!(
        "{} downloaded, {} skipped, {} failed",
        summary.downloaded, summary.skipped, summary.failed
    );
    if summary.interrupted {
        println!("{} {line} {}", "done".bold(), "(interrupted)".yellow());
    } else {
        println!("{} {line}", "done".bold());
    }
}

fn print_sources(config: &Config) -> Result<()> {
    let http = HttpClient::with_proxy(&config.proxy).context("building HTTP client")?;
    let registry = SourceRegistry::from_config(config, &http).context("building source chain")?;

    println!(
        "{:<12} {:>8}  {:<12} {}",
        "source".bold(),
        "priority".bold(),
        "kind".bold(),
        "status".bold()
    );
    for source in registry.all() {
        let d = &source.descriptor;
        let status = if !d.enabled {
            "disabled".dimmed().to_string()
        } else if d.last_resort {
            "enabled (last resort)".yellow().to_string()
        } else {
            "enabled".green().to_string()
        };
        println!(
            "{:<12} {:>8}  {:<12} {status}",
            d.name,
            d.priority,
            format!("{:?}", d.kind).to_lowercase(),
        );
    }
    Ok(())
}
