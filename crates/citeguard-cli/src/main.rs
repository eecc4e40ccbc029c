use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use citeguard_core::{GuardConfig, SectionSource, extract, extract_spans};
use citeguard_host::{ChatMessage, VerificationPipeline};
use citeguard_store::{LookupOutcome, SectionLookup};
use citeguard_sync::HttpSectionSource;
use clap::{Parser, Subcommand};
use tracing::{Level, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "citeguard", version)]
#[command(about = "Verify California statute citations against an authoritative source")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the section API
    #[arg(
        long,
        global = true,
        env = "CITEGUARD_API_URL",
        default_value = "http://localhost:8000"
    )]
    api_url: String,

    /// Read sections from a local DuckDB file instead of the API
    #[cfg(feature = "duckdb")]
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Pipeline config as JSON; every field is optional
    #[arg(long, global = true, env = "CITEGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the citations found in TEXT (stdin when omitted or "-")
    Extract { text: Option<String> },

    /// Fetch every section cited in TEXT
    Lookup {
        text: Option<String>,
        /// Print section bodies, not just status
        #[arg(long)]
        full: bool,
    },

    /// Run pre-flight on a query and print the text handed to generation
    Prepare {
        query: Option<String>,
        /// Print text and correlation metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run post-flight on a generated response
    Review {
        response: Option<String>,
        /// Run pre-flight on this query first, so the response is checked
        /// against what it verified
        #[arg(long)]
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let source = open_source(&cli)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = source.name(),
        "citeguard"
    );

    match cli.command {
        Command::Extract { text } => {
            let text = text_arg(text)?;
            for m in extract_spans(&text) {
                println!(
                    "{}\t{}..{}\t{}",
                    m.citation,
                    m.span.start,
                    m.span.end,
                    &text[m.span.clone()]
                );
            }
        }
        Command::Lookup { text, full } => {
            let text = text_arg(text)?;
            let citations = extract(&text);
            if citations.is_empty() {
                bail!("no citations found");
            }
            let lookup = SectionLookup::from_config(source, &config);
            let report = lookup.fetch(&citations).await;
            for entry in &report.lookups {
                match &entry.outcome {
                    LookupOutcome::Verified(record) => {
                        println!("{}\tverified\t{}", entry.citation, record.source_url);
                        if full {
                            println!("\n{}\n", record.body.trim());
                        }
                    }
                    LookupOutcome::NotFound => println!("{}\tnot found", entry.citation),
                    LookupOutcome::Unavailable(why) => {
                        println!("{}\tunavailable\t{why:?}", entry.citation)
                    }
                }
            }
            let unverified = report.unverified_count();
            if unverified > 0 {
                bail!("{unverified} of {} citation(s) not verified", citations.len());
            }
        }
        Command::Prepare { query, json } => {
            let query = text_arg(query)?;
            let pipeline = VerificationPipeline::new(config, source)?;
            let prepared = pipeline.prepare(query.trim()).await;
            if json {
                let out = serde_json::json!({
                    "text": prepared.text,
                    "correlation": prepared.correlation,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", prepared.text);
            }
        }
        Command::Review { response, query } => {
            let response = text_arg(response)?;
            let pipeline = VerificationPipeline::new(config, source)?;
            let mut history = Vec::new();
            if let Some(query) = query {
                let prepared = pipeline.prepare(query.trim()).await;
                history.push(ChatMessage {
                    metadata: prepared.correlation,
                    ..ChatMessage::user(prepared.text)
                });
            }
            println!("{}", pipeline.review(&response, &history, false).await);
            let m = pipeline.metrics();
            info!(
                validated = m.citations_validated,
                hallucinations = m.hallucinations_found,
                contradictions = m.contradictions_corrected,
                "review done"
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<GuardConfig> {
    let Some(path) = path else {
        return Ok(GuardConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    GuardConfig::from_json_str(&json).with_context(|| format!("parsing config {}", path.display()))
}

fn open_source(cli: &Cli) -> Result<Arc<dyn SectionSource>> {
    #[cfg(feature = "duckdb")]
    if let Some(path) = &cli.db {
        let db = citeguard_store::DuckSectionSource::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        return Ok(Arc::new(db));
    }

    let http = HttpSectionSource::with_timeout(&cli.api_url, HTTP_TIMEOUT)?;
    Ok(Arc::new(http))
}

fn text_arg(arg: Option<String>) -> Result<String> {
    match arg {
        Some(text) if text != "-" => Ok(text),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            Ok(buf)
        }
    }
}
