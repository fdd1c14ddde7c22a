//! CodeAligner CLI
//!
//! The `aligner` command reviews algorithm submissions by tracing them and
//! comparing the run against a reference solution.
//!
//! ## Commands
//!
//! - `review`: Full review (inspect, trace, retrieve, classify, feedback)
//! - `trace`: Run one function under the tracer and print its steps
//! - `corpus`: Ingest, list and count reference solutions

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use aligner_core::obs::ReviewSpan;
use aligner_core::{
    discover_entry, discover_method, format_arguments, parse_argument_literal, Corpus, Embedder,
    Inspection, Inspector, InvocationStyle, PipelineConfig, ReviewPipeline, ReviewReport,
    SolutionRetriever, StaticInspector, Tracer, TracerConfig, DEFAULT_CONTAINER,
};
use aligner_gemini::{GeminiClient, GeminiConfig};
use aligner_store::{ingest_jsonl, CorpusConfig, HashingEmbedder, SurrealCorpus};

#[derive(Parser)]
#[command(name = "aligner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trace-based code review assistant", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Corpus database URL (mem://, surrealkv://path, ws://host:port)
    #[arg(long, global = true, env = "ALIGNER_DB_URL")]
    db_url: Option<String>,

    /// Embedding backend used for corpus vectors and queries
    #[arg(long, global = true, value_enum, default_value = "hashing")]
    embedder: EmbedderKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Local feature-hashing embedder
    Hashing,
    /// Gemini embedContent API
    Gemini,
}

#[derive(Subcommand)]
enum Commands {
    /// Review a submission end to end
    Review {
        /// Source file to review
        file: PathBuf,

        /// Prose description of the problem the code solves
        #[arg(short, long, default_value = "")]
        description: String,

        /// Skip the Gemini inspector; metadata comes from the flags below
        #[arg(long)]
        offline: bool,

        /// Language of the submission (offline mode)
        #[arg(long, default_value = "python")]
        language: String,

        /// Function to invoke (offline mode; discovered when omitted)
        #[arg(long)]
        entry: Option<String>,

        /// Argument tuple as a Python literal, e.g. "([2, 7, 11, 15], 9)"
        #[arg(long)]
        input: Option<String>,

        /// Predicted problem name or slug, e.g. "Two Sum"
        #[arg(long)]
        problem: Option<String>,

        /// Minimum retrieval confidence for executing the reference
        #[arg(long)]
        threshold: Option<f64>,

        /// Do not ask for mentor feedback
        #[arg(long)]
        no_feedback: bool,

        /// Print the full report as JSON
        #[arg(long)]
        report: bool,
    },

    /// Trace one function and print every recorded step
    Trace {
        /// Source file to run
        file: PathBuf,

        /// Function (or method with --method) to invoke
        #[arg(short, long)]
        entry: Option<String>,

        /// Argument tuple as a Python literal
        #[arg(short, long, default_value = aligner_core::tracer::DEFAULT_ARGUMENT_TEXT)]
        input: String,

        /// Instantiate the container class and call a method on it
        #[arg(long)]
        method: bool,

        /// Wall-clock budget for the run (milliseconds)
        #[arg(long, default_value = "5000")]
        deadline_ms: u64,
    },

    /// Reference corpus operations
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },
}

#[derive(Subcommand)]
enum CorpusAction {
    /// Ingest solutions from a JSON Lines file
    Ingest {
        /// Records of the form {"task_id", "completion" | "response", "entry_point"?}
        path: PathBuf,
    },

    /// List stored solutions
    List {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show corpus size
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    aligner_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Review {
            ref file,
            ref description,
            offline,
            ref language,
            ref entry,
            ref input,
            ref problem,
            threshold,
            no_feedback,
            report,
        } => {
            let overrides = Inspection {
                language: language.clone(),
                entry_point: entry.clone(),
                predicted_problem: problem.clone(),
                test_input: input.clone(),
            };
            let options = ReviewOptions {
                offline,
                threshold,
                no_feedback,
                report,
            };
            cmd_review(&cli, file, description, overrides, options).await
        }
        Commands::Trace {
            ref file,
            ref entry,
            ref input,
            method,
            deadline_ms,
        } => cmd_trace(file, entry.as_deref(), input, method, deadline_ms),
        Commands::Corpus { ref action } => match action {
            CorpusAction::Ingest { path } => cmd_corpus_ingest(&cli, path).await,
            CorpusAction::List { limit } => cmd_corpus_list(&cli, *limit).await,
            CorpusAction::Stats => cmd_corpus_stats(&cli).await,
        },
    }
}

fn corpus_config(cli: &Cli) -> CorpusConfig {
    let config = CorpusConfig::from_env();
    match &cli.db_url {
        Some(url) => config.with_url(url.clone()),
        None => config,
    }
}

async fn open_corpus(cli: &Cli) -> Result<Arc<dyn Corpus>> {
    let config = corpus_config(cli);
    let corpus = SurrealCorpus::connect(&config)
        .await
        .with_context(|| format!("Failed to open corpus at {}", config.url))?;
    Ok(Arc::new(corpus))
}

fn gemini_client() -> Result<Arc<GeminiClient>> {
    let client = GeminiClient::new(GeminiConfig::from_env())
        .context("Gemini is not available (set GEMINI_API_KEY or pass --offline)")?;
    Ok(Arc::new(client))
}

fn embedder(kind: EmbedderKind) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match kind {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderKind::Gemini => gemini_client()?,
    };
    Ok(embedder)
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

struct ReviewOptions {
    offline: bool,
    threshold: Option<f64>,
    no_feedback: bool,
    report: bool,
}

/// Run a full review and print the verdict
async fn cmd_review(
    cli: &Cli,
    file: &Path,
    description: &str,
    overrides: Inspection,
    options: ReviewOptions,
) -> Result<()> {
    let code = read_source(file)?;

    let gemini = if options.offline {
        None
    } else {
        Some(gemini_client()?)
    };
    let inspector: Arc<dyn Inspector> = match &gemini {
        Some(client) => client.clone(),
        None => Arc::new(StaticInspector::new(overrides)),
    };

    let retriever = SolutionRetriever::new(open_corpus(cli).await?, embedder(cli.embedder)?);
    let mut config = PipelineConfig::from_env();
    if let Some(threshold) = options.threshold {
        config = config.with_acceptance_threshold(threshold);
    }

    let mut pipeline = ReviewPipeline::new(inspector, retriever, config);
    match (&gemini, options.no_feedback) {
        (Some(client), false) => pipeline = pipeline.with_feedback(client.clone()),
        (None, false) => info!("feedback requires Gemini; skipping in offline mode"),
        _ => {}
    }

    let report = pipeline
        .review(&code, description)
        .await
        .context("Review failed")?;

    if options.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ReviewReport) {
    println!("Review:    {}", report.review_id);
    println!(
        "Language:  {} (entry: {})",
        report.submission.language,
        if report.submission.entry_point.is_empty() {
            "-"
        } else {
            &report.submission.entry_point
        }
    );
    println!(
        "Input:     {}{}",
        format_arguments(&report.submission.arguments),
        if report.arguments_defaulted {
            " (default)"
        } else {
            ""
        }
    );
    if let Some(run) = &report.user_run {
        println!("User:      {} steps", run.trace.len());
    }
    match &report.candidate {
        Some(candidate) => println!(
            "Reference: {} ({:?}, confidence {:.2})",
            candidate.slug, candidate.provenance, candidate.confidence
        ),
        None => println!("Reference: none"),
    }
    if let Some(run) = &report.reference_run {
        println!("Ref steps: {}", run.trace.len());
    }
    println!();
    println!("Verdict:   {}", report.verdict.kind.as_str());
    println!("           {}", report.verdict.context);
    if let Some(feedback) = &report.feedback {
        println!();
        println!("{feedback}");
    }
}

/// Trace a single function and print the steps as JSON
fn cmd_trace(
    file: &Path,
    entry: Option<&str>,
    input: &str,
    method: bool,
    deadline_ms: u64,
) -> Result<()> {
    let code = read_source(file)?;
    let arguments =
        parse_argument_literal(input).with_context(|| format!("Invalid input literal: {input}"))?;

    let (style, discovered) = if method {
        (
            InvocationStyle::Method,
            discover_method(&code, DEFAULT_CONTAINER).context("Failed to parse source")?,
        )
    } else {
        (
            InvocationStyle::Function,
            discover_entry(&code).context("Failed to parse source")?,
        )
    };
    let Some(entry) = entry.map(String::from).or(discovered) else {
        bail!("No entry point found in {}; pass --entry", file.display());
    };

    let tracer = Tracer::new(
        TracerConfig::default().with_deadline(Duration::from_millis(deadline_ms)),
    );
    let _span = ReviewSpan::enter(&format!("trace-{}", file.display()));
    let run = tracer.run(&code, &entry, &arguments, style);
    if let Some(failure) = run.outcome.failure() {
        warn!(kind = ?failure.kind, line = ?failure.line, "{failure}");
    }

    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

/// Ingest a JSON Lines dataset into the corpus
async fn cmd_corpus_ingest(cli: &Cli, path: &Path) -> Result<()> {
    let corpus = open_corpus(cli).await?;
    let embedder = embedder(cli.embedder)?;

    let summary = ingest_jsonl(path, corpus.as_ref(), embedder.as_ref())
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    println!(
        "Ingested {} solutions ({} skipped without code)",
        summary.ingested, summary.skipped
    );
    Ok(())
}

/// List the first entries in the corpus
async fn cmd_corpus_list(cli: &Cli, limit: usize) -> Result<()> {
    let corpus = open_corpus(cli).await?;
    let entries = corpus.list(limit).await.context("Failed to list corpus")?;

    if entries.is_empty() {
        println!("Corpus is empty");
        return Ok(());
    }
    for entry in entries {
        println!("{:<40} {}", entry.slug, entry.title);
    }
    Ok(())
}

/// Show the number of stored solutions
async fn cmd_corpus_stats(cli: &Cli) -> Result<()> {
    let config = corpus_config(cli);
    let corpus = open_corpus(cli).await?;
    let count = corpus.count().await.context("Failed to count corpus")?;

    println!("Database:  {}", config.url);
    println!("Solutions: {count}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_offline_review() {
        let cli = Cli::try_parse_from([
            "aligner",
            "review",
            "solution.py",
            "--offline",
            "--entry",
            "f",
            "--input",
            "([3, 1, 2],)",
            "--problem",
            "Find Max",
        ])
        .unwrap();
        match cli.command {
            Commands::Review {
                offline,
                entry,
                input,
                language,
                ..
            } => {
                assert!(offline);
                assert_eq!(entry.as_deref(), Some("f"));
                assert_eq!(input.as_deref(), Some("([3, 1, 2],)"));
                assert_eq!(language, "python");
            }
            _ => panic!("expected review"),
        }
        assert_eq!(cli.embedder, EmbedderKind::Hashing);
    }

    #[test]
    fn test_parse_corpus_list() {
        let cli = Cli::try_parse_from([
            "aligner",
            "--db-url",
            "mem://",
            "corpus",
            "list",
            "--limit",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.db_url.as_deref(), Some("mem://"));
        assert!(matches!(
            cli.command,
            Commands::Corpus {
                action: CorpusAction::List { limit: 3 }
            }
        ));
    }

    #[test]
    fn test_trace_defaults_input() {
        let cli = Cli::try_parse_from(["aligner", "trace", "f.py"]).unwrap();
        match cli.command {
            Commands::Trace { input, method, .. } => {
                assert_eq!(input, "([1, 5, 2],)");
                assert!(!method);
            }
            _ => panic!("expected trace"),
        }
    }

    #[test]
    fn test_cmd_trace_runs_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.py");
        std::fs::write(&path, "def f(a):\n    return max(a)\n").unwrap();
        cmd_trace(&path, None, "([3, 1, 2],)", false, 5000).unwrap();
        assert!(cmd_trace(&path, None, "([3, 1", false, 5000).is_err());
    }

    #[tokio::test]
    async fn test_corpus_roundtrip_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solutions.jsonl");
        std::fs::write(
            &path,
            "{\"task_id\": \"find-max\", \"completion\": \"class Solution:\\n    def findMax(self, arr):\\n        return max(arr)\\n\"}\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from(["aligner", "--db-url", "mem://", "corpus", "stats"]).unwrap();
        let corpus = open_corpus(&cli).await.unwrap();
        let summary = ingest_jsonl(&path, corpus.as_ref(), &HashingEmbedder::default())
            .await
            .unwrap();
        assert_eq!(summary.ingested, 1);
        assert_eq!(corpus.count().await.unwrap(), 1);
    }
}
