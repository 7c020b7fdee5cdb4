//! Requirement-bound work item generator.
//!
//! Mines a specification document for hard requirements, binds them to each
//! request's domain and drives a generation oracle through a bounded
//! draft/validate/refine loop. Accepted artifacts land in a sink directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use specbound::batch::run_batch;
use specbound::core::binder::bind_requirements;
use specbound::core::compliance::check_compliance;
use specbound::core::extractor::extract_requirements;
use specbound::core::types::{HardRequirement, PipelineOutcome, PipelineResult, WorkItemRequest};
use specbound::error::PipelineError;
use specbound::exit_codes;
use specbound::io::config::{PipelineConfig, load_config, write_config};
use specbound::io::corpus::SpecCorpus;
use specbound::io::oracle::CommandOracle;
use specbound::io::run_log::RunArchive;
use specbound::io::sink::JsonDirSink;
use specbound::logging;
use specbound::pipeline::{PipelineOrchestrator, PipelineSettings};

#[derive(Parser)]
#[command(
    name = "specbound",
    version,
    about = "Deterministic requirement-bound work item generation"
)]
struct Cli {
    /// Path to the TOML config. Missing file means defaults.
    #[arg(long, global = true, default_value = "specbound.toml")]
    config: PathBuf,

    /// Raise log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the hard requirements found in a specification document.
    Extract {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Print the domain and requirements a request binds to.
    Bind {
        #[arg(long)]
        spec: PathBuf,
        /// JSON file holding one request.
        #[arg(long)]
        request: PathBuf,
    },
    /// Check acceptance criteria against the requirements bound to a request.
    Check {
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        request: PathBuf,
        /// One acceptance criterion; repeat for more.
        #[arg(long = "criterion")]
        criteria: Vec<String>,
    },
    /// Generate work items for one request or a JSON array of requests.
    Run {
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        request: PathBuf,
        /// Directory receiving accepted artifacts.
        #[arg(long)]
        sink: Option<PathBuf>,
        /// Directory receiving per-pass state snapshots and results.
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Requests processed concurrently.
        #[arg(long, default_value_t = 1)]
        parallel: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Extract { spec } => {
            let cfg = load_config(&cli.config)?;
            let requirements = requirements_for(&cfg, &SpecCorpus::load(&spec)?);
            print_json(&requirements)?;
            Ok(exit_codes::OK)
        }
        Command::Bind { spec, request } => cmd_bind(&cli.config, &spec, &request),
        Command::Check {
            spec,
            request,
            criteria,
        } => cmd_check(&cli.config, &spec, &request, &criteria),
        Command::Run {
            spec,
            request,
            sink,
            archive,
            parallel,
        } => cmd_run(&cli.config, &spec, &request, sink, archive, parallel),
    }
}

fn cmd_init(config: &Path, force: bool) -> Result<i32> {
    if config.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", config.display());
    }
    write_config(config, &PipelineConfig::default())?;
    println!("{}", config.display());
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct BindReport<'a> {
    matched_domain: Option<&'a str>,
    trigger_keywords: Vec<&'a str>,
    requirements: &'a [HardRequirement],
}

fn cmd_bind(config: &Path, spec: &Path, request: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let requirements = requirements_for(&cfg, &SpecCorpus::load(spec)?);
    let request = read_single_request(request)?;
    let bound = bind_requirements(
        &request.descriptor_text(),
        &requirements,
        &cfg.keyword_taxonomy(),
    );
    print_json(&BindReport {
        matched_domain: bound.matched_domain(),
        trigger_keywords: bound
            .binding
            .as_ref()
            .map(|b| b.trigger_keywords.iter().map(String::as_str).collect())
            .unwrap_or_default(),
        requirements: &bound.requirements,
    })?;
    Ok(exit_codes::OK)
}

fn cmd_check(config: &Path, spec: &Path, request: &Path, criteria: &[String]) -> Result<i32> {
    let cfg = load_config(config)?;
    let requirements = requirements_for(&cfg, &SpecCorpus::load(spec)?);
    let request = read_single_request(request)?;
    let bound = bind_requirements(
        &request.descriptor_text(),
        &requirements,
        &cfg.keyword_taxonomy(),
    );
    let result = check_compliance(criteria, &bound, cfg.compliance.coverage_threshold);
    print_json(&result)?;
    Ok(if result.is_compliant {
        exit_codes::OK
    } else {
        exit_codes::REJECTED
    })
}

fn cmd_run(
    config: &Path,
    spec: &Path,
    request: &Path,
    sink: Option<PathBuf>,
    archive: Option<PathBuf>,
    parallel: usize,
) -> Result<i32> {
    let cfg = load_config(config)?;
    let corpus = SpecCorpus::load(spec)?;
    let requests = read_requests(request)?;
    let oracle = CommandOracle::new(&cfg.oracle);
    let sink = sink.map(JsonDirSink::new);

    let mut orchestrator =
        PipelineOrchestrator::new(&oracle, PipelineSettings::from_config(&cfg), corpus)?;
    if let Some(sink) = &sink {
        orchestrator = orchestrator.with_sink(sink);
    }
    if let Some(dir) = archive {
        orchestrator = orchestrator.with_archive(RunArchive::new(dir));
    }

    let outcomes = if requests.len() == 1 {
        vec![orchestrator.run(&requests[0])]
    } else {
        run_batch(&orchestrator, &requests, parallel)
    };
    let (reports, code) = summarize_runs(&requests, outcomes);
    print_json(&reports)?;
    Ok(code)
}

/// One entry of `run` output: a finished pipeline result or a failed run.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RunReport {
    Completed(PipelineResult),
    Failed {
        index: usize,
        title: String,
        error: String,
    },
}

/// Keep every per-request outcome in input order and derive the exit code.
///
/// Any failed run makes the command `INVALID`; otherwise the worst outcome wins.
fn summarize_runs(
    requests: &[WorkItemRequest],
    outcomes: Vec<Result<PipelineResult, PipelineError>>,
) -> (Vec<RunReport>, i32) {
    let mut failed = false;
    let mut completed = Vec::new();
    let reports = requests
        .iter()
        .zip(outcomes)
        .enumerate()
        .map(|(index, (request, outcome))| match outcome {
            Ok(result) => {
                completed.push(result.outcome);
                RunReport::Completed(result)
            }
            Err(err) => {
                failed = true;
                eprintln!("request {} ({}): {err:#}", index + 1, request.title);
                RunReport::Failed {
                    index,
                    title: request.title.clone(),
                    error: format!("{err:#}"),
                }
            }
        })
        .collect();
    let code = if failed {
        exit_codes::INVALID
    } else {
        run_exit_code(&completed)
    };
    (reports, code)
}

/// Worst outcome wins: exhausted over rejected over accepted.
fn run_exit_code(outcomes: &[PipelineOutcome]) -> i32 {
    outcomes
        .iter()
        .map(|outcome| match outcome {
            PipelineOutcome::Accepted => exit_codes::OK,
            PipelineOutcome::Rejected => exit_codes::REJECTED,
            PipelineOutcome::Exhausted => exit_codes::EXHAUSTED,
        })
        .max()
        .unwrap_or(exit_codes::OK)
}

fn requirements_for(cfg: &PipelineConfig, corpus: &SpecCorpus) -> Vec<HardRequirement> {
    extract_requirements(
        corpus.text(),
        &cfg.keyword_taxonomy(),
        cfg.extraction.lookahead_window,
    )
}

/// Read a request file holding either one object or an array of objects.
fn read_requests(path: &Path) -> Result<Vec<WorkItemRequest>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let requests = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<WorkItemRequest>, _>>(),
        other => serde_json::from_value(other).map(|r| vec![r]),
    }
    .with_context(|| format!("decode requests in {}", path.display()))?;
    if requests.is_empty() {
        bail!("{} holds no requests", path.display());
    }
    Ok(requests)
}

fn read_single_request(path: &Path) -> Result<WorkItemRequest> {
    let mut requests = read_requests(path)?;
    if requests.len() != 1 {
        bail!("{} must hold exactly one request", path.display());
    }
    Ok(requests.remove(0))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}
