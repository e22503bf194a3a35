//! # `ocrfix`
//!
//! Command-line entry point. Corrects one file, or every matching file in a
//! directory, writing `GT||PRED CONF CORRECTED` lines.
//!
//! ## Usage
//!
//! ```bash
//! # Single file
//! ocrfix --input scans/board1.txt --output fixed/board1.txt
//!
//! # Whole directory with the GPT provider and GT hints
//! ocrfix --input scans/ --output fixed/ --provider gpt --include_gt
//!
//! # Custom configuration and verbose logs mirrored to a file
//! ocrfix --config config/ocrfix.toml --input scans/ --output fixed/ -v --log_file run.log
//! ```
//!
//! Settings come from built-in defaults, then `--config`, then environment
//! variables (a `.env` file in the working directory is loaded first), then
//! flags. `LOG_FILE` and `VERBOSITY` stand in for `--log_file` and `-v`.
//!
//! Exit codes: `0` success (also after Ctrl-C, once partial output is
//! written), `2` bad input path or configuration, `130` on a second Ctrl-C,
//! `1` anything else.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::fs::OpenOptions;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use ocr_postfix::config::{self, Config};
use ocr_postfix::error::ConfigError;
use ocr_postfix::knowledge::{load_reference_tokens, KnowledgeBase};
use ocr_postfix::llm::{ChatClient, HttpChatClient};
use ocr_postfix::pipeline::Pipeline;
use ocr_postfix::progress::ProgressMode;
use ocr_postfix::prompt::PromptBuilder;

/// Post-correct low-confidence schematic OCR tokens with an LLM.
///
/// Input can be a single file or a directory of `.txt` files.
#[derive(Parser)]
#[command(
    name = "ocrfix",
    version,
    about = "Schematic OCR post-correction with lightweight knowledge-base grounding and LLM batching",
    long_about = "Reads GT||PRED CONF lines, sends tokens below the confidence threshold to a chat model \
    in batches for conservative character-level fixes, and writes GT||PRED CONF CORRECTED lines in the \
    original order. Input can be a single file or a directory."
)]
struct Cli {
    /// Input path: a text file or a directory containing .txt files.
    #[arg(long)]
    input: PathBuf,

    /// Output path: a file when --input is a file, a directory when --input is a directory.
    #[arg(long)]
    output: PathBuf,

    /// Path to a TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// LLM provider: `gpt` or `deepseek`.
    #[arg(long)]
    provider: Option<String>,

    /// Number of tokens per request.
    #[arg(long = "batch_size", alias = "batch-size")]
    batch_size: Option<usize>,

    /// Confidence threshold; tokens strictly below it are corrected.
    #[arg(long)]
    threshold: Option<f64>,

    /// Include ground truth (and its type mask) in the prompt.
    #[arg(long = "include_gt", alias = "include-gt")]
    include_gt: bool,

    /// Increase verbosity: -v (debug), -vv (trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Also write logs to this file.
    #[arg(long = "log_file", alias = "log-file")]
    log_file: Option<PathBuf>,

    /// Progress output on stderr: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long)]
    progress: Option<ProgressMode>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let verbose = if cli.verbose > 0 {
        cli.verbose
    } else {
        env_value("VERBOSITY")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    };
    let log_file = cli
        .log_file
        .clone()
        .or_else(|| env_value("LOG_FILE").map(PathBuf::from));

    if let Err(e) = init_logging(verbose, cli.quiet, log_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            if let Some(config_err) = e.downcast_ref::<ConfigError>() {
                tracing::error!("configuration error: {}", config_err);
                return ExitCode::from(2);
            }
            tracing::error!("unhandled error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut cfg = match &cli.config {
        Some(path) => match config::load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!("{:#}", e);
                return Ok(ExitCode::from(2));
            }
        },
        None => Config::default(),
    };
    cfg.apply_env()?;
    apply_overrides(&mut cfg, &cli);
    cfg.validate()?;
    let provider = cfg.provider()?;

    let folder_mode = cli.input.is_dir();
    if folder_mode {
        if cli.output.exists() && !cli.output.is_dir() {
            tracing::error!(
                "--output must be a DIRECTORY when --input is a DIRECTORY. Got file: {}",
                cli.output.display()
            );
            return Ok(ExitCode::from(2));
        }
    } else if !cli.input.is_file() {
        tracing::error!(
            "Input path does not exist or is not a file/directory: {}",
            cli.input.display()
        );
        return Ok(ExitCode::from(2));
    }

    let knowledge =
        KnowledgeBase::from_optional_path(cfg.references.knowledge_base_path.as_deref())?;
    let references = load_reference_tokens(
        cfg.references.tokens_path.as_deref(),
        cfg.references.max_tokens,
    );
    let prompts = PromptBuilder::new(&knowledge, references, cfg.correction.short_token_len);

    let client = HttpChatClient::new(&cfg.llm, provider)?;
    tracing::info!(
        provider = client.provider_name(),
        model = client.model_name(),
        batch_size = cfg.correction.batch_size,
        threshold = cfg.correction.threshold,
        include_gt = cfg.correction.include_gt,
        "starting correction"
    );

    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if await_forced_exit(tokio::signal::ctrl_c, on_interrupt).await {
            tracing::warn!("interrupted twice; exiting without waiting");
            std::process::exit(130);
        }
    });

    let pipeline = Pipeline::new(&cfg, &client, &prompts, progress.as_ref(), cancel);

    if folder_mode {
        pipeline.process_folder(&cli.input, &cli.output).await?;
        tracing::info!("All done. Outputs are under: {}", cli.output.display());
    } else {
        pipeline.process_file(&cli.input, &cli.output).await?;
        tracing::info!("All done. Output written to: {}", cli.output.display());
    }

    Ok(ExitCode::SUCCESS)
}

/// Cancels `cancel` on the first interrupt. Returns `true` on the second,
/// `false` if the interrupt source fails before that.
async fn await_forced_exit<F, Fut>(mut next_interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut presses = 0u32;
    while next_interrupt().await.is_ok() {
        presses += 1;
        if presses > 1 {
            return true;
        }
        tracing::warn!("interrupted by user; writing partial results (press Ctrl-C again to exit now)");
        cancel.cancel();
    }
    false
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn apply_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(provider) = &cli.provider {
        cfg.llm.provider = provider.clone();
    }
    if let Some(batch_size) = cli.batch_size {
        cfg.correction.batch_size = batch_size;
    }
    if let Some(threshold) = cli.threshold {
        cfg.correction.threshold = threshold;
    }
    if cli.include_gt {
        cfg.correction.include_gt = true;
    }
}

fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,ocr_postfix={0},ocrfix={0}", level)));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}
