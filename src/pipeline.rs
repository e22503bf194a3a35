//! File and folder orchestration.
//!
//! Per file: parse every line → select records below the confidence
//! threshold → correct them batch by batch → rebuild all lines in their
//! original order. Every input line yields exactly one output line; a token
//! without a usable correction keeps its OCR value.
//!
//! Batches run one at a time and files one after another. A cancelled
//! [`CancellationToken`] stops the current file from starting (or finishing)
//! further batches; whatever was corrected so far is still written, and
//! folder mode does not advance to the next file.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::batch::{batch_count, partition};
use crate::config::Config;
use crate::corrector::{resolve, BatchCorrector};
use crate::line_codec;
use crate::llm::ChatClient;
use crate::models::{FileReport, FixItem, FolderReport, Record};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::prompt::PromptBuilder;

pub struct Pipeline<'a> {
    config: &'a Config,
    corrector: BatchCorrector<'a>,
    progress: &'a dyn ProgressReporter,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        client: &'a dyn ChatClient,
        prompts: &'a PromptBuilder,
        progress: &'a dyn ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        let corrector = BatchCorrector::new(
            client,
            prompts,
            config.correction.max_attempts,
            config.correction.retry_pause(),
        );
        Self {
            config,
            corrector,
            progress,
            cancel,
        }
    }

    /// Correct the lines of one file. `label` names the file in logs and
    /// progress events.
    pub async fn correct_lines(&self, label: &str, lines: &[&str]) -> Result<(Vec<String>, FileReport)> {
        let started = Instant::now();
        let correction = &self.config.correction;

        let records = parse_records(lines);
        let to_fix = select_for_fix(&records, correction.threshold);

        let mut report = FileReport {
            lines: records.len(),
            to_fix: to_fix.len(),
            ..Default::default()
        };
        tracing::info!(
            file = label,
            lines = report.lines,
            to_fix = report.to_fix,
            threshold = correction.threshold,
            "selected low-confidence items"
        );
        self.progress.report(ProgressEvent::Parsed {
            file: label.to_string(),
            lines: report.lines as u64,
            to_fix: report.to_fix as u64,
        });

        if to_fix.is_empty() {
            tracing::info!(file = label, "nothing to correct; writing passthrough output");
            let out = records
                .iter()
                .map(|r| line_codec::rebuild(&r.ground_truth, &r.predicted, r.confidence, &r.predicted))
                .collect();
            report.elapsed = started.elapsed();
            return Ok((out, report));
        }

        let batches = partition(&to_fix, correction.batch_size)?;
        let total_batches = batch_count(to_fix.len(), correction.batch_size);
        let mut corrections: HashMap<usize, String> = HashMap::with_capacity(to_fix.len());

        for (n, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let batch_started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.interrupted = true;
                    break;
                }
                result = self.corrector.correct_batch(batch, correction.include_gt) => result,
            };

            report.batches += 1;
            if result.exhausted {
                report.exhausted_batches += 1;
            }
            for (item, token) in batch.iter().zip(result.tokens.iter()) {
                corrections.insert(item.index, resolve(item, token.as_deref()));
            }
            report.processed += batch.len();

            let secs = batch_started.elapsed().as_secs_f64();
            tracing::debug!(
                file = label,
                batch = n + 1,
                of = total_batches,
                attempts = result.attempts,
                secs,
                "batch done"
            );
            self.progress.report(ProgressEvent::Batch {
                file: label.to_string(),
                batch: (n + 1) as u64,
                batches: total_batches as u64,
                done: report.processed as u64,
                total: report.to_fix as u64,
                secs,
            });
        }

        if report.interrupted {
            tracing::warn!(
                file = label,
                processed = report.processed,
                to_fix = report.to_fix,
                "interrupted; writing partial results"
            );
        }

        let out = records
            .iter()
            .map(|r| {
                let corrected = corrections
                    .get(&r.index)
                    .map(String::as_str)
                    .unwrap_or(&r.predicted);
                if corrected != r.predicted {
                    report.changed += 1;
                }
                line_codec::rebuild(&r.ground_truth, &r.predicted, r.confidence, corrected)
            })
            .collect();

        report.elapsed = started.elapsed();
        let secs = report.elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            report.processed as f64 / secs
        } else {
            0.0
        };
        tracing::info!(
            file = label,
            secs,
            items_per_sec = throughput,
            changed = report.changed,
            exhausted_batches = report.exhausted_batches,
            "correction finished"
        );

        Ok((out, report))
    }

    /// Correct `input` and write the result to `output`.
    pub async fn process_file(&self, input: &Path, output: &Path) -> Result<FileReport> {
        tracing::info!(path = %input.display(), "reading");
        let content = std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read input file: {}", input.display()))?;
        let lines: Vec<&str> = content.lines().collect();

        let label = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| input.display().to_string());

        let (out, report) = self.correct_lines(&label, &lines).await?;
        write_lines(output, &out)?;

        tracing::info!(
            path = %output.display(),
            processed = report.processed,
            to_fix = report.to_fix,
            "wrote output"
        );
        Ok(report)
    }

    /// Correct every matching file directly under `input_dir`, writing
    /// same-named outputs under `output_dir`.
    pub async fn process_folder(&self, input_dir: &Path, output_dir: &Path) -> Result<FolderReport> {
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;

        let files = list_input_files(input_dir, &self.config.folder.include_globs)?;
        let mut folder = FolderReport::default();

        if files.is_empty() {
            tracing::warn!(dir = %input_dir.display(), "no matching input files found");
            return Ok(folder);
        }
        tracing::info!(
            count = files.len(),
            input = %input_dir.display(),
            output = %output_dir.display(),
            "processing folder"
        );

        for (i, path) in files.iter().enumerate() {
            let Some(name) = path.file_name() else {
                continue;
            };
            tracing::info!(
                "--- processing file {}/{}: {} ---",
                i + 1,
                files.len(),
                name.to_string_lossy()
            );

            match self.process_file(path, &output_dir.join(name)).await {
                Ok(report) => {
                    folder.files += 1;
                    if report.interrupted {
                        folder.interrupted = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %format!("{:#}", e), "file failed; continuing");
                    folder.failed += 1;
                }
            }

            if i + 1 < files.len() {
                let pause = self.config.folder.pause();
                tracing::info!(secs = pause.as_secs(), "sleeping before next file");
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        folder.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!(
            files = folder.files,
            failed = folder.failed,
            interrupted = folder.interrupted,
            "folder processing complete"
        );
        Ok(folder)
    }
}

/// Parse raw lines into records indexed by position.
pub fn parse_records(lines: &[&str]) -> Vec<Record> {
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let (ground_truth, predicted, confidence) = line_codec::parse(line);
            Record {
                index,
                ground_truth,
                predicted,
                confidence,
            }
        })
        .collect()
}

/// Records with confidence strictly below `threshold`, in input order.
pub fn select_for_fix(records: &[Record], threshold: f64) -> Vec<FixItem> {
    records
        .iter()
        .filter(|r| r.confidence < threshold)
        .map(FixItem::from)
        .collect()
}

/// Regular files directly under `dir` whose names match `globs`
/// (case-insensitive), sorted by name.
pub fn list_input_files(dir: &Path, globs: &[String]) -> Result<Vec<PathBuf>> {
    let matcher = build_globset(globs)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = lines.join("\n");
    if !lines.is_empty() {
        content.push('\n');
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write output file: {}", path.display()))
}
