//! Core data models shared by the correction pipeline.

use serde::Serialize;
use std::time::Duration;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Zero-based position in the source file.
    pub index: usize,
    /// Reference label; empty when the line carries none.
    pub ground_truth: String,
    /// OCR output, the authoritative current value.
    pub predicted: String,
    pub confidence: f64,
}

/// A record selected for correction (confidence below threshold).
#[derive(Debug, Clone, PartialEq)]
pub struct FixItem {
    pub index: usize,
    pub predicted: String,
    pub ground_truth: String,
    pub confidence: f64,
}

impl FixItem {
    pub fn ground_truth(&self) -> Option<&str> {
        if self.ground_truth.is_empty() {
            None
        } else {
            Some(&self.ground_truth)
        }
    }
}

impl From<&Record> for FixItem {
    fn from(record: &Record) -> Self {
        Self {
            index: record.index,
            predicted: record.predicted.clone(),
            ground_truth: record.ground_truth.clone(),
            confidence: record.confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A role-tagged chat message sent to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Outcome of correcting one file.
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub lines: usize,
    pub to_fix: usize,
    /// Low-confidence items whose batch finished (successfully or by fallback).
    pub processed: usize,
    /// Items whose output token differs from the OCR token.
    pub changed: usize,
    pub batches: usize,
    pub exhausted_batches: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

/// Outcome of correcting a directory.
#[derive(Debug, Clone, Default)]
pub struct FolderReport {
    pub files: usize,
    pub failed: usize,
    pub interrupted: bool,
}
