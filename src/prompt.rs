//! Prompt construction for one batch of low-confidence tokens.
//!
//! A [`PromptPayload`] has two parts:
//!
//! - **instructions**: the system message with the correction policy, plus
//!   a context header carrying reference tokens and the knowledge base.
//! - **queries**: one line per item, in batch order.
//!
//! The query order is the contract the validator and reconciliation rely
//! on: response line `i` is the correction for batch item `i`.

use crate::knowledge::KnowledgeBase;
use crate::models::{ChatMessage, FixItem};

/// Builds prompts from static grounding data. Deterministic for a given
/// batch and flag.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    knowledge_json: String,
    reference_tokens: Vec<String>,
    short_token_len: usize,
}

/// Instructions plus per-item query lines for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPayload {
    pub system: String,
    pub context: String,
    pub queries: Vec<String>,
}

impl PromptPayload {
    /// System message followed by the user message (context + queries).
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut user = self.context.clone();
        user.push_str(&self.queries.join("\n"));
        vec![ChatMessage::system(self.system.clone()), ChatMessage::user(user)]
    }
}

impl PromptBuilder {
    /// `reference_tokens` should already be capped to the configured maximum.
    pub fn new(
        knowledge: &KnowledgeBase,
        reference_tokens: Vec<String>,
        short_token_len: usize,
    ) -> Self {
        Self {
            knowledge_json: knowledge.to_prompt_json(),
            reference_tokens,
            short_token_len,
        }
    }

    pub fn build(&self, batch: &[FixItem], include_gt: bool) -> PromptPayload {
        PromptPayload {
            system: self.system_message(),
            context: self.context_header(),
            queries: batch
                .iter()
                .map(|item| query_line(item, include_gt))
                .collect(),
        }
    }

    fn system_message(&self) -> String {
        format!(
            "You are a senior PCB schematic engineer and OCR correction expert.\n\
             Task: Fix noisy OCR tokens for schematic labels using CONSERVATIVE, CHARACTER-LEVEL edits only.\n\
             Allowed swaps: O<->0, I/l<->1, S<->5, B<->8, Z<->2, g/q<->9.\n\
             Hard constraints:\n \
             - Replace internal spaces with underscores (_); never introduce spaces.\n \
             - Do NOT replace '-' with '_' or vice versa.\n \
             - Do NOT remove unit/symbols like Ω, µ, °, ±.\n \
             - Do NOT convert 3.3V <-> 3V3.\n \
             - Keep *_P/*_N suffixes and explicit +/- in diff pairs.\n\
             Length rule: never change token length except for spaces->underscores; \
             if token length <= {short}, RETURN THE OCR TOKEN UNCHANGED.\n\
             Confidence rule:\n \
             - If CONF >= 0.92: at most 0-2 confusable-character substitutions; length must not change (except spaces->underscores).\n \
             - If 0.80 <= CONF < 0.92: minimal edits; length change only for spaces->underscores.\n \
             - If CONF < 0.80: still conservative; only clear OCR confusions are allowed.\n\
             If the OCR token already looks valid or you're unsure, return it unchanged.\n\
             Additional guidance:\n \
             - If OCR token matches 'PAB', correct it to 'PA6' or 'PA8' based on the number in context.\n \
             - For any 'GP' or 'GPIO' confusion, prioritize 'GPIO' over 'GP' and fix errors like 'GP108' to 'GPIO8'.\n \
             - If the OCR token matches patterns like 'PAB', 'PAC', or 'PAA', consider it a potential misreading of 'PA6' or 'PA8'.\n\
             Output MUST be tokens only, one per line, exactly matching input order. \
             No numbering, no quotes, no extra text.",
            short = self.short_token_len
        )
    }

    fn context_header(&self) -> String {
        let mut header = String::new();
        if !self.reference_tokens.is_empty() {
            header.push_str("Reference tokens (correct examples; mimic style when similar):\n");
            header.push_str(&self.reference_tokens.join(", "));
            header.push_str("\n\n");
        }
        header.push_str("Knowledge Base (context only; do not over-normalize):\n");
        header.push_str(&self.knowledge_json);
        header.push_str("\n\n");
        header.push_str(
            "Correct the following OCR tokens.\n\
             If GT is provided, use it only to guide character types/positions (TYPE_MASK = A/D/S).\n\
             Return ONE token per line, same order as input.\n",
        );
        header
    }
}

fn query_line(item: &FixItem, include_gt: bool) -> String {
    let pred = &item.predicted;
    let len = pred.chars().count();
    let conf = item.confidence;
    match item.ground_truth().filter(|_| include_gt) {
        Some(gt) => format!(
            "- OCR: {pred} ; LEN: {len} ; CONF: {conf:.4} ; GT: {gt} ; TYPE_MASK: {}",
            type_mask(gt)
        ),
        None => format!("- OCR: {pred} ; LEN: {len} ; CONF: {conf:.4}"),
    }
}

/// Per-character class of a token: `D` ASCII digit, `A` letter, `S` anything else.
pub fn type_mask(token: &str) -> String {
    token
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                'D'
            } else if c.is_alphabetic() {
                'A'
            } else {
                'S'
            }
        })
        .collect()
}
