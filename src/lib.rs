//! # OCR Post-Fix
//!
//! Selective LLM post-correction for OCR tokens read from schematic drawings.
//!
//! Only tokens whose OCR confidence falls below a threshold are sent to a
//! chat model, in fixed-size batches, with a prompt that allows nothing but
//! conservative character-level fixes (`O`↔`0`, `I`/`l`↔`1`, ...). Responses
//! must contain exactly one token per line; anything else is retried and,
//! once retries run out, the batch keeps its OCR values.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────────────┐   ┌────────────┐
//! │ line_codec │──▶│  batch   │──▶│    corrector     │──▶│ line_codec │
//! │   parse    │   │ partition│   │ prompt → llm →   │   │  rebuild   │
//! └────────────┘   └──────────┘   │ validate (retry) │   └────────────┘
//!                                 └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and provider selection |
//! | [`models`] | Records, fix items, chat messages, reports |
//! | [`line_codec`] | Input/output line format |
//! | [`batch`] | Contiguous batching |
//! | [`knowledge`] | Knowledge base and reference tokens |
//! | [`prompt`] | Prompt construction |
//! | [`validate`] | Response line-count validation |
//! | [`llm`] | Chat-completion clients with retry/backoff |
//! | [`corrector`] | Per-batch retry state machine |
//! | [`pipeline`] | File and folder orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`error`] | Typed errors |

pub mod batch;
pub mod config;
pub mod corrector;
pub mod error;
pub mod knowledge;
pub mod line_codec;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod validate;
