//! Per-batch correction with bounded end-to-end retries.
//!
//! ```text
//!  Attempting(1) ──valid──▶ Succeeded
//!       │
//!   invalid / call error
//!       ▼
//!  Attempting(n+1) ... Attempting(max) ──fail──▶ Exhausted
//! ```
//!
//! An attempt fails when the remote call errors or when the response does
//! not have exactly one line per item. Between attempts the corrector waits
//! a fixed pause. On exhaustion every slot is `None`; substituting the
//! original OCR token happens during reconciliation, not here.

use std::time::Duration;

use crate::llm::ChatClient;
use crate::models::FixItem;
use crate::prompt::PromptBuilder;
use crate::validate::validate;

/// Result of correcting one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCorrection {
    /// One entry per batch item, in batch order. `None` means "keep the
    /// OCR token".
    pub tokens: Vec<Option<String>>,
    /// Attempts used (1-based).
    pub attempts: u32,
    pub exhausted: bool,
}

enum State {
    Attempting(u32),
    Succeeded { tokens: Vec<String>, attempts: u32 },
    Exhausted,
}

/// Drives prompt → remote call → validation for one batch at a time.
pub struct BatchCorrector<'a> {
    client: &'a dyn ChatClient,
    prompts: &'a PromptBuilder,
    max_attempts: u32,
    retry_pause: Duration,
}

impl<'a> BatchCorrector<'a> {
    pub fn new(
        client: &'a dyn ChatClient,
        prompts: &'a PromptBuilder,
        max_attempts: u32,
        retry_pause: Duration,
    ) -> Self {
        Self {
            client,
            prompts,
            max_attempts: max_attempts.max(1),
            retry_pause,
        }
    }

    pub async fn correct_batch(&self, batch: &[FixItem], include_gt: bool) -> BatchCorrection {
        let messages = self.prompts.build(batch, include_gt).to_messages();
        let expected = batch.len();

        let mut state = State::Attempting(1);
        loop {
            state = match state {
                State::Attempting(n) => {
                    if n > 1 {
                        tracing::info!(attempt = n, of = self.max_attempts, "retrying batch");
                    }
                    let outcome = match self.client.complete(&messages).await {
                        Ok(raw) => validate(&raw, expected).map_err(|mismatch| {
                            tracing::warn!(
                                expected = mismatch.expected,
                                got = mismatch.actual,
                                attempt = n,
                                "model returned an incorrect number of lines"
                            );
                            mismatch.to_string()
                        }),
                        Err(e) => {
                            tracing::warn!(attempt = n, error = %e, "remote call failed for batch");
                            Err(e.to_string())
                        }
                    };

                    match outcome {
                        Ok(tokens) => State::Succeeded {
                            tokens,
                            attempts: n,
                        },
                        Err(failure) if n < self.max_attempts => {
                            tracing::debug!(
                                %failure,
                                pause_ms = self.retry_pause.as_millis() as u64,
                                "pausing before retry"
                            );
                            tokio::time::sleep(self.retry_pause).await;
                            State::Attempting(n + 1)
                        }
                        Err(_) => State::Exhausted,
                    }
                }
                State::Succeeded { tokens, attempts } => {
                    return BatchCorrection {
                        tokens: tokens.into_iter().map(Some).collect(),
                        attempts,
                        exhausted: false,
                    };
                }
                State::Exhausted => {
                    tracing::error!(
                        attempts = self.max_attempts,
                        items = expected,
                        provider = self.client.provider_name(),
                        "no valid response for batch; falling back to original OCR values"
                    );
                    return BatchCorrection {
                        tokens: vec![None; expected],
                        attempts: self.max_attempts,
                        exhausted: true,
                    };
                }
            };
        }
    }
}

/// Reconcile a batch result with its items: empty or missing corrections
/// keep the OCR token.
pub fn resolve(item: &FixItem, corrected: Option<&str>) -> String {
    match corrected {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => item.predicted.clone(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::error::InvokeError;
    use crate::llm::ChatClient;
    use crate::models::ChatMessage;

    /// Replays scripted responses; repeats the last one when exhausted.
    pub struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, String>>>,
        last: Mutex<Option<Result<String, String>>>,
        pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        pub fn new(responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                last: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InvokeError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let next = self.responses.lock().unwrap().pop_front();
            let response = match next {
                Some(r) => {
                    *self.last.lock().unwrap() = Some(r.clone());
                    r
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err("no scripted response".to_string())),
            };
            response.map_err(|message| InvokeError::Connectivity {
                provider: "scripted".to_string(),
                attempts: 1,
                message,
            })
        }
    }

    type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String, String> + Send + Sync>;

    /// Computes each response from the request.
    pub struct FnClient {
        respond: Responder,
        pub calls: std::sync::atomic::AtomicUsize,
    }

    impl FnClient {
        pub fn new(
            respond: impl Fn(&[ChatMessage]) -> Result<String, String> + Send + Sync + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                calls: Default::default(),
            }
        }

        /// Answers every query line with its OCR token, letter `O` → digit `0`.
        pub fn zero_fixer() -> Self {
            Self::new(|messages| {
                let user = &messages.last().ok_or("no messages")?.content;
                Ok(query_tokens(user)
                    .iter()
                    .map(|t| t.replace('O', "0"))
                    .collect::<Vec<_>>()
                    .join("\n"))
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    /// Counts ERROR-level events while installed as the thread's default
    /// subscriber.
    #[derive(Clone, Default)]
    pub struct ErrorEvents(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl ErrorEvents {
        pub fn install(&self) -> tracing::subscriber::DefaultGuard {
            use tracing_subscriber::layer::SubscriberExt;
            tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
        }

        pub fn count(&self) -> usize {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    /// OCR tokens of the `- OCR: <token> ; LEN: ...` query lines, in order.
    pub fn query_tokens(user_message: &str) -> Vec<String> {
        user_message
            .lines()
            .filter_map(|l| l.strip_prefix("- OCR: "))
            .filter_map(|rest| rest.split(" ; LEN: ").next())
            .map(str::to_string)
            .collect()
    }

    #[async_trait]
    impl ChatClient for FnClient {
        fn provider_name(&self) -> &str {
            "fn"
        }

        fn model_name(&self) -> &str {
            "fn-model"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InvokeError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            (self.respond)(messages).map_err(|message| InvokeError::Connectivity {
                provider: "fn".to_string(),
                attempts: 1,
                message,
            })
        }
    }
}
