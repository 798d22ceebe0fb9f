// ABOUTME: Arbitration dispatcher: concurrently evaluates every registered
// ABOUTME: module, picks one winner by confidence, and runs its callback.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use quorum_core::{metrics, Candidate, CoreError, DispatchContext, FormattingHints, NormalizedMessage};

use crate::registry::ModuleRegistry;
use crate::runtime::RuntimeContext;

/// Result of dispatching one message.
#[derive(Debug)]
pub enum Outcome {
    /// No module wanted to answer (or the winner faulted). Nothing is sent.
    NoResponse,
    /// One module won arbitration and produced a reply.
    Responded {
        module: String,
        text: String,
        hints: FormattingHints,
    },
}

impl Outcome {
    pub fn is_response(&self) -> bool {
        matches!(self, Outcome::Responded { .. })
    }
}

/// Selects and invokes the winning candidate for each incoming message.
///
/// Evaluation across modules runs concurrently and is bounded per module by
/// `evaluation_timeout`; a module that times out or faults counts as
/// confidence 0 without affecting any other module. The winning callback runs
/// after the evaluation pass, so evaluation latency is bounded by the slowest
/// `evaluate`, never by response generation.
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    runtime: Arc<RuntimeContext>,
    evaluation_timeout: std::time::Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        runtime: Arc<RuntimeContext>,
        evaluation_timeout: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            evaluation_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Evaluate all modules against a message and produce at most one reply.
    ///
    /// Deterministic: identical messages against identical module state yield
    /// the same winner. Ties at the maximum confidence go to the
    /// earliest-registered module, never to an arbitrary one.
    pub async fn dispatch(&self, message: &NormalizedMessage, ctx: &DispatchContext) -> Outcome {
        let start = Instant::now();
        metrics::record_dispatch();

        let evaluations = self.registry.iter().map(|module| {
            let name = module.name().to_string();
            async move {
                match tokio::time::timeout(self.evaluation_timeout, module.evaluate(message, ctx))
                    .await
                {
                    Ok(Ok(candidate)) => (name, candidate),
                    Ok(Err(e)) => {
                        let fault = CoreError::ModuleFault {
                            module: name.clone(),
                            source: e,
                        };
                        tracing::warn!(
                            message_id = %message.id,
                            error = %fault,
                            "Module evaluation faulted, treating as confidence 0"
                        );
                        metrics::record_module_fault(&name);
                        self.runtime.note_module_fault();
                        (name, Candidate::none())
                    }
                    Err(_) => {
                        tracing::warn!(
                            module = %name,
                            message_id = %message.id,
                            timeout = ?self.evaluation_timeout,
                            "Module evaluation timed out, treating as confidence 0"
                        );
                        metrics::record_evaluation_timeout(&name);
                        self.runtime.note_module_fault();
                        (name, Candidate::none())
                    }
                }
            }
        });

        // join_all preserves registration order, which carries the tie-break.
        let mut results: Vec<(String, Candidate)> = join_all(evaluations).await;

        let mut winner_idx: Option<usize> = None;
        for (i, (_, candidate)) in results.iter().enumerate() {
            if candidate.is_none() {
                continue;
            }
            match winner_idx {
                // Strictly greater only: earlier registration wins ties.
                Some(w) if candidate.confidence <= results[w].1.confidence => {}
                _ => winner_idx = Some(i),
            }
        }

        let Some(idx) = winner_idx else {
            metrics::record_dispatch_duration(start.elapsed().as_secs_f64());
            return Outcome::NoResponse;
        };

        let (module, candidate) = results.swap_remove(idx);
        tracing::debug!(
            module = %module,
            confidence = %candidate.confidence,
            why = %candidate.why,
            message_id = %message.id,
            "Candidate won arbitration"
        );

        let text = match candidate.callback {
            Some(callback) => match callback.await {
                Ok(Some(text)) => text,
                Ok(None) => candidate.text,
                Err(e) => {
                    let fault = CoreError::ModuleFault {
                        module: module.clone(),
                        source: e,
                    };
                    tracing::error!(
                        message_id = %message.id,
                        error = %fault,
                        "Winning callback faulted, suppressing response"
                    );
                    metrics::record_module_fault(&module);
                    self.runtime.note_module_fault();
                    metrics::record_dispatch_duration(start.elapsed().as_secs_f64());
                    return Outcome::NoResponse;
                }
            },
            None => candidate.text,
        };

        metrics::record_response(&module);
        metrics::record_dispatch_duration(start.elapsed().as_secs_f64());
        Outcome::Responded {
            module,
            text,
            hints: FormattingHints::plain(),
        }
    }
}
