// ABOUTME: Per-run record of sent test questions and the replies that came
// ABOUTME: back, plus the scoring pass that turns them into a report.

use chrono::{DateTime, Utc};
use quorum_core::IntegrationTestCase;

use super::similarity::jaro_winkler;

/// One test case scheduled for a run, attributed to the declaring module.
#[derive(Debug, Clone)]
pub struct PlannedCase {
    pub module: String,
    pub case: IntegrationTestCase,
}

impl PlannedCase {
    /// Stand-in for a module that declares no cases. Nothing answers its
    /// question, so it always scores FAILED and shows up in the report.
    pub fn failing_placeholder(module: &str) -> Self {
        Self {
            module: module.to_string(),
            case: IntegrationTestCase::exact(
                format!("Module {} declares no integration test cases", module),
                "this placeholder case cannot pass",
            ),
        }
    }
}

/// Outcome of one test case. `Pending` never survives to report time: the
/// scoring pass converts every unanswered case to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseResult {
    Pending,
    Passed,
    Failed,
}

impl CaseResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseResult::Pending => "PENDING",
            CaseResult::Passed => "PASSED",
            CaseResult::Failed => "FAILED",
        }
    }
}

/// One question slot in a run: the case, its correlation id, and whatever
/// reply was matched back to it.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub question_id: usize,
    pub module: String,
    pub case: IntegrationTestCase,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_response: Option<String>,
    pub result: CaseResult,
}

impl SessionEntry {
    /// Human-readable status line for the run report.
    pub fn status_line(&self) -> String {
        format!(
            "QUESTION # {}: {}\nThe sent message was '{}'\nthe expected message was '{}'\nthe received message was '{}'",
            self.question_id,
            self.result.as_str(),
            truncate(&self.case.question, 200),
            truncate(&self.case.expected_response, 200),
            truncate(self.received_response.as_deref().unwrap_or(""), 200),
        )
    }
}

/// Scoring summary for one run.
#[derive(Debug, Clone, Copy)]
pub struct SessionReport {
    pub passed: usize,
    pub total: usize,
}

impl SessionReport {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64
    }

    pub fn summary_line(&self) -> String {
        format!(
            "The percentage of tests passed is {:.2}%",
            self.ratio() * 100.0
        )
    }
}

/// Mutable state of one self-test run.
///
/// Created when a run starts, fed by the response-recording path as tagged
/// replies stream back, scored once, and discarded at run end. Correlation
/// ids are the entry indices, assigned in strict send order.
#[derive(Debug, Default)]
pub struct DispatchSession {
    entries: Vec<SessionEntry>,
}

impl DispatchSession {
    pub fn from_plan(plan: &[PlannedCase]) -> Self {
        let entries = plan
            .iter()
            .enumerate()
            .map(|(question_id, planned)| SessionEntry {
                question_id,
                module: planned.module.clone(),
                case: planned.case.clone(),
                sent_at: None,
                received_response: None,
                result: CaseResult::Pending,
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    pub fn mark_sent(&mut self, question_id: usize) {
        if let Some(entry) = self.entries.get_mut(question_id) {
            entry.sent_at = Some(Utc::now());
        }
    }

    /// Attach a received reply to its originating question by correlation id.
    /// Returns false for ids outside the run (logged upstream, not an error).
    pub fn record_response(&mut self, question_id: usize, text: String) -> bool {
        match self.entries.get_mut(question_id) {
            Some(entry) => {
                entry.received_response = Some(text);
                true
            }
            None => false,
        }
    }

    /// Score every entry. Unanswered cases are FAILED, never left PENDING.
    pub fn score(&mut self) -> SessionReport {
        let mut passed = 0;
        for entry in &mut self.entries {
            let received = entry
                .received_response
                .as_deref()
                .unwrap_or("")
                .trim()
                .to_string();

            let ok = if let Some(pattern) = &entry.case.expected_regex {
                match regex::Regex::new(pattern) {
                    Ok(re) => re.is_match(&received),
                    Err(e) => {
                        // Patterns are validated at startup; a failure here
                        // still must not take the run down.
                        tracing::warn!(
                            module = %entry.module,
                            pattern = %pattern,
                            error = %e,
                            "Invalid expectation regex, marking case failed"
                        );
                        false
                    }
                }
            } else if entry.case.minimum_allowed_similarity == 1.0 {
                !received.is_empty() && entry.case.expected_response == received
            } else {
                !received.is_empty()
                    && jaro_winkler(&entry.case.expected_response, &received)
                        >= entry.case.minimum_allowed_similarity
            };

            entry.result = if ok {
                passed += 1;
                CaseResult::Passed
            } else {
                CaseResult::Failed
            };
        }
        SessionReport {
            passed,
            total: self.entries.len(),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
