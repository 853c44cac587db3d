//! Heuristic failure analysis for GitHub Actions job logs.
//!
//! Everything here is a pure text-in/text-out transformation: one pass over
//! the log tracks step groups and feeds an ordered list of line rules, a
//! separate scan matches known failure signatures, and the renderer turns
//! both into the summary written ahead of the raw log.

pub mod extractor;
pub mod markers;
pub mod patterns;
pub mod rules;
pub mod summary;

pub use extractor::{extract_findings, ExitCodeRecord, FailedStep, LogFindings, UNKNOWN_STEP};
pub use patterns::detect_patterns;
pub use summary::render_summary;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogAnalysis {
    pub findings: LogFindings,
    pub detected_patterns: Vec<&'static str>,
}

impl LogAnalysis {
    pub fn render(&self) -> String {
        render_summary(
            &self.findings.failed_steps,
            &self.findings.error_messages,
            &self.detected_patterns,
            &self.findings.exit_codes,
        )
    }

    pub fn has_failures(&self) -> bool {
        !self.findings.failed_steps.is_empty()
            || !self.findings.error_messages.is_empty()
            || self.findings.exit_codes.iter().any(ExitCodeRecord::is_failure)
    }
}

pub fn analyze_log(log: &str) -> LogAnalysis {
    LogAnalysis {
        findings: extract_findings(log),
        detected_patterns: detect_patterns(log),
    }
}

pub fn summarize_log(log: &str) -> String {
    analyze_log(log).render()
}

/// The text persisted for a job: summary first, then the untouched log.
pub fn annotate_log(log: &str) -> String {
    let mut annotated = summarize_log(log);
    annotated.push_str(log);
    annotated
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
