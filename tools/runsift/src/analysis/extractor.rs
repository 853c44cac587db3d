use super::markers::{scan_markers, StepContext, END_GROUP_MARKER, GROUP_MARKER};
use super::rules::{Finding, LineView, LINE_RULES};
use super::truncate_chars;
use serde::Serialize;

/// Attribution label for failures seen while no step is open.
pub const UNKNOWN_STEP: &str = "Unknown step";
pub const TRACEBACK_STEP_PREVIEW_CHARS: usize = 1000;
const ERROR_CONTEXT_LIMIT: usize = 8;
// Runner timestamps are matched on this literal prefix only.
const RUNNER_TIMESTAMP_PREFIX: &str = "2025-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub name: String,
    pub errors: Vec<String>,
}

impl FailedStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            errors: Vec::new(),
        }
    }

    /// Appends `error` unless the exact text is already recorded.
    pub fn push_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitCodeRecord {
    pub code: String,
    pub step: Option<String>,
}

impl ExitCodeRecord {
    pub fn is_failure(&self) -> bool {
        self.code != "0"
    }
}

/// Everything the extractor learned from one log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogFindings {
    pub failed_steps: Vec<FailedStep>,
    pub error_messages: Vec<String>,
    pub exit_codes: Vec<ExitCodeRecord>,
}

impl LogFindings {
    pub fn step(&self, name: &str) -> Option<&FailedStep> {
        self.failed_steps.iter().find(|step| step.name == name)
    }

    fn step_mut(&mut self, name: &str) -> &mut FailedStep {
        let position = match self.failed_steps.iter().position(|step| step.name == name) {
            Some(position) => position,
            None => {
                self.failed_steps.push(FailedStep::new(name));
                self.failed_steps.len() - 1
            }
        };
        &mut self.failed_steps[position]
    }

    fn record(&mut self, finding: Finding, current_step: Option<&str>) {
        let step_name = current_step.unwrap_or(UNKNOWN_STEP);
        match finding {
            Finding::ErrorMarker(text) => {
                if text.is_empty() {
                    return;
                }
                self.error_messages.push(text.clone());
                self.step_mut(step_name).push_error(text);
            }
            Finding::ExitCode(code) => {
                let record = ExitCodeRecord {
                    code,
                    step: current_step.map(str::to_string),
                };
                if record.is_failure() && self.step(step_name).is_none() {
                    self.step_mut(step_name)
                        .push_error(format!("Process exited with code {}", record.code));
                }
                self.exit_codes.push(record);
            }
            Finding::Traceback(block) => {
                let preview = truncate_chars(&block, TRACEBACK_STEP_PREVIEW_CHARS);
                self.error_messages.push(block);
                self.step_mut(step_name).push_error(preview);
            }
            Finding::TestFailure(line) => {
                self.step_mut(step_name).push_error(line);
            }
        }
    }
}

/// Lines following an error marker that describe it further.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    active: bool,
    lines: Vec<String>,
}

impl ErrorContext {
    fn enter(&mut self, error_text: &str) {
        self.active = true;
        if !error_text.is_empty() {
            self.lines = vec![error_text.to_string()];
        }
    }

    fn observe(&mut self, line: &str) {
        if !self.active {
            return;
        }
        if !line.trim().is_empty()
            && !line.starts_with("##")
            && !line.starts_with(RUNNER_TIMESTAMP_PREFIX)
        {
            self.lines.push(line.trim().to_string());
            if self.lines.len() > ERROR_CONTEXT_LIMIT {
                self.active = false;
            }
        } else if line.contains(GROUP_MARKER) || line.contains(END_GROUP_MARKER) {
            self.active = false;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Single pass over the log's lines, shared by step tracking and every rule.
#[derive(Debug, Default)]
pub struct FailureExtractor {
    steps: StepContext,
    context: ErrorContext,
    findings: LogFindings,
}

impl FailureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_line(&mut self, lines: &[&str], index: usize) {
        let markers = scan_markers(lines[index]);
        for marker in &markers {
            self.steps.apply(marker);
        }

        let view = LineView {
            lines,
            index,
            markers: &markers,
        };
        let findings = LINE_RULES
            .iter()
            .filter_map(|rule| rule(&view))
            .collect::<Vec<_>>();

        if !findings
            .iter()
            .any(|finding| matches!(finding, Finding::ErrorMarker(_)))
        {
            self.context.observe(view.text());
        }

        for finding in findings {
            if let Finding::ErrorMarker(text) = &finding {
                self.context.enter(text);
            }
            self.findings.record(finding, self.steps.current());
        }
    }

    pub fn steps(&self) -> &StepContext {
        &self.steps
    }

    pub fn error_context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn finish(self) -> LogFindings {
        self.findings
    }
}

pub fn extract_findings(log: &str) -> LogFindings {
    let lines = log.split('\n').collect::<Vec<_>>();
    let mut extractor = FailureExtractor::new();
    for index in 0..lines.len() {
        extractor.process_line(&lines, index);
    }
    extractor.finish()
}
