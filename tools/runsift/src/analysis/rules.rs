use super::markers::LineMarker;
use super::truncate_chars;
use regex::Regex;
use std::sync::LazyLock;

pub const EXIT_CODE_PHRASE: &str = "Process completed with exit code";
pub const TEST_FAILURE_MAX_CHARS: usize = 200;

/// Lines inspected per traceback, the trigger line included.
pub const TRACEBACK_WINDOW: usize = 40;
pub const TRACEBACK_TRAILING_CONTEXT: usize = 4;
pub const TRACEBACK_MAX_LINES: usize = 30;
const TRACEBACK_FILE_LOOKBACK: usize = 3;

static EXIT_CODE_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"exit code (\d+)").ok());

/// Failure evidence produced by one rule for one line. Step attribution is
/// left to the extractor, which owns the step context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    ErrorMarker(String),
    ExitCode(String),
    Traceback(String),
    TestFailure(String),
}

/// One line of the log together with everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct LineView<'a> {
    pub lines: &'a [&'a str],
    pub index: usize,
    pub markers: &'a [LineMarker],
}

impl<'a> LineView<'a> {
    pub fn text(&self) -> &'a str {
        self.lines[self.index]
    }
}

pub type LineRule = fn(&LineView<'_>) -> Option<Finding>;

/// Applied to every line in this order.
pub const LINE_RULES: [LineRule; 4] = [
    error_marker_rule,
    exit_code_rule,
    traceback_rule,
    test_failure_rule,
];

pub fn error_marker_rule(view: &LineView<'_>) -> Option<Finding> {
    view.markers.iter().find_map(|marker| match marker {
        LineMarker::Error(text) => Some(Finding::ErrorMarker(text.clone())),
        _ => None,
    })
}

pub fn exit_code_rule(view: &LineView<'_>) -> Option<Finding> {
    let text = view.text();
    if !text.contains(EXIT_CODE_PHRASE) {
        return None;
    }
    let regex = EXIT_CODE_REGEX.as_ref()?;
    let code = regex.captures(text)?.get(1)?.as_str();
    Some(Finding::ExitCode(code.to_string()))
}

pub fn traceback_rule(view: &LineView<'_>) -> Option<Finding> {
    if !view.text().to_lowercase().contains("traceback") {
        return None;
    }
    Some(Finding::Traceback(capture_traceback(view.lines, view.index)))
}

pub fn test_failure_rule(view: &LineView<'_>) -> Option<Finding> {
    let text = view.text();
    let failure_word = text.contains("FAIL") || text.contains("ERROR");
    if !failure_word || !text.to_lowercase().contains("test") {
        return None;
    }
    Some(Finding::TestFailure(truncate_chars(
        text.trim(),
        TEST_FAILURE_MAX_CHARS,
    )))
}

/// Collects the traceback starting at `start` by bounded lookahead.
///
/// Capture ends after the first exception-style line plus up to four
/// trailing non-marker lines. Without one, a runner marker line ends it
/// unless the last few captured lines still look like stack frames.
pub fn capture_traceback(lines: &[&str], start: usize) -> String {
    let mut captured = vec![lines[start]];
    let window_end = (start + TRACEBACK_WINDOW).min(lines.len());

    for (index, next) in lines.iter().enumerate().take(window_end).skip(start + 1) {
        captured.push(*next);

        if is_exception_line(next) {
            let trailing_end = (index + 1 + TRACEBACK_TRAILING_CONTEXT).min(lines.len());
            for extra in &lines[index + 1..trailing_end] {
                let trimmed = extra.trim();
                if trimmed.is_empty() || trimmed.starts_with("##") {
                    break;
                }
                captured.push(*extra);
            }
            break;
        }

        if next.contains("##[") && !next.contains("Traceback") && !next.contains("File \"") {
            let recent = &captured[captured.len().saturating_sub(TRACEBACK_FILE_LOOKBACK)..];
            if !recent.iter().any(|line| line.contains("File \"")) {
                break;
            }
        }
    }

    captured
        .into_iter()
        .take(TRACEBACK_MAX_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_exception_line(line: &str) -> bool {
    line.contains("Error:") || line.contains("Exception:") || line.contains("Warning:")
}
