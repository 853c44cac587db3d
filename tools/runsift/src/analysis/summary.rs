use super::extractor::{ExitCodeRecord, FailedStep, UNKNOWN_STEP};
use super::truncate_chars;

pub const SUMMARY_TITLE: &str = "ERROR SUMMARY - Issues Found in This Workflow Run";
pub const FULL_LOG_BANNER: &str = "Full log follows below:";
pub const FALLBACK_LINE: &str = "No explicit errors detected in log format.";

pub const STEP_PREVIEW_CHARS: usize = 250;
pub const KEY_ERROR_PREVIEW_CHARS: usize = 300;
pub const KEY_ERROR_LIMIT: usize = 5;
pub const EXIT_CODE_LIMIT: usize = 5;

const RULE_WIDTH: usize = 80;

/// Renders the report placed in front of a saved log. Pure: the same
/// findings always produce the same text, which ends with a newline.
pub fn render_summary(
    failed_steps: &[FailedStep],
    error_messages: &[String],
    detected_patterns: &[&str],
    exit_codes: &[ExitCodeRecord],
) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let mut out = vec![heavy.clone(), SUMMARY_TITLE.to_string(), heavy.clone(), String::new()];
    let mut emitted = false;

    if !failed_steps.is_empty() {
        emitted = true;
        push_section_header(&mut out, "FAILED STEPS:");
        for step in failed_steps {
            out.push(format!("  • {}", step.name));
            if let Some(first) = step.errors.first() {
                out.push(format!(
                    "    Error: {}",
                    truncate_chars(&collapse_newlines(first), STEP_PREVIEW_CHARS)
                ));
                if step.errors.len() > 1 {
                    out.push(format!(
                        "    ({} more error(s) - see full log)",
                        step.errors.len() - 1
                    ));
                }
            }
        }
        out.push(String::new());
    }

    if !error_messages.is_empty() {
        emitted = true;
        push_section_header(&mut out, "KEY ERROR MESSAGES:");
        for (position, message) in error_messages.iter().take(KEY_ERROR_LIMIT).enumerate() {
            let collapsed = collapse_newlines(message);
            let mut preview = truncate_chars(&collapsed, KEY_ERROR_PREVIEW_CHARS);
            if collapsed.chars().count() > KEY_ERROR_PREVIEW_CHARS {
                preview.push_str("...");
            }
            out.push(format!("  {}. {preview}", position + 1));
        }
        out.push(String::new());
    }

    if !detected_patterns.is_empty() {
        emitted = true;
        push_section_header(&mut out, "DETECTED ISSUE TYPES:");
        for description in detected_patterns {
            out.push(format!("  • {description}"));
        }
        out.push(String::new());
    }

    let non_zero = exit_codes
        .iter()
        .filter(|record| record.is_failure())
        .take(EXIT_CODE_LIMIT)
        .collect::<Vec<_>>();
    if !non_zero.is_empty() {
        emitted = true;
        push_section_header(&mut out, "NON-ZERO EXIT CODES:");
        for record in non_zero {
            out.push(format!(
                "  • Exit code {} in: {}",
                record.code,
                record.step.as_deref().unwrap_or(UNKNOWN_STEP)
            ));
        }
        out.push(String::new());
    }

    if !emitted {
        out.push(FALLBACK_LINE.to_string());
        out.push("Check the full log below for details.".to_string());
        out.push(String::new());
    }

    out.push(heavy.clone());
    out.push(FULL_LOG_BANNER.to_string());
    out.push(heavy);
    out.push(String::new());
    out.join("\n")
}

fn push_section_header(out: &mut Vec<String>, title: &str) {
    out.push(title.to_string());
    out.push("-".repeat(RULE_WIDTH));
}

fn collapse_newlines(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}
