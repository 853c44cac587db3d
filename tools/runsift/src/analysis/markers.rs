use super::truncate_chars;

pub const GROUP_MARKER: &str = "##[group]";
pub const END_GROUP_MARKER: &str = "##[endgroup]";
pub const COMMAND_MARKER: &str = "##[command]";
pub const ERROR_MARKER: &str = "##[error]";

const COMMAND_STEP_PREFIX: &str = "Command: ";
const COMMAND_STEP_MAX_CHARS: usize = 50;

/// Structural marker recognised on a single runner log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMarker {
    GroupOpen(String),
    GroupClose,
    Command(String),
    Error(String),
}

/// Returns the markers found on `line`, in the order their effects apply:
/// group-open, group-close, command, error.
pub fn scan_markers(line: &str) -> Vec<LineMarker> {
    let mut markers = Vec::new();
    if let Some(name) = trailing_text(line, GROUP_MARKER) {
        markers.push(LineMarker::GroupOpen(name.trim().to_string()));
    }
    if line.contains(END_GROUP_MARKER) {
        markers.push(LineMarker::GroupClose);
    }
    if let Some(command) = trailing_text(line, COMMAND_MARKER) {
        markers.push(LineMarker::Command(command.trim().to_string()));
    }
    if line.contains(ERROR_MARKER) {
        markers.push(LineMarker::Error(
            line.replace(ERROR_MARKER, "").trim().to_string(),
        ));
    }
    markers
}

// Text after the first occurrence of `marker`; a marker ending the line yields nothing.
fn trailing_text<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Stack of open step groups plus the step findings are attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepContext {
    stack: Vec<String>,
    current: Option<String>,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, marker: &LineMarker) {
        match marker {
            LineMarker::GroupOpen(name) => {
                self.stack.push(name.clone());
                self.current = Some(name.clone());
            }
            LineMarker::GroupClose => {
                if self.stack.pop().is_some() {
                    self.current = self.stack.last().cloned();
                }
            }
            LineMarker::Command(command) => {
                if self.current().is_none() {
                    self.current = Some(format!(
                        "{COMMAND_STEP_PREFIX}{}",
                        truncate_chars(command, COMMAND_STEP_MAX_CHARS)
                    ));
                }
            }
            LineMarker::Error(_) => {}
        }
    }

    /// Current step; a group opened with a blank name attributes nothing.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref().filter(|name| !name.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{scan_markers, LineMarker, StepContext};

    fn track(lines: &[&str]) -> StepContext {
        let mut steps = StepContext::new();
        for line in lines {
            for marker in scan_markers(line) {
                steps.apply(&marker);
            }
        }
        steps
    }

    #[test]
    fn group_open_takes_trimmed_trailing_text() {
        assert_eq!(
            scan_markers("2025-01-02T10:00:00.0000000Z ##[group]Run tests  \r"),
            vec![LineMarker::GroupOpen("Run tests".to_string())]
        );
        assert!(scan_markers("##[group]").is_empty());
    }

    #[test]
    fn endgroup_is_not_mistaken_for_group_open() {
        assert_eq!(scan_markers("##[endgroup]"), vec![LineMarker::GroupClose]);
    }

    #[test]
    fn error_marker_strips_every_occurrence_and_keeps_prefix() {
        assert_eq!(
            scan_markers("2025-01-02T10:00:00Z ##[error]boom ##[error]again"),
            vec![LineMarker::Error("2025-01-02T10:00:00Z boom again".to_string())]
        );
        assert_eq!(
            scan_markers("##[error]   "),
            vec![LineMarker::Error(String::new())]
        );
    }

    #[test]
    fn nested_groups_restore_parent_on_close() {
        let steps = track(&["##[group]Outer", "##[group]Inner", "##[endgroup]"]);
        assert_eq!(steps.current(), Some("Outer"));
        assert_eq!(steps.depth(), 1);

        let steps = track(&["##[group]Outer", "##[endgroup]"]);
        assert_eq!(steps.current(), None);
        assert_eq!(steps.depth(), 0);
    }

    #[test]
    fn popping_empty_stack_is_a_no_op() {
        let steps = track(&["##[endgroup]", "##[endgroup]"]);
        assert_eq!(steps.current(), None);
        assert_eq!(steps.depth(), 0);
    }

    #[test]
    fn command_synthesizes_step_only_without_current_step() {
        let long = format!("##[command]{}", "x".repeat(80));
        let steps = track(&[long.as_str()]);
        let current = steps.current().expect("synthetic step");
        assert_eq!(current, format!("Command: {}", "x".repeat(50)));
        assert_eq!(steps.depth(), 0);

        let steps = track(&["##[group]Build", "##[command]make all"]);
        assert_eq!(steps.current(), Some("Build"));
    }

    #[test]
    fn first_command_step_sticks_until_a_group_changes_it() {
        let steps = track(&["##[command]npm ci", "##[command]npm test"]);
        assert_eq!(steps.current(), Some("Command: npm ci"));
    }

    #[test]
    fn blank_group_name_attributes_nothing_but_still_nests() {
        let steps = track(&["##[group]Build", "##[group]   "]);
        assert_eq!(steps.current(), None);
        assert_eq!(steps.depth(), 2);
        let steps = track(&["##[group]Build", "##[group]   ", "##[endgroup]"]);
        assert_eq!(steps.current(), Some("Build"));
    }
}
