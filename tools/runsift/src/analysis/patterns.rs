use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePattern {
    pub pattern: &'static str,
    pub description: &'static str,
}

/// Known failure signatures; table order is report order.
pub const FAILURE_PATTERNS: [FailurePattern; 10] = [
    FailurePattern {
        pattern: r"ImportError|cannot import",
        description: "Import error detected",
    },
    FailurePattern {
        pattern: r"AttributeError|has no attribute",
        description: "Attribute error detected",
    },
    FailurePattern {
        pattern: r"TypeError|unsupported operand",
        description: "Type error detected",
    },
    FailurePattern {
        pattern: r"ValueError|invalid value",
        description: "Value error detected",
    },
    FailurePattern {
        pattern: r"ConnectionError|Connection refused|Connection timeout",
        description: "Connection error detected",
    },
    FailurePattern {
        pattern: r"TimeoutError|timed out",
        description: "Timeout error detected",
    },
    FailurePattern {
        pattern: r"AssertionError|assert.*failed",
        description: "Test assertion failed",
    },
    FailurePattern {
        pattern: r"HTTPError|HTTP \d+",
        description: "HTTP error detected",
    },
    FailurePattern {
        pattern: r"Database error|database.*error|psql.*error",
        description: "Database error detected",
    },
    FailurePattern {
        pattern: r"Test.*failed|pytest.*FAILED",
        description: "Test failure detected",
    },
];

static COMPILED_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    FAILURE_PATTERNS
        .iter()
        .filter_map(|entry| {
            RegexBuilder::new(entry.pattern)
                .case_insensitive(true)
                .build()
                .ok()
                .map(|regex| (regex, entry.description))
        })
        .collect()
});

/// Descriptions of every known failure signature present anywhere in `log`.
pub fn detect_patterns(log: &str) -> Vec<&'static str> {
    let lowered = log.to_lowercase();
    COMPILED_PATTERNS
        .iter()
        .filter(|(regex, _)| regex.is_match(&lowered))
        .map(|(_, description)| *description)
        .collect()
}
