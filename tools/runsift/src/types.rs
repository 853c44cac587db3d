use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conclusion {
    Failure,
    Success,
    Other,
}

impl Conclusion {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("failure") => Self::Failure,
            Some("success") => Self::Success,
            _ => Self::Other,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Failure => "[FAIL]",
            Self::Success => "[PASS]",
            Self::Other => "[RUN]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub html_url: String,
}

impl WorkflowRun {
    pub fn conclusion(&self) -> Conclusion {
        Conclusion::parse(self.conclusion.as_deref())
    }

    pub fn short_sha(&self) -> &str {
        short_sha(&self.head_sha)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunList {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl Job {
    pub fn conclusion(&self) -> Conclusion {
        Conclusion::parse(self.conclusion.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobList {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size_in_bytes: u64,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    /// `sha256:<hex>` when the API reports one.
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactList {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Renders `1234567` as `1,234,567`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (position, ch) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{group_thousands, short_sha, Conclusion, RunList};

    #[test]
    fn run_list_tolerates_missing_optional_fields() {
        let list: RunList = serde_json::from_str(
            r#"{"total_count": 2, "workflow_runs": [{"id": 7, "head_sha": "abcdef0123", "conclusion": null}]}"#,
        )
        .expect("parse");
        assert_eq!(list.workflow_runs[0].conclusion(), Conclusion::Other);
        assert_eq!(list.workflow_runs[0].short_sha(), "abcdef0");
    }

    #[test]
    fn conclusion_icons() {
        assert_eq!(Conclusion::parse(Some("failure")).icon(), "[FAIL]");
        assert_eq!(Conclusion::parse(Some("success")).icon(), "[PASS]");
        assert_eq!(Conclusion::parse(Some("cancelled")).icon(), "[RUN]");
    }

    #[test]
    fn helpers_format_for_display() {
        assert_eq!(short_sha("abc"), "abc");
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }
}
