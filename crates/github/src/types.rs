use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the executor knows about a finished task; the PR title and body are
/// rendered from this rather than passed in pre-built.
#[derive(Debug, Clone)]
pub struct PrSpec {
    pub task_id: String,
    pub task_name: String,
    pub summary: Option<String>,
    pub branch: String,
    pub base: String,
    pub draft: bool,
}

impl PrSpec {
    pub fn title(&self) -> String {
        format!("{}: {}", self.task_id, self.task_name)
    }

    pub fn body(&self) -> String {
        let mut body = String::new();
        if let Some(summary) = &self.summary {
            body.push_str(summary);
            body.push_str("\n\n");
        }
        body.push_str(&format!(
            "Automated implementation of task {} on branch `{}`.",
            self.task_id, self.branch
        ));
        body
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub head_branch: String,
    pub base_branch: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PrSpec {
        PrSpec {
            task_id: "T01-002".to_string(),
            task_name: "Session store".to_string(),
            summary: Some("Persist sessions in SQLite.".to_string()),
            branch: "demo/t01-002-session-store".to_string(),
            base: "main".to_string(),
            draft: false,
        }
    }

    #[test]
    fn test_title_is_id_then_name() {
        assert_eq!(spec().title(), "T01-002: Session store");
    }

    #[test]
    fn test_body_leads_with_summary() {
        let body = spec().body();
        assert!(body.starts_with("Persist sessions in SQLite."));
        assert!(body.contains("demo/t01-002-session-store"));
    }

    #[test]
    fn test_body_without_summary_still_names_the_task() {
        let mut spec = spec();
        spec.summary = None;
        assert!(spec.body().contains("T01-002"));
    }
}
