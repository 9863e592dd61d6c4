//! Completion-token detection.
//!
//! The agent subprocess signals that it considers the task done by printing
//! a fixed token anywhere in its combined output, independent of its exit
//! code. A payload variant `<token-open>:{json}<token-close>` carries
//! structured metadata about the work.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The token the default engine looks for.
pub const DEFAULT_COMPLETION_TOKEN: &str = "<promise>COMPLETE</promise>";

/// Structured metadata optionally attached to the completion token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompletionMeta {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, rename = "filesChanged")]
    pub files_changed: Option<Vec<String>>,
    #[serde(default, rename = "testsRun")]
    pub tests_run: Option<u32>,
    #[serde(default, rename = "testsPassed")]
    pub tests_passed: Option<u32>,
}

/// Substring match of the completion token, including the payload variant.
pub fn contains_token(output: &str, token: &str) -> bool {
    if output.contains(token) {
        return true;
    }
    extract_meta(output, token).is_some()
}

/// Parse the `{json}` payload out of `<open>:{...}</close>`, when present.
/// A bare token yields `None`; callers treat that as completion without
/// metadata.
pub fn extract_meta(output: &str, token: &str) -> Option<CompletionMeta> {
    let (open, close) = split_token(token)?;
    let pattern = format!(
        "(?s){}:(\\{{.*?\\}}){}",
        regex::escape(open),
        regex::escape(close)
    );
    let re = Regex::new(&pattern).ok()?;
    let payload = re.captures(output)?.get(1)?.as_str();

    match serde_json::from_str(payload) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!(error = %e, "completion payload is not valid JSON, ignoring");
            None
        }
    }
}

/// Split `<promise>COMPLETE</promise>` into the part before the closing tag
/// and the closing tag itself. Tokens without a closing tag have no payload
/// variant.
fn split_token(token: &str) -> Option<(&str, &str)> {
    let idx = token.rfind("</")?;
    Some((&token[..idx], &token[idx..]))
}
