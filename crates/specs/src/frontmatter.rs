//! Key-value front-matter extraction from task markdown files.
//!
//! The descriptor sits between `---` fences at the top of the file:
//!
//! ```text
//! ---
//! name: Wire up the session store
//! estimate: 4h
//! dependencies: [T01-001, T01-002]
//! files:
//!   - src/store.rs
//!   - src/models.rs
//! ---
//! Narrative body, ignored by the loader.
//! ```

use regex::Regex;

use crate::fields::{FieldValue, Fields};

/// Parse the front-matter block. `None` when the file has no fence; parse
/// errors never surface — unparseable lines are skipped.
pub fn parse(content: &str) -> Option<Fields> {
    let block = extract_block(content)?;
    let key_line = Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*)\s*:\s*(.*)$").ok()?;

    let mut fields = Fields::default();
    let mut open_list: Option<(String, Vec<String>)> = None;

    for line in block.lines() {
        // Indented `- item` lines continue the list opened by the previous
        // bare key.
        if let Some((_, items)) = open_list.as_mut() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('-') && line.starts_with(char::is_whitespace) {
                let item = trimmed[1..].trim();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
                continue;
            }
            let (key, items) = open_list.take().unwrap();
            fields.insert(&key, FieldValue::List(items));
        }

        let Some(caps) = key_line.captures(line) else {
            continue;
        };
        let key = caps.get(1).unwrap().as_str();
        let raw = caps.get(2).unwrap().as_str().trim();

        if raw.is_empty() {
            open_list = Some((key.to_string(), Vec::new()));
        } else if raw.starts_with('[') && raw.ends_with(']') {
            let items = raw[1..raw.len() - 1]
                .split(',')
                .map(|item| item.trim().trim_matches('"').trim_matches('\''))
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
            fields.insert(key, FieldValue::List(items));
        } else {
            let value = raw.trim_matches('"').to_string();
            fields.insert(key, FieldValue::Text(value));
        }
    }

    if let Some((key, items)) = open_list {
        fields.insert(&key, FieldValue::List(items));
    }

    Some(fields)
}

/// The text between the opening `---` fence on the first non-empty line and
/// the next `---` line.
fn extract_block(content: &str) -> Option<&str> {
    let trimmed = content.trim_start_matches(['\u{feff}']);
    let mut lines = trimmed.lines();
    let first = lines.find(|line| !line.trim().is_empty())?;
    if first.trim() != "---" {
        return None;
    }

    let start = trimmed.find("---")? + 3;
    let rest = &trimmed[start..];
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars_and_inline_lists() {
        let content = r#"---
name: Wire up the session store
estimate: 4h
priority: P1
dependencies: [T01-001, T01-002]
---
# Body
"#;

        let fields = parse(content).unwrap();
        assert_eq!(
            fields.text("name").as_deref(),
            Some("Wire up the session store")
        );
        assert_eq!(fields.text("estimate").as_deref(), Some("4h"));
        assert_eq!(
            fields.list("dependencies").unwrap(),
            vec!["T01-001".to_string(), "T01-002".to_string()]
        );
    }

    #[test]
    fn test_parse_bullet_lists() {
        let content = r#"---
files:
  - src/store.rs
  - src/models.rs
acceptance_criteria:
  - store survives reopen
---
"#;

        let fields = parse(content).unwrap();
        assert_eq!(
            fields.list("files").unwrap(),
            vec!["src/store.rs".to_string(), "src/models.rs".to_string()]
        );
        assert_eq!(fields.list("acceptanceCriteria").unwrap().len(), 1);
    }

    #[test]
    fn test_no_fence_returns_none() {
        assert!(parse("# Just a heading\n\nSome text.").is_none());
    }

    #[test]
    fn test_unterminated_fence_returns_none() {
        assert!(parse("---\nname: x\nno closing fence").is_none());
    }

    #[test]
    fn test_unparseable_lines_are_skipped() {
        let content = "---\nname: ok\n???weird line\nestimate: 2h\n---\n";
        let fields = parse(content).unwrap();
        assert_eq!(fields.text("name").as_deref(), Some("ok"));
        assert_eq!(fields.text("estimate").as_deref(), Some("2h"));
    }

    #[test]
    fn test_trailing_list_at_end_of_block() {
        let content = "---\nskills:\n  - rust\n  - sql\n---\n";
        let fields = parse(content).unwrap();
        assert_eq!(
            fields.list("skills").unwrap(),
            vec!["rust".to_string(), "sql".to_string()]
        );
    }
}
