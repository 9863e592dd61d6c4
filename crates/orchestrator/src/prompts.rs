//! Prompt construction for task execution. The engine only ever sees the
//! final string built here.

use atzentis_core::Task;

/// Build the implementation prompt for one task.
pub fn build_task_prompt(task: &Task, completion_token: &str) -> String {
    let mut prompt = format!("# Task {}: {}\n\n", task.id, task.name);

    if let Some(description) = &task.description {
        prompt.push_str(description);
        prompt.push_str("\n\n");
    }

    push_section(&mut prompt, "Requirements", &task.requirements);
    push_section(&mut prompt, "Business rules", &task.business_rules);
    push_section(&mut prompt, "Acceptance criteria", &task.acceptance_criteria);
    push_section(&mut prompt, "Testing requirements", &task.testing_requirements);

    if !task.files.is_empty() {
        prompt.push_str("## Relevant files\n\n");
        for file in &task.files {
            prompt.push_str("- `");
            prompt.push_str(file);
            prompt.push_str("`\n");
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "## Completion\n\n\
         Work in the current directory. Implement the task fully, run the \
         project's tests, and commit nothing yourself. When and only when \
         the task is done, print exactly:\n\n{}\n",
        completion_token
    ));

    prompt
}

fn push_section(prompt: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    prompt.push_str("## ");
    prompt.push_str(title);
    prompt.push_str("\n\n");
    for item in items {
        prompt.push_str("- ");
        prompt.push_str(item);
        prompt.push('\n');
    }
    prompt.push('\n');
}
