//! JSONL task loading.

use std::collections::HashSet;
use std::path::Path;

use prophet_core::{Task, TaskId};
use tracing::debug;

use crate::error::{DatasetError, Result};
use crate::schema::TaskRow;

/// Parse a JSONL document into validated tasks.
///
/// Fails on the first malformed line, schema violation or duplicate id, so a
/// bad dataset never runs partially. Blank lines are ignored; rows without a
/// `task_id` are numbered `task_0`, `task_1`, ... in file order.
pub fn parse_tasks(text: &str, offset: i64) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut auto_idx = 0usize;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|source| DatasetError::InvalidJson { line: line_no, source })?;

        let row = TaskRow::parse(value)
            .map_err(|source| DatasetError::InvalidRow { line: line_no, source })?;

        let task_id = match &row.task_id {
            Some(id) => id.clone(),
            None => {
                let id = format!("task_{}", auto_idx);
                auto_idx += 1;
                id
            }
        };

        if !seen.insert(task_id.clone()) {
            return Err(DatasetError::DuplicateId { line: line_no, task_id });
        }

        let task = row
            .into_task(TaskId::new(task_id), offset)
            .map_err(|source| DatasetError::InvalidRow { line: line_no, source })?;
        tasks.push(task);
    }

    debug!(count = tasks.len(), "parsed task rows");
    Ok(tasks)
}

/// Load and validate tasks from a JSONL file.
pub async fn load_tasks(path: &Path, offset: i64) -> Result<Vec<Task>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
    parse_tasks(&text, offset)
}
