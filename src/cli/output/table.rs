//! Table output formatting for CLI commands
//!
//! Renders agents and tasks using comfy-table with color-coded status cells.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::collections::HashMap;
use std::env;

use super::truncate;
use crate::domain::models::{AgentDescriptor, TaskSnapshot, TaskStatus};

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Format registered agents with their current load.
    pub fn format_agents(
        &self,
        agents: &[AgentDescriptor],
        loads: &HashMap<String, usize>,
        kinds: &HashMap<String, &'static str>,
    ) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&[
            "ID", "Capabilities", "Load", "Priority", "Fallback", "Kind",
        ]));

        for agent in agents {
            let tags: Vec<&str> = agent.capability_tags.iter().map(String::as_str).collect();
            let load = loads.get(&agent.id).copied().unwrap_or(0);
            let fallback = if agent.fallback {
                self.colored("yes", Color::Yellow)
            } else {
                Cell::new("-")
            };

            table.add_row(vec![
                Cell::new(&agent.id),
                Cell::new(truncate(&tags.join(", "), 40)),
                Cell::new(format!("{load}/{}", agent.max_concurrency)),
                Cell::new(agent.priority_class),
                fallback,
                Cell::new(kinds.get(&agent.id).copied().unwrap_or("-")),
            ]);
        }

        table.to_string()
    }

    /// Format task snapshots.
    pub fn format_tasks(&self, tasks: &[TaskSnapshot]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&[
            "ID", "Tags", "Priority", "State", "Attempts", "Detail",
        ]));

        for task in tasks {
            let id = task.id.to_string();
            let tags: Vec<&str> = task.required_tags.iter().map(String::as_str).collect();
            let state = if self.use_colors {
                Cell::new(task.state).fg(status_color(task.state))
            } else {
                Cell::new(format!("{} {}", status_icon(task.state), task.state))
            };
            let detail = match (&task.last_error, &task.result) {
                (_, Some(result)) if task.state == TaskStatus::Succeeded => result.to_string(),
                (Some(error), _) => error.clone(),
                _ => task.assigned_agent_id.clone().unwrap_or_else(|| "-".to_string()),
            };

            table.add_row(vec![
                Cell::new(&id[..8]),
                Cell::new(truncate(&tags.join(", "), 30)),
                Cell::new(task.priority),
                state,
                Cell::new(format!("{}/{}", task.attempt_count, task.max_attempts)),
                Cell::new(truncate(&detail, 50)),
            ]);
        }

        table.to_string()
    }

    fn colored(&self, text: &str, color: Color) -> Cell {
        if self.use_colors {
            Cell::new(text).fg(color)
        } else {
            Cell::new(text)
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(columns: &[&str]) -> Vec<Cell> {
    columns
        .iter()
        .map(|c| Cell::new(c).add_attribute(Attribute::Bold))
        .collect()
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }
    true
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Succeeded => Color::Green,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Assigned => Color::Blue,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Cancelled => Color::DarkGrey,
        TaskStatus::Pending => Color::White,
    }
}

fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Succeeded => "✓",
        TaskStatus::Running => "⟳",
        TaskStatus::Assigned => "→",
        TaskStatus::Failed => "✗",
        TaskStatus::Cancelled => "⊘",
        TaskStatus::Pending => "○",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{normalize_tags, Task, TaskPriority};
    use serde_json::json;

    #[test]
    fn test_format_agents_plain() {
        let formatter = TableFormatter::with_config(false, None);
        let agents = vec![
            AgentDescriptor::new("searcher", ["search"], 2).unwrap(),
            AgentDescriptor::new("generalist", ["general"], 4)
                .unwrap()
                .as_fallback(),
        ];
        let loads = HashMap::from([("searcher".to_string(), 1)]);
        let kinds = HashMap::from([("searcher".to_string(), "echo")]);

        let out = formatter.format_agents(&agents, &loads, &kinds);
        assert!(out.contains("searcher"));
        assert!(out.contains("1/2"));
        assert!(out.contains("0/4"));
        assert!(out.contains("yes"));
        assert!(out.contains("echo"));
    }

    #[test]
    fn test_format_tasks_plain() {
        let formatter = TableFormatter::with_config(false, None);
        let task = Task::new(
            json!({}),
            normalize_tags(["search"]).unwrap(),
            TaskPriority::High,
            3,
            0,
        );
        let out = formatter.format_tasks(&[TaskSnapshot::from(&task)]);
        assert!(out.contains("○ pending"));
        assert!(out.contains("high"));
        assert!(out.contains("0/3"));
        assert!(out.contains(&task.id.to_string()[..8]));
    }
}
