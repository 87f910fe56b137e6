//! Terminal and JSON rendering of run results.

use crate::runner::{RunReport, TaskReport};
use qch_common::{Fault, ResultSet};
use std::fmt::Write;

const SQL_PREVIEW_CHARS: usize = 160;

fn preview(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > SQL_PREVIEW_CHARS {
        let cut: String = flat.chars().take(SQL_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

fn render_row(columns: &[String], row: &[serde_json::Value]) -> String {
    columns
        .iter()
        .zip(row)
        .map(|(col, value)| match value {
            serde_json::Value::String(s) => format!("{col}={s}"),
            other => format!("{col}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_sample(out: &mut String, sample: &ResultSet) {
    for row in &sample.rows {
        let _ = writeln!(out, "      {}", render_row(&sample.columns, row));
    }
}

fn render_task(out: &mut String, index: usize, total: usize, task: &TaskReport) {
    let m = &task.metrics;
    let _ = writeln!(out, "[{index}/{total}] {}", m.prompt);
    let _ = writeln!(out, "    SQL: {}", preview(&m.sql_query));
    if let Some(kind) = m.chaos {
        let _ = writeln!(out, "    Chaos: {kind}");
    }

    if m.success {
        let _ = writeln!(
            out,
            "    OK: {} rows in {:.2}s after {} attempt(s)",
            m.rows_returned,
            m.execution_time.as_secs_f64(),
            m.attempts
        );
        if let Some(sample) = task.sample.as_ref().filter(|s| !s.is_empty()) {
            render_sample(out, sample);
        }
    } else {
        let class = m.error_class.map(|c| c.as_str()).unwrap_or("unknown");
        let _ = writeln!(out, "    FAILED after {} attempts ({class})", m.attempts);
        if let Some(message) = &m.error_message {
            let _ = writeln!(out, "    Last error: {message}");
        }
    }
}

/// Human-readable report: per-task lines, skipped prompts, summary.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let f = &report.fixtures;
    let _ = writeln!(
        out,
        "Fixtures: {} users, {} subscriptions, {} movies, {} views (seed {})",
        f.users, f.subscriptions, f.movies, f.viewing_history, report.seed
    );
    let _ = writeln!(out, "Generator: {}\n", report.generator);

    let total = report.tasks.len() + report.skipped.len();
    for (idx, task) in report.tasks.iter().enumerate() {
        render_task(&mut out, idx + 1, total, task);
    }

    if !report.skipped.is_empty() {
        let _ = writeln!(out, "\nSkipped ({}):", report.skipped.len());
        for skipped in &report.skipped {
            let _ = writeln!(out, "  {}: {}", skipped.prompt, skipped.reason);
        }
    }

    match &report.summary {
        Some(summary) => {
            let _ = writeln!(out, "\n{summary}");
        }
        None => {
            let _ = writeln!(out, "\nNo queries were executed.");
        }
    }
    out
}

pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// The fault catalogue with its parameters.
pub fn render_faults(catalogue: &[Fault]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:<10} EFFECT", "FAULT", "FAMILY");
    for fault in catalogue {
        let _ = writeln!(out, "{:<20} {:<10} {fault}", fault.kind().as_str(), fault.family());
    }
    out
}
