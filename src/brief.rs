//! Brief assembly (C9): renders a single deterministic prompt string for
//! a task about to be dispatched. The five templates (coding, review,
//! retry-coding, retry-review, replan) are fixed `format!` strings, the
//! same style as the teacher's `ClaudeRunner::generate_prompt` — no
//! generic templating engine, just string assembly over a gathered
//! context.

use crate::domain::{Event, EventKind, Task, TaskKind};
use crate::phase::Phase;

/// Everything the five templates below can draw on. Assembled by the
/// engine from a snapshot plus the event log before a dispatch.
pub struct BriefContext<'a> {
    pub phase: &'a Phase,
    pub task: &'a Task,
    /// Completed/skipped dependency tasks, for "what came before" context.
    pub completed_dependencies: &'a [Task],
    /// Events for those dependency tasks carrying a completion summary
    /// (`status_change` payload written by `report_completion`).
    pub dependency_events: &'a [Event],
    /// The most recent `review_verdict` event for the task under review
    /// (retry-coding) or being reviewed (review).
    pub review_verdict_event: Option<&'a Event>,
}

/// Render the prompt for `ctx.task`, choosing the template by kind,
/// retry_count, and review history. A coding task picks up the
/// retry-coding template either because it failed and is being retried
/// in place, or because it is a follow-up task spawned by a
/// `changes_requested` review (same template, different trigger — both
/// need the prior attempt's context folded in). Deterministic for a
/// given context.
pub fn render(ctx: &BriefContext) -> String {
    match ctx.task.kind {
        TaskKind::Coding if ctx.task.retry_count > 0 || ctx.review_verdict_event.is_some() => {
            render_retry_coding(ctx)
        }
        TaskKind::Coding => render_coding(ctx),
        TaskKind::Review if ctx.task.retry_count > 0 => render_retry_review(ctx),
        TaskKind::Review => render_review(ctx),
    }
}

/// Render the plan-revision prompt handed to the Agent when `plan
/// --replan` runs; not tied to a single task.
pub fn render_replan(phase_names: &[String], failure_context: &str) -> String {
    format!(
        "# Replan\n\n\
         The following phases exist so far:\n{}\n\n\
         Revise the plan to account for this failure:\n{}\n",
        phase_names.iter().map(|n| format!("- {n}")).collect::<Vec<_>>().join("\n"),
        failure_context,
    )
}

fn render_coding(ctx: &BriefContext) -> String {
    format!(
        "# Task: {}\n\nPhase: {} ({})\n\n{}\n\n{}",
        ctx.task.name,
        ctx.phase.name,
        ctx.phase.description,
        dependency_section(ctx),
        "Implement this task. Report progress, completion, or failure via the control-plane RPCs.",
    )
}

fn render_review(ctx: &BriefContext) -> String {
    format!(
        "# Review: {}\n\nPhase: {} ({})\n\n{}\n\n{}",
        ctx.task.name,
        ctx.phase.name,
        ctx.phase.description,
        dependency_section(ctx),
        "Review the changes made by the dependency task above. Report verdict \
         (approved or changes_requested) with findings via report_review.",
    )
}

fn render_retry_coding(ctx: &BriefContext) -> String {
    let error_context = ctx.task.error_context.as_deref().unwrap_or("(no error context recorded)");
    let findings = ctx
        .review_verdict_event
        .map(|e| findings_section(e))
        .unwrap_or_else(|| "(no review findings on record)".to_string());

    format!(
        "# Task (retry {}): {}\n\nPhase: {} ({})\n\n\
         ## Prior failure\n{}\n\n## Review findings\n{}\n\n{}",
        ctx.task.retry_count,
        ctx.task.name,
        ctx.phase.name,
        ctx.phase.description,
        error_context,
        findings,
        "Address the prior failure and any review findings above, then retry this task.",
    )
}

fn render_retry_review(ctx: &BriefContext) -> String {
    let error_context = ctx.task.error_context.as_deref().unwrap_or("(no error context recorded)");
    format!(
        "# Review (retry {}): {}\n\nPhase: {} ({})\n\n\
         ## Prior attempt failed\n{}\n\n{}\n\n{}",
        ctx.task.retry_count,
        ctx.task.name,
        ctx.phase.name,
        ctx.phase.description,
        error_context,
        dependency_section(ctx),
        "Review the changes made by the dependency task above. Report verdict \
         (approved or changes_requested) with findings via report_review.",
    )
}

fn findings_section(event: &Event) -> String {
    let findings = event.payload.get("findings").and_then(|v| v.as_array());
    match findings {
        Some(items) if !items.is_empty() => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "(no findings recorded)".to_string(),
    }
}

fn dependency_section(ctx: &BriefContext) -> String {
    if ctx.completed_dependencies.is_empty() {
        return "## Dependencies\n(none)".to_string();
    }
    let mut lines = vec!["## Dependencies".to_string()];
    for dep in ctx.completed_dependencies {
        let summary = ctx
            .dependency_events
            .iter()
            .filter(|e| e.kind == EventKind::StatusChange)
            .find(|e| matches!(&e.subject, crate::domain::EventSubject::Task(id) if id == &dep.id))
            .and_then(|e| e.payload.get("summary"))
            .and_then(|v| v.as_str())
            .unwrap_or("(no summary recorded)");
        lines.push(format!("- {}: {}", dep.name, summary));
    }
    lines.join("\n")
}
