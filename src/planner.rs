//! Plan generation (`tc plan`): invokes the configured agent with a
//! prompt asking it to emit a `<plan>...</plan>` block, then parses and
//! materializes that block into domain entities. The tag-then-JSON
//! shape mirrors the teacher's decomposition parser, swapping
//! `<decomposition>` for `<plan>`; materialization is new, since the
//! teacher never turns agent output directly into scheduler state.

use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskKind};
use crate::errors::TcError;
use crate::phase::Phase;
use crate::repository::Dependency;

/// Something that can turn a prompt into raw agent output. Planning is
/// a one-shot blocking call made from the CLI, outside the async tick
/// loop, so unlike `PaneWrapper` this is synchronous.
pub trait Planner: Send + Sync {
    fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Spawns the configured agent binary, feeds it `prompt` on stdin, and
/// captures stdout.
pub struct ProcessPlanner {
    agent_cmd: String,
}

impl ProcessPlanner {
    pub fn new(agent_cmd: impl Into<String>) -> Self {
        Self { agent_cmd: agent_cmd.into() }
    }
}

impl Planner for ProcessPlanner {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        let mut child = Command::new(&self.agent_cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child
            .stdin
            .take()
            .expect("stdin requested above")
            .write_all(prompt.as_bytes())?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            anyhow::bail!(
                "agent command {:?} exited with {:?}: {}",
                self.agent_cmd,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr),
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A fixed, canned response for tests.
pub struct FakePlanner {
    output: String,
}

impl FakePlanner {
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into() }
    }
}

impl Planner for FakePlanner {
    fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.output.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPlan {
    pub phases: Vec<RawPhase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPhase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tasks: Vec<String>,
}

/// Parse a `<plan>{json}</plan>` block out of raw agent output.
pub fn parse_plan(output: &str) -> Result<RawPlan, TcError> {
    const START: &str = "<plan>";
    const END: &str = "</plan>";

    let start = output.find(START).ok_or_else(|| TcError::Validation {
        message: "agent output did not contain a <plan> block".into(),
    })?;
    let content_start = start + START.len();
    let end = output[content_start..].find(END).ok_or_else(|| TcError::Validation {
        message: "agent output had an unterminated <plan> block".into(),
    })?;
    let json = output[content_start..content_start + end].trim();

    serde_json::from_str(json).map_err(|e| TcError::Validation { message: format!("malformed plan JSON: {e}") })
}

/// Turn a parsed plan into domain entities ready for
/// `Repository::replace_plan`. Tasks within a phase default to a
/// sequential dependency chain: each depends on the one before it in
/// the same phase, the simplest ordering that respects "the earliest
/// runnable coding task" dispatch rule without the agent having to
/// spell out dependencies explicitly.
pub fn materialize(plan: &RawPlan, project_id: &str) -> (Vec<Phase>, Vec<Task>, Vec<Dependency>) {
    let mut phases = Vec::new();
    let mut tasks = Vec::new();
    let mut deps = Vec::new();

    for (phase_idx, raw_phase) in plan.phases.iter().enumerate() {
        let phase_id = format!("phase-{}", phase_idx + 1);
        let phase_seq = (phase_idx + 1) as u32;
        phases.push(Phase::new(
            phase_id.clone(),
            project_id.to_string(),
            phase_seq,
            raw_phase.name.clone(),
            raw_phase.description.clone(),
        ));

        let mut previous_task_id: Option<String> = None;
        for (task_idx, task_name) in raw_phase.tasks.iter().enumerate() {
            let task_id = uuid::Uuid::new_v4().to_string();
            let task_seq = (task_idx + 1) as u32;
            tasks.push(Task::new(
                task_id.clone(),
                phase_id.clone(),
                task_seq,
                TaskKind::Coding,
                task_name.clone(),
                None,
            ));
            if let Some(prev) = &previous_task_id {
                deps.push((task_id.clone(), prev.clone()));
            }
            previous_task_id = Some(task_id);
        }
    }

    (phases, tasks, deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_plan_block() {
        let output = "here is my plan\n<plan>\n{\"phases\":[{\"name\":\"Setup\",\"description\":\"bootstrap\",\"tasks\":[\"scaffold\"]}]}\n</plan>\nthanks";
        let plan = parse_plan(output).unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].tasks, vec!["scaffold".to_string()]);
    }

    #[test]
    fn missing_plan_tag_is_a_validation_error() {
        let err = parse_plan("no tags here").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn malformed_json_inside_tags_is_a_validation_error() {
        let err = parse_plan("<plan>not json</plan>").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn materialize_chains_tasks_sequentially_within_a_phase() {
        let plan = RawPlan {
            phases: vec![RawPhase {
                name: "Phase 1".into(),
                description: "".into(),
                tasks: vec!["A".into(), "B".into()],
            }],
        };
        let (phases, tasks, deps) = materialize(&plan, "proj");
        assert_eq!(phases.len(), 1);
        assert_eq!(tasks.len(), 2);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, tasks[1].id);
        assert_eq!(deps[0].1, tasks[0].id);
    }

    #[test]
    fn fake_planner_returns_its_canned_output() {
        let planner = FakePlanner::new("canned");
        assert_eq!(planner.generate("anything").unwrap(), "canned");
    }
}
