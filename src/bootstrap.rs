//! Bootstrap predicate verification (`tc verify`): `bootstrap.md` lists
//! one shell-checkable precondition per line; each is executed and its
//! exit status recorded, the same "run it and look at the exit code"
//! contract the teacher's prerequisite checks use, just driven from a
//! file instead of a fixed Rust function list.

use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone)]
pub struct PredicateResult {
    pub predicate: String,
    pub passed: bool,
    pub output: String,
}

/// Run every non-blank line of `bootstrap_md` as a shell command in
/// `working_dir`. A leading markdown bullet (`- ` or `* `) is stripped
/// so the file can double as human-readable documentation.
pub fn verify_predicates(bootstrap_md: &str, working_dir: &Path) -> Vec<PredicateResult> {
    bootstrap_md
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| strip_bullet(line))
        .map(|predicate| run_predicate(predicate, working_dir))
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")).unwrap_or(line)
}

fn run_predicate(predicate: &str, working_dir: &Path) -> PredicateResult {
    let result = Command::new("sh").arg("-c").arg(predicate).current_dir(working_dir).output();
    match result {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            PredicateResult { predicate: predicate.to_string(), passed: output.status.success(), output: text }
        }
        Err(e) => PredicateResult {
            predicate: predicate.to_string(),
            passed: false,
            output: format!("failed to run predicate: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_passing_and_a_failing_predicate_are_both_reported() {
        let bootstrap = "- true\n- false\n";
        let dir = tempfile::tempdir().unwrap();
        let results = verify_predicates(bootstrap, dir.path());
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }

    #[test]
    fn blank_lines_are_ignored() {
        let bootstrap = "- true\n\n\n- true\n";
        let dir = tempfile::tempdir().unwrap();
        let results = verify_predicates(bootstrap, dir.path());
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn predicate_runs_in_the_given_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "hi").unwrap();
        let bootstrap = "test -f marker.txt";
        let results = verify_predicates(bootstrap, dir.path());
        assert!(results[0].passed);
    }
}
