//! Integration tests for the modprog binary
//!
//! Each test works in its own temporary data directory and drives the
//! CLI end to end: init, import, record, evaluate.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const COURSE: &str = r#"{
    "learners": [1],
    "modules": [
        {
            "id": 10,
            "name": "Orientation",
            "items": [
                {"id": 100, "position": 1, "requirement": {"type": "must_view"}},
                {"id": 101, "position": 2, "requirement": {"type": "min_score", "threshold": 70}}
            ]
        },
        {
            "id": 20,
            "name": "Week 1",
            "prerequisite_module_ids": [10],
            "require_sequential_progress": true,
            "items": [
                {"id": 200, "position": 1, "requirement": {"type": "must_submit"}},
                {"id": 201, "position": 2, "requirement": {"type": "must_view"}}
            ]
        }
    ],
    "completions": [
        {"learner_id": 1, "item_id": 100, "kind": "must_view"},
        {"learner_id": 1, "item_id": 101, "kind": "min_score", "score": 65}
    ]
}"#;

/// Run modprog against a data directory and return (success, stdout, stderr)
fn run_modprog(data_dir: &Path, args: &[&str]) -> (bool, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_modprog"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute modprog");

    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

fn setup_course() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let (success, _, stderr) = run_modprog(temp.path(), &["init"]);
    assert!(success, "init should succeed: {}", stderr);

    let course_path = temp.path().join("course.json");
    std::fs::write(&course_path, COURSE).unwrap();
    let (success, stdout, stderr) = run_modprog(temp.path(), &["import", course_path.to_str().unwrap()]);
    assert!(success, "import should succeed: {}", stderr);
    assert!(stdout.contains("2 modules"), "unexpected import output: {}", stdout);
    temp
}

fn evaluate_json(data_dir: &Path) -> serde_json::Value {
    let (success, stdout, stderr) = run_modprog(data_dir, &["evaluate", "--learner", "1", "--json"]);
    assert!(success, "evaluate should succeed: {}", stderr);
    serde_json::from_str(&stdout).expect("evaluate --json should print JSON")
}

#[test]
fn test_version() {
    let temp = TempDir::new().unwrap();
    let (success, stdout, _) = run_modprog(temp.path(), &["--version"]);
    assert!(success);
    assert!(stdout.contains("modprog"));
}

#[test]
fn test_status_before_init() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nowhere");
    let (success, stdout, _) = run_modprog(&missing, &["status"]);
    assert!(success);
    assert!(stdout.contains("NOT INITIALIZED"));
}

#[test]
fn test_init_writes_config_and_status_counts() {
    let temp = setup_course();
    assert!(temp.path().join("config.toml").exists());
    assert!(temp.path().join("progress.sqlite").exists());

    let (success, stdout, _) = run_modprog(temp.path(), &["status"]);
    assert!(success);
    assert!(stdout.contains("Modules: 2"), "status output: {}", stdout);
    assert!(stdout.contains("Items: 4"), "status output: {}", stdout);
}

#[test]
fn test_evaluate_then_complete() {
    let temp = setup_course();

    let results = evaluate_json(temp.path());
    assert_eq!(results["10"]["workflow_state"], "started");
    assert_eq!(results["20"]["workflow_state"], "locked");

    let (success, _, stderr) = run_modprog(
        temp.path(),
        &["record", "--learner", "1", "--item", "101", "--kind", "min_score", "--score", "82"],
    );
    assert!(success, "record should succeed: {}", stderr);

    let results = evaluate_json(temp.path());
    assert_eq!(results["10"]["workflow_state"], "completed");
    assert_eq!(results["20"]["workflow_state"], "unlocked");
    assert_eq!(results["20"]["current_position"], 1);
}

#[test]
fn test_completed_module_survives_forget() {
    let temp = setup_course();
    run_modprog(
        temp.path(),
        &["record", "--learner", "1", "--item", "101", "--kind", "min_score", "--score", "90"],
    );
    assert_eq!(evaluate_json(temp.path())["10"]["workflow_state"], "completed");

    let (success, stdout, _) = run_modprog(
        temp.path(),
        &["forget", "--learner", "1", "--item", "101", "--kind", "min_score"],
    );
    assert!(success);
    assert!(stdout.contains("Deleted"));
    assert_eq!(evaluate_json(temp.path())["10"]["workflow_state"], "completed");
}

#[test]
fn test_record_min_score_requires_score() {
    let temp = setup_course();
    let (success, _, stderr) = run_modprog(
        temp.path(),
        &["record", "--learner", "1", "--item", "101", "--kind", "min_score"],
    );
    assert!(!success);
    assert!(stderr.contains("--score"));
}

#[test]
fn test_unknown_module_fails() {
    let temp = setup_course();
    let (success, _, stderr) = run_modprog(temp.path(), &["evaluate", "--learner", "1", "--module", "999"]);
    assert!(!success);
    assert!(stderr.contains("module 999 not found"), "stderr: {}", stderr);

    let (success, _, stderr) = run_modprog(temp.path(), &["evaluate", "--learner", "5"]);
    assert!(!success);
    assert!(stderr.contains("learner 5 not found"), "stderr: {}", stderr);
}

#[test]
fn test_collapse_is_kept_across_evaluations() {
    let temp = setup_course();
    let (success, stdout, _) = run_modprog(temp.path(), &["collapse", "--learner", "1", "--module", "10"]);
    assert!(success);
    assert!(stdout.contains("collapsed"));

    let results = evaluate_json(temp.path());
    assert_eq!(results["10"]["collapsed"], true);
    assert_eq!(results["20"]["collapsed"], false);

    run_modprog(temp.path(), &["collapse", "--learner", "1", "--module", "10", "--expand"]);
    assert_eq!(evaluate_json(temp.path())["10"]["collapsed"], false);
}

#[test]
fn test_table_output() {
    let temp = setup_course();
    let (success, stdout, _) = run_modprog(temp.path(), &["evaluate", "--learner", "1", "--module", "20"]);
    assert!(success);
    assert!(stdout.contains("Week 1"));
    assert!(stdout.contains("locked"));
    assert!(!stdout.contains("Orientation"));
}
