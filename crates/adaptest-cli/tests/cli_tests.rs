//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn adaptest() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("adaptest").unwrap()
}

const RESPONSES: &str = r#"[
  { "examinee": 1, "item": 10, "scale": 1, "fraction": 1.0 },
  { "examinee": 2, "item": 10, "scale": 1, "fraction": 1.0 },
  { "examinee": 3, "item": 10, "scale": 1, "fraction": 0.0 },
  { "examinee": 1, "item": 11, "scale": 1, "fraction": 1.0 },
  { "examinee": 2, "item": 11, "scale": 1, "fraction": 0.0 },
  { "examinee": 3, "item": 11, "scale": 1, "fraction": 0.0 }
]"#;

const POOL: &str = r#"[
  { "item": 1, "scale": 1, "model": "2pl",
    "values": { "kind": "dichotomous", "difficulty": -0.5, "discrimination": 1.2, "guessing": 0.0 } },
  { "item": 2, "scale": 1, "model": "2pl",
    "values": { "kind": "dichotomous", "difficulty": 0.4, "discrimination": 1.5, "guessing": 0.0 } },
  { "item": 3, "scale": 1, "model": "1pl",
    "values": { "kind": "dichotomous", "difficulty": 1.1, "discrimination": 1.0, "guessing": 0.0 } }
]"#;

#[test]
fn validate_valid_pool() {
    let dir = TempDir::new().unwrap();
    let pool = dir.path().join("pool.json");
    std::fs::write(&pool, POOL).unwrap();

    adaptest()
        .arg("validate")
        .arg("--pool")
        .arg(&pool)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 items"))
        .stdout(predicate::str::contains("Pool is valid"));
}

#[test]
fn validate_duplicate_items_fails() {
    let dir = TempDir::new().unwrap();
    let pool = dir.path().join("pool.json");
    let duplicated = r#"[
  { "item": 1, "scale": 1, "model": "2pl",
    "values": { "kind": "dichotomous", "difficulty": 0.0, "discrimination": 1.0, "guessing": 0.0 } },
  { "item": 1, "scale": 1, "model": "2pl",
    "values": { "kind": "dichotomous", "difficulty": 0.5, "discrimination": 1.0, "guessing": 0.0 } }
]"#;
    std::fs::write(&pool, duplicated).unwrap();

    adaptest()
        .arg("validate")
        .arg("--pool")
        .arg(&pool)
        .assert()
        .failure()
        .stdout(predicate::str::contains("duplicate item id: 1"));
}

#[test]
fn validate_unknown_model_fails() {
    let dir = TempDir::new().unwrap();
    let pool = dir.path().join("pool.json");
    let unknown = r#"[
  { "item": 1, "scale": 1, "model": "7pl",
    "values": { "kind": "dichotomous", "difficulty": 0.0, "discrimination": 1.0, "guessing": 0.0 } }
]"#;
    std::fs::write(&pool, unknown).unwrap();

    adaptest()
        .arg("validate")
        .arg("--pool")
        .arg(&pool)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown model"));
}

#[test]
fn validate_nonexistent_file_fails() {
    adaptest()
        .arg("validate")
        .arg("--pool")
        .arg("nonexistent.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn calibrate_prints_summary_table() {
    let dir = TempDir::new().unwrap();
    let responses = dir.path().join("responses.json");
    std::fs::write(&responses, RESPONSES).unwrap();

    adaptest()
        .current_dir(dir.path())
        .arg("calibrate")
        .arg("--responses")
        .arg(&responses)
        .arg("--models")
        .arg("1pl")
        .assert()
        .success()
        .stdout(predicate::str::contains("Difficulty"))
        .stdout(predicate::str::contains("Calibrated 2 items over 5 iterations"));
}

#[test]
fn calibrate_writes_output_files() {
    let dir = TempDir::new().unwrap();
    let responses = dir.path().join("responses.json");
    std::fs::write(&responses, RESPONSES).unwrap();
    let out = dir.path().join("results");

    adaptest()
        .current_dir(dir.path())
        .arg("calibrate")
        .arg("--responses")
        .arg(&responses)
        .arg("--models")
        .arg("1pl,2pl")
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("item_params.json"));

    assert!(out.join("item_params.json").exists());
    assert!(out.join("person_params.json").exists());
}

#[test]
fn calibrate_rejects_unknown_model() {
    let dir = TempDir::new().unwrap();
    let responses = dir.path().join("responses.json");
    std::fs::write(&responses, RESPONSES).unwrap();

    adaptest()
        .current_dir(dir.path())
        .arg("calibrate")
        .arg("--responses")
        .arg(&responses)
        .arg("--models")
        .arg("9pl")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown model"));
}

#[test]
fn simulate_runs_to_a_stop_reason() {
    let dir = TempDir::new().unwrap();
    let pool = dir.path().join("pool.json");
    std::fs::write(&pool, POOL).unwrap();

    adaptest()
        .arg("simulate")
        .arg("--pool")
        .arg(&pool)
        .arg("--true-theta")
        .arg("0.5")
        .arg("--seed")
        .arg("7")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopped after"));
}

#[test]
fn simulate_is_deterministic_for_a_seed() {
    let dir = TempDir::new().unwrap();
    let pool = dir.path().join("pool.json");
    std::fs::write(&pool, POOL).unwrap();

    let run = |seed: &str| -> Vec<u8> {
        adaptest()
            .arg("simulate")
            .arg("--pool")
            .arg(&pool)
            .arg("--true-theta")
            .arg("-0.3")
            .arg("--seed")
            .arg(seed)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    };

    assert_eq!(run("42"), run("42"));
}

#[test]
fn init_creates_starter_files() {
    let dir = TempDir::new().unwrap();

    adaptest()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created adaptest.toml"))
        .stdout(predicate::str::contains("Created example-pool.json"));

    assert!(dir.path().join("adaptest.toml").exists());
    assert!(dir.path().join("example-pool.json").exists());

    // Second run leaves existing files alone.
    adaptest()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}
