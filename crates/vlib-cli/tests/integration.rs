#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn demo() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demo")
}

fn copy_dir(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let dest = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &dest);
        } else {
            std::fs::copy(entry.path(), dest).unwrap();
        }
    }
}

fn setup() -> TempDir {
    let dir = TempDir::new().unwrap();
    copy_dir(&demo(), dir.path());
    dir
}

fn vlib(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("vlib").unwrap();
    cmd.current_dir(dir.path()).env_remove("VLIB_CONFIG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.output().unwrap();
    serde_json::from_slice(&out.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// vlib validate
// ---------------------------------------------------------------------------

#[test]
fn validate_passing_entity() {
    let dir = setup();
    vlib(&dir)
        .args(["validate", "entities/loan_ok.json", "--entity-type", "loan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rule_001_v1"))
        .stdout(predicate::str::contains("  rule_004_v1"))
        .stdout(predicate::str::contains("FAIL").not());
}

#[test]
fn validate_failing_entity_exits_nonzero_and_skips_children() {
    let dir = setup();
    vlib(&dir)
        .args(["validate", "entities/loan_bad_status.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Invalid loan status 'pending'"))
        .stdout(predicate::str::contains("parent did not pass"))
        .stderr(predicate::str::contains("failed or errored"));
}

#[test]
fn validate_json_output_is_a_tree() {
    let dir = setup();
    let results = json_stdout(vlib(&dir).args([
        "--json",
        "validate",
        "entities/loan_ok.json",
        "--ruleset",
        "thorough",
    ]));
    let rows = results.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["rule_id"], "rule_002_v1");
    assert_eq!(rows[1]["children"][1]["rule_id"], "rule_005_v1");
    assert_eq!(rows[1]["children"][1]["status"], "NORUN");
}

#[test]
fn validate_unknown_ruleset_names_it() {
    let dir = setup();
    vlib(&dir)
        .args(["validate", "entities/loan_ok.json", "--ruleset", "invalid_ruleset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ruleset not found: invalid_ruleset"));
}

#[test]
fn missing_config_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("e.json"), r#"{"entity_type": "loan"}"#).unwrap();
    vlib(&dir)
        .args(["--config", "nowhere.yaml", "validate", "e.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("deployment config not found"));
}

// ---------------------------------------------------------------------------
// vlib batch
// ---------------------------------------------------------------------------

#[test]
fn batch_keeps_input_order_and_isolates_errors() {
    let dir = setup();
    let reports = json_stdout(vlib(&dir).args(["--json", "batch", "entities/loans.json"]));
    let ids: Vec<&str> = reports
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["entity_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["LOAN-00011", "LOAN-00012", "LOAN-00013", "LOAN-20014"]);
    assert!(reports[2]["error"].as_str().unwrap().contains("major-version mismatch"));
    assert!(reports[0]["results"].is_array());
}

#[test]
fn batch_parallel_matches_sequential() {
    let dir = setup();
    let strip = |mut v: serde_json::Value| {
        fn zero(v: &mut serde_json::Value) {
            match v {
                serde_json::Value::Object(m) => {
                    if m.contains_key("duration_ms") {
                        m.insert("duration_ms".into(), 0.into());
                    }
                    m.values_mut().for_each(zero);
                }
                serde_json::Value::Array(a) => a.iter_mut().for_each(zero),
                _ => {}
            }
        }
        zero(&mut v);
        v
    };
    let seq = strip(json_stdout(vlib(&dir).args(["--json", "batch", "entities/loans.json", "--ruleset", "thorough"])));

    let config = std::fs::read_to_string(dir.path().join("vlib.yaml")).unwrap();
    let parallel = config.replace("batch_parallelism: false", "batch_parallelism: true\nbatch_max_workers: 4");
    std::fs::write(dir.path().join("parallel.yaml"), parallel).unwrap();
    let par = strip(json_stdout(vlib(&dir).args([
        "--config",
        "parallel.yaml",
        "--json",
        "batch",
        "entities/loans.json",
        "--ruleset",
        "thorough",
    ])));
    assert_eq!(seq, par);
}

#[test]
fn batch_table_summarises() {
    let dir = setup();
    vlib(&dir)
        .args(["batch", "entities/loans.json", "--id-field", "loan_number"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LN-12"))
        .stdout(predicate::str::contains("1 failing"))
        .stdout(predicate::str::contains("4 entities, 1 not validated"));
}

// ---------------------------------------------------------------------------
// discovery, lifecycle, config
// ---------------------------------------------------------------------------

#[test]
fn discover_rulesets_lists_both() {
    let dir = setup();
    vlib(&dir)
        .arg("discover-rulesets")
        .assert()
        .success()
        .stdout(predicate::str::contains("quick"))
        .stdout(predicate::str::contains("thorough"))
        .stdout(predicate::str::contains("Nightly portfolio review").not());
}

#[test]
fn discover_rules_reports_fields() {
    let dir = setup();
    let found = json_stdout(vlib(&dir).args([
        "--json",
        "discover-rules",
        "entities/loan_ok.json",
        "--ruleset",
        "quick",
    ]));
    assert_eq!(found["rule_003_v1"]["field_dependencies"][0][0], "status");
    assert_eq!(found["rule_003_v1"]["field_dependencies"][0][1], "status");
}

#[test]
fn reload_and_cache_age_in_local_mode() {
    let dir = setup();
    vlib(&dir)
        .arg("reload")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logic reloaded successfully"));
    let age = json_stdout(vlib(&dir).args(["--json", "cache-age"]));
    assert!(age["cache_age"].is_null());
}

#[test]
fn config_validate_clean_and_broken() {
    let dir = setup();
    vlib(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    std::fs::write(dir.path().join("vlib.yaml"), "business_config_uri: ftp://nope/x.yaml\n").unwrap();
    vlib(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
}

#[test]
fn config_found_from_subdirectory() {
    let dir = setup();
    let sub = dir.path().join("entities");
    let mut cmd = Command::cargo_bin("vlib").unwrap();
    cmd.current_dir(&sub)
        .env_remove("VLIB_CONFIG")
        .args(["validate", "loan_ok.json"])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// vlib serve
// ---------------------------------------------------------------------------

#[test]
fn serve_answers_requests_and_skips_notifications() {
    let dir = setup();
    let input = concat!(
        r#"{"jsonrpc":"2.0","method":"get_cache_age"}"#,
        "\n\n",
        r#"{"jsonrpc":"2.0","id":1,"method":"discover_rulesets"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"nope"}"#,
        "\n",
    );
    let out = vlib(&dir).arg("serve").write_stdin(input).output().unwrap();
    assert!(out.status.success());
    let lines: Vec<serde_json::Value> = String::from_utf8(out.stdout)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[0]["result"]["thorough"]["stats"]["total_rules"], 11);
    assert_eq!(lines[1]["error"]["code"], -32601);
}
