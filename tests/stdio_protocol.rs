// Protocol-level tests for the JSON-line server binary.
//
// We spawn the compiled binary with assert_cmd, feed newline-delimited
// requests on stdin, and parse the newline-delimited responses from
// stdout. Fixtures are hermetic temp directories built with assert_fs.
use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;
use serde_json::Value;

/// Run the server against `root`, feeding `input` and returning one parsed
/// JSON value per response line.
fn run_server(root: &std::path::Path, input: &str) -> Vec<Value> {
    let mut cmd = Command::cargo_bin("quarry").expect("binary");
    let assert = cmd
        .arg("--repo-root")
        .arg(root)
        .write_stdin(input.to_string())
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("response json"))
        .collect()
}

/// Minimal fixture: one Python module and a README.
fn make_fixture() -> assert_fs::TempDir {
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("src/a.py")
        .write_str("def parse(x):\n    return x\n")
        .expect("write a.py");
    tmp.child("README.md")
        .write_str("# Demo\n\nparse things\n")
        .expect("write README");
    tmp
}

#[test]
fn status_before_indexing_reports_not_indexed() {
    let tmp = make_fixture();
    let responses = run_server(
        tmp.path(),
        "{\"id\": \"r1\", \"method\": \"repo.status\", \"params\": {}}\n",
    );
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response["request_id"], "r1");
    assert_eq!(response["ok"], true);
    assert_eq!(response["blocked"], false);
    assert_eq!(response["result"]["index_status"], "not_indexed");
    assert_eq!(response["result"]["indexed_file_count"], 0);
    // The limits summary always carries max_references.
    assert!(response["result"]["limits_summary"]["max_references"].is_u64());
}

#[test]
fn refresh_then_search_finds_the_function() {
    let tmp = make_fixture();
    let input = concat!(
        "{\"id\": \"r1\", \"method\": \"repo.refresh_index\", \"params\": {\"force\": false}}\n",
        "{\"id\": \"r2\", \"method\": \"repo.search\", \"params\": {\"query\": \"parse\", \"mode\": \"bm25\", \"top_k\": 5}}\n",
        "{\"id\": \"r3\", \"method\": \"repo.search\", \"params\": {\"query\": \"parse\", \"mode\": \"bm25\", \"top_k\": 5}}\n",
    );
    let responses = run_server(tmp.path(), input);
    assert_eq!(responses.len(), 3);

    let refresh = &responses[0];
    assert_eq!(refresh["ok"], true);
    assert!(refresh["result"]["added"].as_u64().unwrap() >= 1);
    assert!(refresh["result"]["timestamp"].is_string());
    assert!(refresh["result"]["refresh_profile"].is_object());

    let hits = responses[1]["result"]["hits"].as_array().unwrap();
    assert!(
        hits.iter().any(|hit| hit["path"] == "src/a.py"
            && hit["start_line"] == 1
            && hit["matched_terms"] == serde_json::json!(["parse"])),
        "hits: {hits:?}"
    );

    // Identical request, identical hit list.
    assert_eq!(responses[1]["result"], responses[2]["result"]);
}

#[test]
fn empty_lines_are_ignored_and_eof_exits_zero() {
    let tmp = make_fixture();
    let responses = run_server(
        tmp.path(),
        "\n\n{\"id\": \"only\", \"method\": \"repo.status\", \"params\": {}}\n\n",
    );
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["request_id"], "only");
}

#[test]
fn denylisted_file_is_blocked_without_content_leak() {
    let tmp = make_fixture();
    tmp.child(".env")
        .write_str("SECRET_TOKEN=squeamish-ossifrage\n")
        .expect("write .env");

    let responses = run_server(
        tmp.path(),
        "{\"id\": \"d1\", \"method\": \"repo.open_file\", \"params\": {\"path\": \".env\", \"start_line\": 1, \"end_line\": 1}}\n",
    );
    let response = &responses[0];
    assert_eq!(response["ok"], false);
    assert_eq!(response["blocked"], true);
    assert_eq!(response["error"]["code"], "PATH_BLOCKED");
    // The blocked result carries exactly reason + hint.
    let result = response["result"].as_object().unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.contains_key("reason"));
    assert!(result.contains_key("hint"));
    assert!(!response.to_string().contains("squeamish-ossifrage"));

    // Neither does the audit log on disk.
    let audit = std::fs::read_to_string(tmp.path().join(".quarry/audit.jsonl")).unwrap();
    assert!(!audit.contains("squeamish-ossifrage"));
}

#[test]
fn traversal_and_unknown_tools_error_cleanly() {
    let tmp = make_fixture();
    let input = concat!(
        "{\"id\": \"t1\", \"method\": \"repo.open_file\", \"params\": {\"path\": \"../outside.txt\", \"start_line\": 1, \"end_line\": 1}}\n",
        "{\"id\": \"t2\", \"method\": \"repo.nope\", \"params\": {}}\n",
        "not even json\n",
    );
    let responses = run_server(tmp.path(), input);
    assert_eq!(responses[0]["blocked"], true);
    assert_eq!(responses[0]["error"]["code"], "PATH_BLOCKED");
    assert_eq!(responses[1]["error"]["code"], "UNKNOWN_TOOL");
    assert_eq!(responses[2]["error"]["code"], "INVALID_JSON");
}

#[test]
fn open_file_returns_numbered_lines() {
    let tmp = make_fixture();
    let responses = run_server(
        tmp.path(),
        "{\"id\": \"o\", \"method\": \"repo.open_file\", \"params\": {\"path\": \"src/a.py\", \"start_line\": 1, \"end_line\": 2}}\n",
    );
    let result = &responses[0]["result"];
    assert_eq!(result["path"], "src/a.py");
    assert_eq!(result["truncated"], false);
    let lines = result["numbered_lines"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["line"], 1);
    assert_eq!(lines[0]["text"], "def parse(x):");
}

#[test]
fn startup_fails_on_denylist_relaxing_config() {
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("quarry.toml")
        .write_str("[security]\ndenylist_override = [\"*.pem\"]\n")
        .expect("write config");

    Command::cargo_bin("quarry")
        .expect("binary")
        .arg("--repo-root")
        .arg(tmp.path())
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("denylist"));
}

#[test]
fn cli_limits_are_reflected_in_status() {
    let tmp = make_fixture();
    let mut cmd = Command::cargo_bin("quarry").expect("binary");
    let assert = cmd
        .arg("--repo-root")
        .arg(tmp.path())
        .arg("--max-search-hits")
        .arg("7")
        .arg("--max-references")
        .arg("11")
        .write_stdin("{\"id\": \"s\", \"method\": \"repo.status\", \"params\": {}}\n".to_string())
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let response: Value = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(response["result"]["limits_summary"]["max_search_hits"], 7);
    assert_eq!(response["result"]["limits_summary"]["max_references"], 11);
}
