// End-to-end workflow over a small multi-language repository:
// refresh -> search -> outline -> references -> context bundle, asserting
// determinism across repeated requests and across separate processes.
use assert_cmd::Command;
use assert_fs::prelude::*;
use serde_json::Value;

/// Multi-language fixture exercising the AST adapter, two lexical
/// adapters, and the fallback.
fn make_fixture() -> assert_fs::TempDir {
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("src/service.py")
        .write_str(
            "class Service:\n    \"\"\"Core service.\"\"\"\n    def run(self):\n        return 1\n",
        )
        .expect("service.py");
    tmp.child("src/app.py")
        .write_str("from src.service import Service\n\nhandle = Service()\nhandle.run()\n")
        .expect("app.py");
    tmp.child("web/client.ts")
        .write_str(
            "import { Service } from './service';\n\nexport class Client {\n  start() {\n    return new Service();\n  }\n}\n",
        )
        .expect("client.ts");
    tmp.child("pkg/worker.go")
        .write_str("package pkg\n\nfunc Run() int {\n\treturn 1\n}\n")
        .expect("worker.go");
    tmp.child("docs/notes.md")
        .write_str("# Notes\n\nthe service runs\n")
        .expect("notes.md");
    tmp
}

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

const REFRESH: &str = "{\"id\": \"i\", \"method\": \"repo.refresh_index\", \"params\": {}}\n";

#[test]
fn refresh_is_incremental_and_idempotent() {
    let tmp = make_fixture();
    let input = format!("{REFRESH}{REFRESH}");
    let responses = run_server(tmp.path(), &input);

    let first = &responses[0]["result"];
    assert_eq!(first["added"].as_u64().unwrap(), 5);
    assert_eq!(first["removed"], 0);

    // No changes between the calls: nothing added, updated, or removed.
    let second = &responses[1]["result"];
    assert_eq!(second["added"], 0);
    assert_eq!(second["updated"], 0);
    assert_eq!(second["removed"], 0);
}

#[test]
fn outline_parity_for_the_python_module() {
    let tmp = make_fixture();
    let input = format!(
        "{REFRESH}{}",
        "{\"id\": \"o\", \"method\": \"repo.outline\", \"params\": {\"path\": \"src/service.py\"}}\n",
    );
    let responses = run_server(tmp.path(), &input);
    let symbols = responses[1]["result"]["symbols"].as_array().unwrap();
    let names: Vec<&str> = symbols
        .iter()
        .map(|symbol| symbol["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Service", "Service.run"]);
    assert_eq!(symbols[0]["doc"], "Core service.");
    assert_eq!(symbols[1]["parent_symbol"], "Service");
    assert_eq!(symbols[1]["scope_kind"], "class");
}

#[test]
fn outline_selects_lexical_adapters_by_extension() {
    let tmp = make_fixture();
    let input = concat!(
        "{\"id\": \"ts\", \"method\": \"repo.outline\", \"params\": {\"path\": \"web/client.ts\"}}\n",
        "{\"id\": \"go\", \"method\": \"repo.outline\", \"params\": {\"path\": \"pkg/worker.go\"}}\n",
        "{\"id\": \"md\", \"method\": \"repo.outline\", \"params\": {\"path\": \"docs/notes.md\"}}\n",
    );
    let responses = run_server(tmp.path(), input);

    assert_eq!(responses[0]["result"]["adapter"], "ts_js_lexical");
    let ts_names: Vec<&str> = responses[0]["result"]["symbols"]
        .as_array()
        .unwrap()
        .iter()
        .map(|symbol| symbol["name"].as_str().unwrap())
        .collect();
    assert!(ts_names.contains(&"Client"));
    assert!(ts_names.contains(&"Client.start"));

    assert_eq!(responses[1]["result"]["adapter"], "go_lexical");
    let go_names: Vec<&str> = responses[1]["result"]["symbols"]
        .as_array()
        .unwrap()
        .iter()
        .map(|symbol| symbol["name"].as_str().unwrap())
        .collect();
    assert!(go_names.contains(&"pkg.Run"));

    // Markdown falls through to the fallback: no symbols, no error.
    assert_eq!(responses[2]["result"]["adapter"], "lexical");
    assert!(responses[2]["result"]["symbols"].as_array().unwrap().is_empty());
}

#[test]
fn references_are_byte_identical_across_processes() {
    let tmp = make_fixture();
    let input = format!(
        "{REFRESH}{}",
        "{\"id\": \"f\", \"method\": \"repo.references\", \"params\": {\"symbol\": \"Service.run\", \"top_k\": 10}}\n",
    );
    let first = run_server(tmp.path(), &input);
    let second = run_server(tmp.path(), &input);
    assert_eq!(first[1]["result"], second[1]["result"]);

    let result = &first[1]["result"];
    assert_eq!(result["symbol"], "Service.run");
    assert!(result["total_candidates"].as_u64().is_some());
    for reference in result["references"].as_array().unwrap() {
        for field in ["symbol", "path", "line", "kind", "evidence", "strategy", "confidence"] {
            assert!(reference.get(field).is_some(), "missing field {field}");
        }
    }
}

#[test]
fn bundle_identity_is_stable_and_explained() {
    let tmp = make_fixture();
    let bundle_request = "{\"id\": \"b\", \"method\": \"repo.build_context_bundle\", \"params\": {\"prompt\": \"service run\", \"budget\": {\"max_files\": 2, \"max_total_lines\": 16}}}\n";
    let input = format!("{REFRESH}{bundle_request}{bundle_request}");
    let responses = run_server(tmp.path(), &input);

    let first = &responses[1]["result"];
    let second = &responses[2]["result"];
    assert_eq!(first["bundle_id"], second["bundle_id"]);
    assert!(first["bundle_id"].as_str().unwrap().len() == 64);

    // Budget honored.
    assert!(first["totals"]["selected_files"].as_u64().unwrap() <= 2);
    assert!(first["totals"]["selected_lines"].as_u64().unwrap() <= 16);

    // Citations point back at selections in order.
    let selections = first["selections"].as_array().unwrap();
    let citations = first["citations"].as_array().unwrap();
    assert_eq!(selections.len(), citations.len());
    for (index, citation) in citations.iter().enumerate() {
        assert_eq!(citation["selection_index"].as_u64().unwrap() as usize, index);
        assert_eq!(citation["path"], selections[index]["path"]);
    }

    // Every selection explains itself.
    for selection in selections {
        let why = &selection["why_selected"];
        assert!(why["matched_signals"].as_array().unwrap().len() >= 1);
        assert!(why["score_components"]["search_score"].is_number());
        assert!(selection["rationale"].as_str().unwrap().starts_with("Selected from query"));
    }

    // Ranking debug rows carry the full signal set.
    let candidates = first["audit"]["ranking_debug"]["top_candidates"]
        .as_array()
        .unwrap();
    assert!(!candidates.is_empty());
    assert!(candidates.len() <= 20);

    // Skip summary reasons come from the closed set.
    let summary = &first["audit"]["selection_debug"]["why_not_selected_summary"];
    for key in summary["reason_counts"].as_object().unwrap().keys() {
        assert!(["file_budget", "line_budget", "zero_lines", "other"].contains(&key.as_str()));
    }

    // Side artifacts were written into the data directory.
    assert!(tmp.path().join(".quarry/last_bundle.json").is_file());
    assert!(tmp.path().join(".quarry/last_bundle.md").is_file());
    let exported = std::fs::read_to_string(tmp.path().join(".quarry/last_bundle.json")).unwrap();
    let exported: Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(exported["bundle_id"], first["bundle_id"]);
}

#[test]
fn bundle_excludes_tests_when_asked() {
    let tmp = make_fixture();
    tmp.child("tests/test_service.py")
        .write_str("def test_service_run():\n    assert True\n")
        .expect("test file");
    let request = "{\"id\": \"b\", \"method\": \"repo.build_context_bundle\", \"params\": {\"prompt\": \"service run\", \"include_tests\": false, \"budget\": {\"max_files\": 4, \"max_total_lines\": 60}}}\n";
    let input = format!("{REFRESH}{request}");
    let responses = run_server(tmp.path(), &input);
    for selection in responses[1]["result"]["selections"].as_array().unwrap() {
        let path = selection["path"].as_str().unwrap();
        assert!(!path.starts_with("tests/"), "unexpected test path {path}");
    }
}

#[test]
fn index_survives_across_processes() {
    let tmp = make_fixture();
    run_server(tmp.path(), REFRESH);

    // A fresh process sees the persisted index.
    let responses = run_server(
        tmp.path(),
        "{\"id\": \"s\", \"method\": \"repo.status\", \"params\": {}}\n",
    );
    assert_eq!(responses[0]["result"]["index_status"], "ready");
    assert_eq!(responses[0]["result"]["indexed_file_count"], 5);
    assert!(responses[0]["result"]["last_refresh_timestamp"].is_string());
}

#[test]
fn schema_mismatch_is_surfaced_with_recovery_hint() {
    let tmp = make_fixture();
    run_server(tmp.path(), REFRESH);

    // Corrupt the schema version the way an old build would leave it.
    let manifest_path = tmp.path().join(".quarry/index/manifest.json");
    let mut manifest: Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
    manifest["schema_version"] = serde_json::json!(99);
    std::fs::write(&manifest_path, manifest.to_string()).unwrap();

    let input = concat!(
        "{\"id\": \"s\", \"method\": \"repo.status\", \"params\": {}}\n",
        "{\"id\": \"q\", \"method\": \"repo.search\", \"params\": {\"query\": \"service\", \"mode\": \"bm25\", \"top_k\": 5}}\n",
        "{\"id\": \"r\", \"method\": \"repo.refresh_index\", \"params\": {\"force\": true}}\n",
        "{\"id\": \"s2\", \"method\": \"repo.status\", \"params\": {}}\n",
    );
    let responses = run_server(tmp.path(), input);

    assert_eq!(responses[0]["result"]["index_status"], "schema_mismatch");

    let error = &responses[1]["error"];
    assert_eq!(error["code"], "INDEX_SCHEMA_UNSUPPORTED");
    let message = error["message"].as_str().unwrap();
    assert!(message.contains("99"));
    assert!(message.contains("force"));

    // Force refresh recovers.
    assert_eq!(responses[2]["ok"], true);
    assert_eq!(responses[3]["result"]["index_status"], "ready");
}

#[test]
fn list_files_honours_glob_and_hides_dotfiles() {
    let tmp = make_fixture();
    tmp.child(".hidden/topsecret.md")
        .write_str("hello\n")
        .expect("hidden file");
    let input = concat!(
        "{\"id\": \"l1\", \"method\": \"repo.list_files\", \"params\": {\"glob\": \"**/*.py\"}}\n",
        "{\"id\": \"l2\", \"method\": \"repo.list_files\", \"params\": {}}\n",
        "{\"id\": \"l3\", \"method\": \"repo.list_files\", \"params\": {\"include_hidden\": true}}\n",
    );
    let responses = run_server(tmp.path(), input);

    let python_only: Vec<&str> = responses[0]["result"]["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|file| file.as_str().unwrap())
        .collect();
    assert_eq!(python_only, vec!["src/app.py", "src/service.py"]);

    let default_listing = responses[1]["result"]["files"].as_array().unwrap();
    assert!(!default_listing.iter().any(|f| f.as_str().unwrap().contains(".hidden")));

    let with_hidden = responses[2]["result"]["files"].as_array().unwrap();
    assert!(with_hidden.iter().any(|f| f.as_str().unwrap() == ".hidden/topsecret.md"));
}

#[test]
fn audit_log_records_every_request() {
    let tmp = make_fixture();
    let input = concat!(
        "{\"id\": \"a1\", \"method\": \"repo.status\", \"params\": {}}\n",
        "{\"id\": \"a2\", \"method\": \"repo.search\", \"params\": {\"query\": \"secret words here\", \"mode\": \"bm25\", \"top_k\": 3}}\n",
        "{\"id\": \"a3\", \"method\": \"repo.audit_log\", \"params\": {\"limit\": 10}}\n",
    );
    let responses = run_server(tmp.path(), input);
    let entries = responses[2]["result"]["entries"].as_array().unwrap();
    // The audit_log request itself is appended after it reads the log.
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["tool"], "repo.status");
    assert_eq!(entries[1]["tool"], "repo.search");
    // The query text never lands in the metadata; only presence + length.
    assert_eq!(entries[1]["metadata"]["query_present"], true);
    assert_eq!(entries[1]["metadata"]["query_length"], 17);
    assert!(!responses[2].to_string().contains("secret words here"));
}
