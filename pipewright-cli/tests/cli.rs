use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;

const MANIFEST: &str = r#"
failures:
  - name: BaseError
  - name: SpecificError
    extends: BaseError
shapes:
  - name: ping
    returns: Pong
  - name: lookup
    parameters:
      - { name: envelope, type: Envelope }
    returns: UserId
  - name: orders
    parameters:
      - { name: envelope, type: Envelope }
    returns: Result
  - name: explode
    returns: Boom
  - name: broken
    returns: Missing
sources:
  - name: user-id
    type: UserId
    kind: field
    context: Envelope
    field: user_id
  - name: pong
    type: Pong
    kind: constant
    value: pong
builders:
  - name: load
    stage: binding
    match: "^orders$"
    steps:
      - call: load_user
        args: [{ var: UserId }]
        creates: User
  - name: execute
    stage: execution
    match: "^orders$"
    steps:
      - call: charge
        args: [{ var: User }]
        creates: Result
    handlers:
      - category: SpecificError
        steps:
          - call: record
            args: [{ var: Fault }]
    finally:
      - call: record
  - name: explode
    stage: execution
    match: "^explode$"
    steps:
      - call: boom
        creates: Boom
operations:
  - name: load_user
    kind: echo
  - name: charge
    kind: fail
    category: SpecificError
    message: declined
  - name: record
    kind: collect
  - name: boom
    kind: fail
    category: BaseError
    message: kaboom
"#;

struct Fixture {
    dir: TempDir,
    manifest: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("pipewright.yaml");
        fs::write(&manifest, MANIFEST).unwrap();
        Self { dir, manifest }
    }

    fn manifest(&self) -> &str {
        self.manifest.to_str().unwrap()
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }
}

fn pipewright() -> Command {
    let mut cmd = Command::cargo_bin("pipewright").unwrap();
    cmd.env_remove("PIPEWRIGHT_CACHE_DIR")
        .env_remove("PIPEWRIGHT_TOOLCHAIN")
        .env_remove("PIPEWRIGHT_LOG")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn stderr_text(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn validate_accepts_a_manifest() {
    let f = Fixture::new();
    let out = pipewright()
        .args(["validate", f.manifest(), "--format", "json"])
        .assert()
        .success()
        .get_output()
        .clone();
    let result = stdout_json(&out);
    assert_eq!(result["valid"], json!(true));
    assert_eq!(result["shapes"], json!(5));
}

#[test]
fn validate_reports_violations() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(
        &path,
        "builders:\n  - name: x\n    stage: execution\n    handlers:\n      - category: Missing\n",
    )
    .unwrap();

    let out = pipewright()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .code(2)
        .get_output()
        .clone();
    assert!(stderr_text(&out).contains("builders[0].handlers[0].category"));

    fs::write(&path, "invalid: yaml: content").unwrap();
    pipewright().args(["validate", path.to_str().unwrap()]).assert().code(2);
}

#[test]
fn shapes_lists_module_names() {
    let f = Fixture::new();
    let out = pipewright()
        .args(["shapes", f.manifest(), "--format", "json"])
        .assert()
        .success()
        .get_output()
        .clone();
    let shapes = stdout_json(&out)["shapes"].clone();
    assert_eq!(shapes[0]["name"], json!("ping"));
    assert_eq!(shapes[0]["module"], json!("pipeline_ping"));
    assert_eq!(shapes[1]["parameters"], json!(["envelope: Envelope"]));
}

#[test]
fn emit_prints_source_and_graph() {
    let f = Fixture::new();
    let out = pipewright()
        .args(["emit", f.manifest(), "--shape", "orders"])
        .assert()
        .success()
        .get_output()
        .clone();
    let source = String::from_utf8(out.stdout).unwrap();
    assert!(source.contains("module pipeline_orders {"), "{source}");
    assert!(source.contains("failure SpecificError : BaseError;"), "{source}");
    assert!(source.contains("} finally {"), "{source}");

    let out = pipewright()
        .args(["emit", f.manifest(), "--shape", "orders", "--format", "dot"])
        .assert()
        .success()
        .get_output()
        .clone();
    assert!(String::from_utf8(out.stdout).unwrap().starts_with("digraph pipeline {"));

    let out = pipewright()
        .args(["emit", f.manifest(), "--shape", "ping", "--nested", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .clone();
    let result = stdout_json(&out);
    assert_eq!(result["module"], json!("pipeline_ping_nested"));
    assert_eq!(result["hash"].as_str().unwrap().len(), 64);

    pipewright()
        .args(["emit", f.manifest(), "--shape", "broken"])
        .assert()
        .code(3);
    pipewright()
        .args(["emit", f.manifest(), "--shape", "nope"])
        .assert()
        .code(2);
}

#[test]
fn persistent_builds_are_reused_across_processes() {
    let f = Fixture::new();
    let cache = f.cache_dir();
    let build = |shape: &str| {
        pipewright()
            .args(["build", f.manifest(), "--shape", shape, "--format", "json", "--cache-dir"])
            .arg(&cache)
            .assert()
            .success()
            .get_output()
            .clone()
    };

    let first = stdout_json(&build("ping"));
    assert_eq!(first["shapes"][0]["cached"], json!(false));
    assert_eq!(first["metrics"]["cache"]["compiles"], json!(1));

    let second = stdout_json(&build("ping"));
    assert_eq!(second["shapes"][0]["cached"], json!(true));
    assert_eq!(second["shapes"][0]["hash"], first["shapes"][0]["hash"]);
    assert_eq!(second["metrics"]["cache"]["hits"], json!(1));

    let out = pipewright()
        .args(["cache", "list", "--format", "json", "--cache-dir"])
        .arg(&cache)
        .assert()
        .success()
        .get_output()
        .clone();
    let entries = stdout_json(&out)["entries"].clone();
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["module_name"], json!("pipeline_ping"));
    assert_eq!(entries[0]["hash"], first["shapes"][0]["hash"]);
}

#[test]
fn building_every_shape_reports_failures() {
    let f = Fixture::new();
    let out = pipewright()
        .args(["build", f.manifest(), "--in-memory", "--format", "json"])
        .assert()
        .code(3)
        .get_output()
        .clone();
    let result = stdout_json(&out);
    assert_eq!(result["built"], json!(4));
    assert_eq!(result["failed"], json!(1));
    let broken = result["shapes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["shape"].as_str().unwrap().starts_with("broken"))
        .unwrap()
        .clone();
    assert_eq!(broken["phase"], json!("build_failed"));
    assert!(broken["error"].as_str().unwrap().contains("missing dependency"));
}

#[test]
fn run_invokes_the_pipeline() {
    let f = Fixture::new();
    let run = |shape: &str, args: &str| {
        let mut cmd = pipewright();
        cmd.args(["run", f.manifest(), "--shape", shape, "--format", "json", "--in-memory"]);
        if !args.is_empty() {
            cmd.args(["--args", args]);
        }
        cmd
    };

    let out = run("ping", "").assert().success().get_output().clone();
    assert_eq!(stdout_json(&out)["result"], json!("pong"));

    let out = run("lookup", r#"{"envelope": {"user_id": "u1"}}"#)
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(stdout_json(&out)["result"], json!("u1"));

    // the handler swallows the fault and the routine falls through to null
    let out = run("orders", r#"[{"user_id": "u1"}]"#).assert().success().get_output().clone();
    assert_eq!(stdout_json(&out)["result"], Value::Null);

    let out = run("explode", "").assert().code(5).get_output().clone();
    let fault = stdout_json(&out)["fault"].clone();
    assert_eq!(fault["category"], json!("BaseError"));
    assert_eq!(fault["message"], json!("kaboom"));

    run("lookup", "[]").assert().code(2);
    run("broken", "").assert().code(3);
}

#[test]
fn run_reads_yaml_argument_files() {
    let f = Fixture::new();
    let args = f.dir.path().join("args.yaml");
    fs::write(&args, "envelope:\n  user_id: u9\n").unwrap();
    pipewright()
        .args(["run", f.manifest(), "--shape", "lookup", "--args-file"])
        .arg(&args)
        .assert()
        .success()
        .stdout("\"u9\"\n");
}

#[test]
fn cache_prune_and_clear() {
    let f = Fixture::new();
    let cache = f.cache_dir();
    for shape in ["ping", "lookup"] {
        pipewright()
            .args(["build", f.manifest(), "--shape", shape, "--cache-dir"])
            .arg(&cache)
            .assert()
            .success();
    }

    let removed = |out: &std::process::Output| stdout_json(out)["removed"].clone();
    let out = pipewright()
        .args(["cache", "prune", "--older-than-secs", "3600", "--format", "json", "--cache-dir"])
        .arg(&cache)
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(removed(&out), json!(0));

    let out = pipewright()
        .args(["cache", "clear", "--format", "json", "--cache-dir"])
        .arg(&cache)
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(removed(&out), json!(2));

    pipewright().args(["cache", "list"]).assert().code(4);
}

#[test]
fn toolchain_mode_compiles_stdin() {
    let out = pipewright()
        .args(["toolchain", "--module", "m"])
        .write_stdin("module m { routine handle() -> Out { return 1; } }")
        .assert()
        .success()
        .get_output()
        .clone();
    let image = stdout_json(&out);
    assert_eq!(image["name"], json!("m"));
    assert_eq!(image["routines"][0]["name"], json!("handle"));

    let out = pipewright()
        .args(["toolchain", "--module", "m"])
        .write_stdin("module m { routine handle() { call use(missing); } }")
        .assert()
        .code(2)
        .get_output()
        .clone();
    assert_eq!(stderr_text(&out).trim(), "1:40: `missing` is not defined");
}

#[test]
fn build_through_the_external_toolchain() {
    let f = Fixture::new();
    let bin = assert_cmd::cargo::cargo_bin("pipewright");
    let toolchain = format!("{} toolchain", bin.display());
    let out = pipewright()
        .args(["run", f.manifest(), "--shape", "ping", "--format", "json", "--in-memory", "--toolchain"])
        .arg(&toolchain)
        .assert()
        .success()
        .get_output()
        .clone();
    assert_eq!(stdout_json(&out)["result"], json!("pong"));
}
