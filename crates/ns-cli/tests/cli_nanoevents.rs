use std::path::PathBuf;
use std::process::{Command, Output};

use ns_nanoevents::array::Array;
use ns_nanoevents::source::{PreloadedSource, write_parquet};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_nanoevents"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn tmp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("nanoevents_cli_{}_{name}", std::process::id()))
}

fn nano_input(name: &str) -> PathBuf {
    let source = PreloadedSource::new(vec![
        ("run".to_string(), Array::from_vec(vec![1u32, 1, 1])),
        ("luminosityBlock".to_string(), Array::from_vec(vec![4u32, 4, 4])),
        ("event".to_string(), Array::from_vec(vec![10u64, 11, 12])),
        ("nJet".to_string(), Array::from_vec(vec![2u32, 0, 1])),
        ("Jet_pt".to_string(), Array::from_rows(vec![vec![45.0f32, 22.0], vec![], vec![31.0]])),
        ("Jet_eta".to_string(), Array::from_rows(vec![vec![0.5f32, -0.5], vec![], vec![1.5]])),
        ("Jet_genJetIdx".to_string(), Array::from_rows(vec![vec![0i32, -1], vec![], vec![0]])),
        ("nGenJet".to_string(), Array::from_vec(vec![1u32, 0, 1])),
        ("GenJet_pt".to_string(), Array::from_rows(vec![vec![44.0f32], vec![], vec![30.0]])),
    ])
    .unwrap()
    .with_uuid("cli-test")
    .with_doc("Jet_pt", "pt");
    let path = tmp_path(&format!("{name}.parquet"));
    write_parquet(&path, &source).unwrap();
    path
}

fn stdout_json(out: &Output, what: &str) -> serde_json::Value {
    assert!(
        out.status.success(),
        "{what} should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("output should be valid JSON")
}

#[test]
fn inspect_prints_form() {
    let input = nano_input("inspect");
    let out = run(&["inspect", "--input", input.to_str().unwrap()]);
    let v = stdout_json(&out, "inspect");
    assert_eq!(v["schema"], "nanoaod");
    assert_eq!(v["entry_stop"], 3);
    assert_eq!(v["fields"], serde_json::json!(["run", "luminosityBlock", "event", "Jet", "GenJet"]));
    assert!(v["partition_key"].as_str().unwrap().starts_with("cli-test/"));

    let out = run(&["inspect", "--input", input.to_str().unwrap(), "--schema", "base"]);
    let v = stdout_json(&out, "inspect --schema base");
    assert_eq!(v["schema"], "base");
    assert!(v["fields"].as_array().unwrap().iter().any(|f| f == "nJet"));
    std::fs::remove_file(&input).ok();
}

#[test]
fn fields_lists_collection() {
    let input = nano_input("fields");
    let out = run(&["fields", "--input", input.to_str().unwrap(), "--collection", "Jet"]);
    let v = stdout_json(&out, "fields");
    assert_eq!(v["behavior"], "Jet");
    assert_eq!(v["jagged"], true);
    let names: Vec<&str> =
        v["fields"].as_array().unwrap().iter().map(|f| f["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["pt", "eta", "genJetIdx", "genJetIdxG"]);
    assert_eq!(v["fields"][3]["target"], "GenJet");
    assert_eq!(v["links"]["matched_gen"], "genJetIdxG");
    std::fs::remove_file(&input).ok();
}

#[test]
fn dump_field_with_range_and_config() {
    let input = nano_input("dump");
    let config = tmp_path("dump_config.json");
    std::fs::write(&config, r#"{"schema": "nanoaod", "entry_start": 1, "cache_max_bytes": 4096}"#)
        .unwrap();

    let out = run(&[
        "dump",
        "--input",
        input.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--collection",
        "Jet",
        "--field",
        "pt",
    ]);
    let v = stdout_json(&out, "dump");
    assert_eq!(v["entry_start"], 1);
    assert_eq!(v["values"], serde_json::json!([[], [31.0]]));

    let out = run(&[
        "dump",
        "--input",
        input.to_str().unwrap(),
        "--collection",
        "event",
        "--entry-stop",
        "2",
    ]);
    let v = stdout_json(&out, "dump event");
    assert_eq!(v["values"], serde_json::json!([10, 11]));

    std::fs::remove_file(&input).ok();
    std::fs::remove_file(&config).ok();
}

#[test]
fn errors_are_reported() {
    let input = nano_input("errors");
    let out = run(&["fields", "--input", input.to_str().unwrap(), "--collection", "Nope"]);
    assert!(!out.status.success());

    let out = run(&["inspect", "--input", input.to_str().unwrap(), "--schema", "cms"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown schema"));

    let out = run(&["inspect", "--input", tmp_path("missing.parquet").to_str().unwrap()]);
    assert!(!out.status.success());
    std::fs::remove_file(&input).ok();
}

#[test]
fn schema_override_keeps_config_flags() {
    let source = PreloadedSource::new(vec![
        ("nJet".to_string(), Array::from_vec(vec![1u32, 2])),
        ("Jet_pt".to_string(), Array::from_rows(vec![vec![45.0f32], vec![22.0, 31.0]])),
    ])
    .unwrap()
    .with_uuid("cli-no-ids");
    let input = tmp_path("no_ids.parquet");
    write_parquet(&input, &source).unwrap();
    let config = tmp_path("no_ids_config.json");
    std::fs::write(&config, r#"{"schema": "nanoaod", "error_missing_event_ids": false}"#).unwrap();

    let base_args = ["inspect", "--input", input.to_str().unwrap(), "--config", config.to_str().unwrap()];

    let mut args = base_args.to_vec();
    args.extend(["--schema", "pfnanoaod"]);
    let v = stdout_json(&run(&args), "inspect --schema pfnanoaod");
    assert_eq!(v["schema"], "pfnanoaod");
    assert_eq!(v["fields"], serde_json::json!(["Jet"]));

    let mut args = base_args.to_vec();
    args.extend(["--schema", "base"]);
    let out = run(&args);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("NanoAOD options given for schema 'base'"));

    std::fs::remove_file(&input).ok();
    std::fs::remove_file(&config).ok();
}
