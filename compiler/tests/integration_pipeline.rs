// Integration tests for the `tpurw` binary.
//
// These tests lock the command-line contract:
// - `--emit ir` prints a module that re-imports cleanly
// - `--emit metadata` and `--emit build-info` print JSON
// - exit codes: 0 success, 1 diagnostics, 2 I/O failure

use std::path::{Path, PathBuf};
use std::process::Command;

use tpurw::import::parse_module;
use tpurw::ir::{Attribute, OpKind};
use tpurw::metadata::{CompileMetadata, OpSharding};

fn tpurw_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tpurw"))
}

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

fn run(args: &[&str], input: &Path) -> std::process::Output {
    Command::new(tpurw_binary())
        .args(args)
        .arg(input)
        .output()
        .expect("failed to run tpurw")
}

#[test]
fn emit_ir_is_reimportable() {
    let output = run(&[], &data("single_core.mlir"));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let module = parse_module(&stdout).expect("rewritten module should re-import");
    let kinds: Vec<OpKind> = module
        .walk()
        .into_iter()
        .map(|op| module.op(op).kind.clone())
        .collect();
    assert!(!kinds.contains(&OpKind::LaunchFunc));
    assert!(kinds.contains(&OpKind::CompileMlir));
    assert!(kinds.contains(&OpKind::CompileSucceededAssert));
    assert!(kinds.contains(&OpKind::Execute));

    // The serialized program carries the callee chain.
    let compile = module
        .walk()
        .into_iter()
        .find(|op| module.op(*op).kind == OpKind::CompileMlir)
        .unwrap();
    let inner = module
        .op(compile)
        .attr("mlir_module")
        .and_then(Attribute::as_str)
        .unwrap();
    let inner = parse_module(inner).unwrap();
    assert!(inner.lookup_func("main").is_some());
    assert!(inner.lookup_func("helper").is_some());
}

#[test]
fn emit_metadata_lists_each_compile_op() {
    let output = run(&["--emit", "metadata"], &data("replicated.mlir"));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let records: Vec<CompileMetadata> =
        serde_json::from_slice(&output.stdout).expect("metadata should be JSON");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].num_replicas, 2);
    assert_eq!(records[0].args[0].sharding, OpSharding::Replicated);
    assert_eq!(
        records[0].retvals[0].sharding,
        OpSharding::Maximal { device: 0 }
    );
}

#[test]
fn emit_build_info_hashes_the_source() {
    let output = run(&["--emit", "build-info"], &data("single_core.mlir"));
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["source_hash"].as_str().unwrap().len(), 64);
    assert_eq!(json["compiler_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn output_flag_writes_file() {
    let dir = std::env::temp_dir().join(format!("tpurw-out-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let out_path = dir.join("rewritten.mlir");

    let output = run(
        &["-o", out_path.to_str().unwrap()],
        &data("single_core.mlir"),
    );
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    let text = std::fs::read_to_string(&out_path).unwrap();
    assert!(text.contains("\"tf.TPUExecute\""));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn diagnostics_exit_with_one() {
    let output = run(&[], &data("bad_step_marker.mlir"));
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("bad 'step_marker_location' attribute with value 'test'"),
        "stderr: {}",
        stderr
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn missing_input_exits_with_two() {
    let output = run(&[], &data("does_not_exist.mlir"));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn debug_flag_indents_metadata() {
    let output = run(
        &["--tpu-compile-metadata-debug"],
        &data("single_core.mlir"),
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let module = parse_module(&stdout).unwrap();
    let compile = module
        .walk()
        .into_iter()
        .find(|op| module.op(*op).kind == OpKind::CompileMlir)
        .unwrap();
    let metadata = module
        .op(compile)
        .attr("metadata")
        .and_then(Attribute::as_str)
        .unwrap();
    assert!(metadata.contains('\n'));
}
