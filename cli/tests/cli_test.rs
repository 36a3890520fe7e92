use assert_cmd::prelude::*;
use predicates::prelude::*;
use shdbg_core::program::{BinaryOp, ShaderStage};
use shdbg_core::{Program, ProgramBuilder};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// `main() { sum = 2.0 + 3.5; }` as a vertex shader.
fn add_program() -> Program {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let two = b.constant_f32(2.0);
    let three_five = b.constant_f32(3.5);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let sum = b.binary(BinaryOp::FAdd, f32t, two, three_five);
    b.name(sum, "sum");
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    b.finish()
}

fn write_program(dir: &Path, name: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(&add_program())?)?;
    Ok(path)
}

#[test]
fn validate_accepts_well_formed_program() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = write_program(dir.path(), "add.json")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["validate", program.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ok (1 entry point(s), 2 instruction(s))"));

    Ok(())
}

#[test]
fn validate_rejects_program_without_entry_point() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = dir.path().join("empty.json");
    fs::write(&program, "{}")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["validate", program.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid program: no entry point"));

    Ok(())
}

#[test]
fn rejects_unknown_document_extension() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = dir.path().join("add.spv");
    fs::write(&program, "{}")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["disasm", program.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unsupported file extension 'spv'"));

    Ok(())
}

#[test]
fn disasm_lists_instructions_with_program_counters() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = write_program(dir.path(), "add.json")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["disasm", program.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("function %").and(predicate::str::contains("main")))
        .stdout(predicate::str::contains("Binary"))
        .stdout(predicate::str::contains("     1    Return"));

    Ok(())
}

#[test]
fn run_prints_every_step_and_the_result() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = write_program(dir.path(), "add.json")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["run", program.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("main (Vertex), 1 lane(s), inspecting lane 0"))
        .stdout(predicate::str::contains("sum = 5.5"))
        .stdout(predicate::str::contains("finished after 2 step(s)"));

    Ok(())
}

#[test]
fn run_stops_at_instruction_breakpoint() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = write_program(dir.path(), "add.json")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["run", program.to_str().unwrap(), "--break", "1"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("stopped before instruction 1"));

    Ok(())
}

#[test]
fn run_json_emits_trace_and_states() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = write_program(dir.path(), "add.json")?;

    let output = Command::cargo_bin("shdbg")?
        .args(["run", program.to_str().unwrap(), "--format", "json"])
        .output()?;
    assert!(output.status.success(), "run failed: {}", String::from_utf8_lossy(&output.stderr));

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(doc["trace"]["entry_point"], "main");
    assert_eq!(doc["trace"]["lane_count"], 1);
    assert_eq!(doc["states"].as_array().map(Vec::len), Some(2));
    assert_eq!(doc["messages"].as_array().map(Vec::len), Some(0));

    Ok(())
}

#[test]
fn max_steps_stops_a_session_early() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = write_program(dir.path(), "add.json")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["run", program.to_str().unwrap(), "--max-steps", "1"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("finished after 1 step(s)"))
        .stderr(predicate::str::contains("stopped after 1 steps"));

    Ok(())
}

#[test]
fn run_rejects_unknown_entry_point() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let program = write_program(dir.path(), "add.json")?;

    let mut cmd = Command::cargo_bin("shdbg")?;
    cmd.args(["run", program.to_str().unwrap(), "--entry", "missing"]);
    cmd.assert().failure();

    Ok(())
}
