use std::process::{Command, Output};

fn run_texmill(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_texmill"))
        .args(args)
        .output()
        .expect("run texmill")
}

#[test]
fn help_lists_the_options() {
    let output = run_texmill(&["--help"]);
    assert!(output.status.success(), "process failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--stdin", "--package", "--engine", "--timeout"] {
        assert!(stdout.contains(flag), "expected {flag} in help: {stdout}");
    }
}

#[test]
fn no_fragments_is_an_error() {
    let output = run_texmill(&[]);
    assert!(!output.status.success(), "should fail without input");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("No fragments"),
        "expected the empty-input message, got: {stderr}"
    );
}

#[test]
fn missing_engine_fails_at_startup() {
    let output = run_texmill(&["--engine", "/nonexistent/texmill-engine", "$x$"]);
    assert!(!output.status.success(), "spawn failure must be fatal");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to start"),
        "expected a startup error, got: {stderr}"
    );
}
