/// Compatibility tests: run Red Juice scripts through the `rj` binary and
/// verify its output.
///
/// Scripts are piped via stdin unless a test writes them to a file.  Each run
/// gets an empty temporary HOME and working directory so no user `.rjrc` is
/// picked up.  Output is normalised before comparison (see
/// `normalise_output`).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Path to the `rj` binary built by this Cargo workspace.
fn rj_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rj"))
}

/// Run the binary with `args`, feeding `script` on stdin.
fn run_rj(dir: &Path, args: &[&str], script: &str) -> Output {
    let mut child = Command::new(rj_binary())
        .args(args)
        .current_dir(dir)
        .env("HOME", dir)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn rj binary");
    {
        let stdin = child.stdin.as_mut().expect("stdin not open");
        // The binary may exit before reading stdin (fatal startup errors).
        let _ = stdin.write_all(script.as_bytes());
    }
    child.wait_with_output().expect("wait failed")
}

/// Trim each line and drop empty ones.
fn normalise_output(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Run a quiet script and compare its stdout line by line.
fn check(args: &[&str], script: &str, expected: &[&str]) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut full_args = vec!["-q"];
    full_args.extend_from_slice(args);
    let out = run_rj(dir.path(), &full_args, script);
    let got = normalise_output(&out.stdout);
    let want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    assert!(
        out.status.success(),
        "rj failed on\n{script}\nstderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert_eq!(got, want, "\n--- output mismatch ---\nScript:\n{script}\nGot:\n{got:#?}\nWant:\n{want:#?}");
}

// ── Test cases ────────────────────────────────────────────────────────────────

#[test]
fn euclid_gcd() {
    check(
        &[],
        "VAR a=1071;\nVAR b=462;\nWHILE a!=b;\nIF a>b;\nVAR a=a-b;\nELSE;\nVAR b=b-a;\nENDIF;\nENDWHILE;\n{a}\n",
        &["21"],
    );
}

#[test]
fn line_limit_from_flag() {
    check(&["--limit", "100"], "WHILE 1==1;\nENDWHILE;", &["Max computed lines reached (100)"]);
}

#[test]
fn seeded_latex_output() {
    check(&["-s", "46", "-l"], "VAR a = RAND(10,20)/RAND(1000,2000);\n${a}$", &["$\\frac{19}{1731}$"]);
}

#[test]
fn raw_values_without_latex() {
    check(&[], "VAR a = 3/6;\n{a}", &["1/2"]);
}

#[test]
fn blocks_print_with_headers() {
    check(&[], "intro\nSTART ex;\nhello\nEND ex;", &["intro", "#ex", "hello"]);
}

#[test]
fn final_orders_exercise_slots() {
    check(
        &["-f"],
        "START result;\nr\nEND result;\nSTART notes;\nn\nEND notes;\nSTART problem;\np\nEND problem;\nintro",
        &["intro", "#problem", "p", "#result", "r"],
    );
}

#[test]
fn banner_unless_quiet() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_rj(dir.path(), &[], "hi");
    let lines = normalise_output(&out.stdout);
    assert_eq!(lines, [format!("Red Juice v{}", env!("CARGO_PKG_VERSION")), "hi".to_owned()]);
}

#[test]
fn verbose_reports_function_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_rj(dir.path(), &["-q", "-v"], "hi");
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("verified") && stderr.contains("functions"), "{stderr}");
}

#[test]
fn json_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_rj(dir.path(), &["-j"], "START ex;\nTIME 30;\nhello\nEND ex;");
    assert!(out.status.success());
    let got: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout is JSON");
    assert_eq!(got, serde_json::json!({ "content": { "#ex": "hello\n" }, "timers": { "#ex": 30 } }));
}

#[test]
fn verify_errors_are_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_rj(dir.path(), &["-q"], "VAR ABC_01;\nIF 1;");
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    let err = normalise_output(&out.stderr);
    assert_eq!(err[0], "2 errors in file :");
    assert_eq!(err[1], "line 1 : Not enough tokens");
    assert_eq!(err[2], "line 2 : Condition is not closed");
}

#[test]
fn verify_errors_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_rj(dir.path(), &["-j"], "   VAR ABC_01;");
    assert!(!out.status.success());
    let got: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stdout is JSON");
    assert_eq!(got, serde_json::json!([["Not enough tokens", 3, 13, 1]]));
}

#[test]
fn file_input_and_output_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("ex.rj");
    std::fs::write(&script, "VAR a = 6*7;\n{a}\n").unwrap();
    let target = dir.path().join("out.json");
    let out = run_rj(
        dir.path(),
        &[script.to_str().unwrap(), "-o", target.to_str().unwrap()],
        "",
    );
    assert!(out.status.success());
    let lines = normalise_output(&out.stdout);
    assert_eq!(lines.last().map(String::as_str), Some(format!("Output written in {}", target.display()).as_str()));
    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(written["content"][""], "42\n");
}

#[test]
fn config_file_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join(".rjrc"), "presentation = on\nlimit = 5\nbogus = 1\n").unwrap();
    let out = run_rj(dir.path(), &["-q"], "VAR a = 1/2;\n{a}\nWHILE 1;\nENDWHILE;");
    assert!(out.status.success());
    assert_eq!(normalise_output(&out.stdout), ["\\frac{1}{2}", "Max computed lines reached (5)"]);
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("unknown setting `bogus`"), "{err}");
}

#[test]
fn unavailable_backend_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_rj(dir.path(), &["-q", "--backend", "/nonexistent/cas"], "hello");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("rj: backend unavailable"));
}
