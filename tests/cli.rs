//! CLI integration tests for the run, bench, and error paths.

use std::io::Write;
use std::process::Command;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fulfillment_sim"))
}

#[test]
fn run_prints_clean_summary() {
    let output = bin()
        .args(["--orders", "24", "--time-scale", "0", "--log-level", "warn"])
        .output()
        .expect("failed to run binary");

    assert!(
        output.status.success(),
        "run exited with non-zero status: {:?}\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RUN SUMMARY"), "summary missing from output");

    let received = stdout
        .lines()
        .find(|line| line.starts_with("received="))
        .expect("received line missing");
    assert!(received.starts_with("received=24 "));

    // Every order ended up dispatched or rejected.
    let unsettled = stdout
        .lines()
        .find(|line| line.starts_with("unsettled="))
        .expect("unsettled line missing");
    assert_eq!(unsettled.trim(), "unsettled=0");

    let clean = stdout
        .lines()
        .find(|line| line.starts_with("clean="))
        .expect("clean line missing");
    assert_eq!(clean.trim(), "clean=true");
}

#[test]
fn run_json_report_accounts_for_every_order() {
    let output = bin()
        .args([
            "run",
            "--json",
            "--orders",
            "18",
            "--time-scale",
            "0",
            "--seed",
            "7",
            "--log-level",
            "error",
        ])
        .output()
        .expect("failed to run binary");
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is a JSON report");
    let stats = &report["stats"];
    let received = stats["received"].as_u64().expect("received");
    let dispatched = stats["orders_dispatched"].as_u64().expect("dispatched");
    let rejected = stats["rejected_total"].as_u64().expect("rejected");
    assert_eq!(received, 18);
    assert_eq!(dispatched + rejected, received);
    assert_eq!(report["dispatch"]["active_carriers"], 0);
}

#[test]
fn bench_prints_csv_header_and_row() {
    let output = bin()
        .args(["bench", "--orders", "12", "--time-scale", "0", "--log-level", "error"])
        .output()
        .expect("failed to run binary");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let header = lines.next().expect("header");
    let row = lines.next().expect("row");
    assert!(header.starts_with("pickers,loaders,bays,orders"));
    assert_eq!(header.split(',').count(), row.split(',').count());
}

#[test]
fn invalid_config_file_fails_with_context() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "bays = 0").expect("write config");

    let output = bin()
        .arg("--config")
        .arg(file.path())
        .output()
        .expect("failed to run binary");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bays"), "stderr should name the field: {stderr}");
}

#[test]
fn invalid_log_filter_is_reported() {
    let output = bin()
        .env_remove("RUST_LOG")
        .args(["--orders", "1", "--log-level", "fulfillment_sim=loudest"])
        .output()
        .expect("failed to run binary");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("initializing logging"), "stderr: {stderr}");
    assert!(stderr.contains("loudest"), "stderr: {stderr}");
}
