//! Separate OS processes recording into one counter store
//!
//! Runs the `slotmeter record` binary several times in parallel against the
//! same store file and checks every event landed.

use slotmeter::CounterSlab;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let rules = dir.join("metrics.idx");
    std::fs::write(&rules, "0\t/api\t200\n1\t/api\t500\n").unwrap();

    let config = dir.join("slotmeter.toml");
    std::fs::write(
        &config,
        format!(
            "[rules]\npath = {:?}\n\n[store]\npath = {:?}\nslot_count = 4\n\n[observability]\nlog_level = \"warn\"\n",
            rules.display().to_string(),
            dir.join("metrics.dat").display().to_string(),
        ),
    )
    .unwrap();
    config
}

fn slotmeter(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_slotmeter"));
    cmd.arg("--config")
        .arg(config)
        .env_remove("SLOTMETER_RULES")
        .env_remove("SLOTMETER_COLLECTOR")
        .env_remove("SLOTMETER_DOMAIN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_parallel_processes_share_counts() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let children: Vec<_> = (0..6)
        .map(|i| {
            let status = if i % 3 == 0 { "500" } else { "200" };
            let child = slotmeter(&config)
                .args(["record", "/api/users", status])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .expect("binary should start");
            (status, child)
        })
        .collect();

    for (status, child) in children {
        let output = child.wait_with_output().expect("binary should run");
        assert!(output.status.success(), "record {} failed: {:?}", status, output);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(
            stdout.lines().any(|line| line == "recorded"),
            "unexpected output: {}",
            stdout
        );
    }

    let slab = CounterSlab::open(dir.path().join("metrics.dat"), 4).unwrap();
    assert_eq!(slab.peek(), vec![4, 2, 0, 0]);
}

#[test]
fn test_unmapped_record_reports_not_recorded() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let output = slotmeter(&config)
        .args(["record", "/static/app.js", "200"])
        .output()
        .expect("binary should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|line| line == "not recorded"));
}

#[test]
fn test_show_prints_without_draining() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let slab = CounterSlab::open(dir.path().join("metrics.dat"), 4).unwrap();
    slab.increment(3).unwrap();

    let output = slotmeter(&config).arg("show").output().expect("binary should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3\t1"), "unexpected output: {}", stdout);

    assert_eq!(slab.peek()[3], 1);
}
