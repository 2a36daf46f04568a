//! End-to-end tests for the `edgemap` binary.

use std::path::Path;
use std::process::{Command, Output};

fn edgemap(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_edgemap"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run edgemap")
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn test_run_flat_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("flat.rgb");
    let output = dir.path().join("flat.gray");
    std::fs::write(&input, vec![100u8; 8 * 8 * 3 * 2]).unwrap();

    let out = edgemap(&[
        "run", path_str(&input), "-o", path_str(&output),
        "--width", "8", "--height", "8", "--backend", "cpu",
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let edges = std::fs::read(&output).unwrap();
    assert_eq!(edges.len(), 8 * 8 * 2);
    assert!(edges.iter().all(|&v| v == 0));
}

#[test]
fn test_run_detects_vertical_edge() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("step.rgb");
    let output = dir.path().join("step.gray");
    // Left half black, right half white
    let data: Vec<u8> = (0..16 * 16).flat_map(|i| [if i % 16 >= 8 { 255 } else { 0 }; 3]).collect();
    std::fs::write(&input, data).unwrap();

    let out = edgemap(&[
        "-v", "run", path_str(&input), "-o", path_str(&output),
        "-W", "16", "-H", "16", "-n", "1", "--tile", "4x4", "-b", "cpu",
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Processing 1 image(s) of 16x16"));

    let edges = std::fs::read(&output).unwrap();
    for y in 0..16 {
        let row = &edges[y * 16..y * 16 + 16];
        assert_eq!(row[0], 0);
        assert_eq!(row[15], 0);
        assert!(row[7] > 0 && row[8] > 0, "row {y}: {row:?}");
    }
}

#[test]
fn test_run_rejects_wrong_input_size() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("short.rgb");
    std::fs::write(&input, vec![0u8; 8 * 8 * 3 - 1]).unwrap();

    let out = edgemap(&[
        "run", path_str(&input), "-o", path_str(&dir.path().join("x.gray")),
        "--width", "8", "--height", "8", "--backend", "cpu",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not a whole number"));

    let out = edgemap(&[
        "run", path_str(&input), "-o", path_str(&dir.path().join("x.gray")),
        "--width", "8", "--height", "8", "--batch", "1", "--backend", "cpu",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Buffer size mismatch"));
    assert!(!dir.path().join("x.gray").exists());
}

#[test]
fn test_run_rejects_oversized_radius() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.rgb");
    std::fs::write(&input, vec![0u8; 4 * 4 * 3]).unwrap();

    let out = edgemap(&[
        "run", path_str(&input), "-o", path_str(&dir.path().join("out.gray")),
        "--width", "4", "--height", "4", "--radius", "40", "--backend", "cpu",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Gaussian radius 40"));
}

#[test]
fn test_backends_lists_cpu() {
    let out = edgemap(&["backends"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("[+] CPU"));
}

#[test]
fn test_config_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.yaml");
    std::fs::write(&path, "gaussian_radius: 5\nedge_mode: block\n").unwrap();

    let out = edgemap(&["config", "--config", path_str(&path), "--sigma", "2.5", "--tile", "32x8"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let yaml = String::from_utf8_lossy(&out.stdout);
    assert!(yaml.contains("gaussian_radius: 5"));
    assert!(yaml.contains("gaussian_sigma: 2.5"));
    assert!(yaml.contains("tile_width: 32"));
    assert!(yaml.contains("tile_height: 8"));
    assert!(yaml.contains("edge_mode: block"));
    assert!(yaml.contains("sobel_norm: l1"));
}

#[test]
fn test_log_file_written() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.rgb");
    let log = dir.path().join("edgemap.log");
    std::fs::write(&input, vec![50u8; 4 * 4 * 3]).unwrap();

    let out = edgemap(&[
        "-vv", "--log-file", path_str(&log),
        "run", path_str(&input), "-o", path_str(&dir.path().join("out.gray")),
        "--width", "4", "--height", "4", "--backend", "cpu",
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.contains("stage complete"));
}
