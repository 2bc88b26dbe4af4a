#![cfg(not(target_arch = "wasm32"))]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use partclone_image::test_utils::{self as image_test_utils, Layout};

const BLOCK_SIZE: u64 = 4096;

/// `bits` has one char per block; a 4-byte checksum record follows every 2 used blocks.
fn layout(bits: &str) -> Layout {
    Layout::new(BLOCK_SIZE as u32, bits)
        .checksums(2, 4)
        .filesystem("EXTFS")
}

fn write_image(dir: &Path, name: &str, layout: &Layout) -> (PathBuf, Vec<u8>) {
    let path = dir.join(name);
    let device = image_test_utils::write_image(&path, layout).unwrap();
    (path, device)
}

fn cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("partclone-extract");
    cmd.env_remove("PARTCLONE_CATALOG").env_remove("PARTCLONE_LOG");
    cmd
}

#[test]
fn extract_restores_device_and_leaves_holes() {
    let dir = tempdir().unwrap();
    let (image, device) = write_image(dir.path(), "disk.pcl", &layout("1101000000000111"));
    let out_path = dir.path().join("disk.raw");

    cmd()
        .args(["extract", "--quiet"])
        .arg(&image)
        .arg(&out_path)
        .assert()
        .success();

    assert_eq!(fs::read(&out_path).unwrap(), device);

    // Existing output is refused without --force.
    cmd()
        .args(["extract", "--quiet"])
        .arg(&image)
        .arg(&out_path)
        .assert()
        .failure();
    cmd()
        .args(["extract", "--quiet", "--force"])
        .arg(&image)
        .arg(&out_path)
        .assert()
        .success();
}

#[test]
fn read_writes_requested_range() {
    let dir = tempdir().unwrap();
    let (image, device) = write_image(dir.path(), "disk.pcl", &layout("0110"));
    let out_path = dir.path().join("range.bin");

    cmd()
        .args(["read", "--offset", "3000", "--length", "6000", "--output"])
        .arg(&out_path)
        .arg(&image)
        .assert()
        .success();
    assert_eq!(fs::read(&out_path).unwrap(), &device[3000..9000]);

    let assert = cmd()
        .args(["read", "--offset", "4096", "--length", "16"])
        .arg(&image)
        .assert()
        .success();
    assert_eq!(assert.get_output().stdout, &device[4096..4112]);
}

#[test]
fn read_past_end_fails() {
    let dir = tempdir().unwrap();
    let (image, _) = write_image(dir.path(), "disk.pcl", &layout("11"));
    cmd()
        .args(["read", "--offset", "8000", "--length", "500"])
        .arg(&image)
        .assert()
        .failure();
}

#[test]
fn info_json_reports_geometry() {
    let dir = tempdir().unwrap();
    let (image, _) = write_image(dir.path(), "disk.pcl", &layout("10110"));

    let assert = cmd().args(["info", "--json"]).arg(&image).assert().success();
    let info: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(info["header"]["total_block"], 5);
    assert_eq!(info["header"]["used_block"], 3);
    assert_eq!(info["header"]["byte_order"], "little");
    assert_eq!(info["extents"], 3);
    assert_eq!(info["block_start"], 110 + 1 + 4);
    assert_eq!(info["checksum_records"], 2);
    assert_eq!(info["image_len"], info["expected_image_len"]);
}

#[test]
fn extents_json_lists_runs() {
    let dir = tempdir().unwrap();
    let (image, _) = write_image(dir.path(), "disk.pcl", &layout("0111"));

    let assert = cmd().args(["extents", "--json"]).arg(&image).assert().success();
    let extents: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let extents = extents.as_array().unwrap();
    // The checksum record after the second used block splits the run.
    assert_eq!(extents.len(), 2);
    assert_eq!(extents[0]["start_block"], 1);
    assert_eq!(extents[0]["length"], 2 * BLOCK_SIZE);
    assert_eq!(extents[1]["start_block"], 3);
}

#[test]
fn catalog_resolves_export_names() {
    let dir = tempdir().unwrap();
    let (_, device) = write_image(dir.path(), "root.pcl", &layout("1001"));
    let out_path = dir.path().join("out.bin");

    cmd()
        .arg("--catalog")
        .arg(dir.path())
        .args(["read", "root.pcl", "--offset", "0", "--length", "16384", "--output"])
        .arg(&out_path)
        .assert()
        .success();
    assert_eq!(fs::read(&out_path).unwrap(), device);

    let assert = cmd()
        .env("PARTCLONE_CATALOG", dir.path())
        .arg("list")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("root.pcl"));
}

#[test]
fn not_an_image_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("junk.bin");
    fs::write(&path, vec![0u8; 4096]).unwrap();
    cmd().arg("info").arg(&path).assert().failure();
}

#[test]
fn extract_clamps_last_block_to_device_size() {
    let dir = tempdir().unwrap();
    let device_size = 4 * BLOCK_SIZE - 100;
    let (image, device) = write_image(
        dir.path(),
        "disk.pcl",
        &layout("0011").trim_device(100),
    );
    assert_eq!(device.len() as u64, device_size);
    let out_path = dir.path().join("disk.raw");

    cmd()
        .args(["extract", "--quiet"])
        .arg(&image)
        .arg(&out_path)
        .assert()
        .success();

    let out = fs::read(&out_path).unwrap();
    assert_eq!(out.len() as u64, device_size);
    assert_eq!(out, device);
}
