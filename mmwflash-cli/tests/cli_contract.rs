//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("mmwflash");
    cmd.env_remove("MMWFLASH_PORT")
        .env_remove("MMWFLASH_BAUD")
        .env_remove("MMWFLASH_PART");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mmwflash"))
        .stdout(predicate::str::contains("--firmware"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mmwflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn missing_firmware_exits_one() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-f", "does_not_exist.bin", "-c", "COM_TEST"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does_not_exist.bin"));
}

#[test]
fn default_firmware_missing_exits_one() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("vital_signs_tracking_6843AOP_demo.bin"));
}

#[test]
fn invalid_storage_is_usage_error() {
    let mut cmd = cli_cmd();
    cmd.args(["--storage", "tape"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("tape"));
}

#[test]
fn unavailable_port_exits_one() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("app.bin");
    fs::write(&image, [0x35, 0x51, 0x00, 0x01, 0xAA, 0xBB]).expect("image should be written");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("-f")
        .arg(&image)
        .args(["-c", "/dev/mmwflash-no-such-port", "--timeout", "1", "-q"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("connect failed"));
}
