//! End-to-end CLI behaviour tests for `formula-install`.
//!
//! These scenarios invoke the installer binary against descriptor files
//! written to a temporary directory and, where a download is needed, a
//! loopback release server.

mod support;

use formula_installer::test_utils::{FileEntry, tar_gz_bytes, tool_descriptor};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::path::PathBuf;
use std::process::{Command, Output};
use support::{MockServer, Route, TOOL_ARCHIVE_PATH, entries};
use tempfile::TempDir;

struct CliWorld {
    // Keep temp_dir alive for the lifetime of the scenario.
    temp_dir: TempDir,
    server: Option<MockServer>,
    genuine: Vec<u8>,
    descriptor: Option<PathBuf>,
    output: Option<Output>,
}

#[fixture]
fn cli_world() -> CliWorld {
    CliWorld {
        temp_dir: TempDir::new().expect("failed to create temp dir"),
        server: None,
        genuine: tar_gz_bytes(&[FileEntry::executable("tool", b"#!/bin/sh\necho tool\n")]),
        descriptor: None,
        output: None,
    }
}

impl CliWorld {
    fn root(&self) -> PathBuf {
        self.temp_dir.path().join("root")
    }

    fn write_descriptor(&mut self, base_url: &str) {
        let descriptor = tool_descriptor(base_url, &self.genuine);
        let path = self.temp_dir.path().join("tool.json");
        let json = serde_json::to_string_pretty(&descriptor).expect("serialise descriptor");
        std::fs::write(&path, json).expect("write descriptor");
        self.descriptor = Some(path);
    }

    fn run(&mut self, args: &[&str]) {
        let descriptor = self.descriptor.as_ref().expect("descriptor step ran");
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_formula-install"));
        cmd.args(args.iter().take(1))
            .arg(descriptor)
            .args(args.iter().skip(1))
            .env_remove("RUST_LOG");
        if args.first() == Some(&"install") {
            cmd.arg("--staging-dir")
                .arg(self.temp_dir.path().join("staging"));
        }
        let output = cmd.output().expect("failed to run formula-install");
        self.output = Some(output);
    }

    fn output(&self) -> &Output {
        self.output.as_ref().expect("output not set")
    }

    fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output().stderr).into_owned()
    }
}

#[given("a descriptor file for a release server at \"{base_url}\"")]
fn given_descriptor_for(cli_world: &mut CliWorld, base_url: String) {
    cli_world.write_descriptor(&base_url);
}

#[given("a descriptor path that does not exist")]
fn given_missing_descriptor(cli_world: &mut CliWorld) {
    cli_world.descriptor = Some(cli_world.temp_dir.path().join("absent.toml"));
}

#[given("a release server serving the tool archive")]
fn given_tool_archive(cli_world: &mut CliWorld) {
    let server = MockServer::start();
    server.route(TOOL_ARCHIVE_PATH, Route::Body(cli_world.genuine.clone()));
    cli_world.server = Some(server);
}

#[given("a release server serving a tampered archive")]
fn given_tampered_archive(cli_world: &mut CliWorld) {
    let server = MockServer::start();
    server.route(TOOL_ARCHIVE_PATH, Route::Body(b"tampered".to_vec()));
    cli_world.server = Some(server);
}

#[given("a descriptor file for the release server")]
fn given_descriptor_for_server(cli_world: &mut CliWorld) {
    let base_url = cli_world
        .server
        .as_ref()
        .expect("server step ran")
        .base_url()
        .to_owned();
    cli_world.write_descriptor(&base_url);
}

#[when("the installer checks the descriptor with version override \"{version}\"")]
fn when_check_with_version(cli_world: &mut CliWorld, version: String) {
    cli_world.run(&["check", "--override-version", &version]);
}

#[when("the installer installs into a temporary root")]
fn when_install(cli_world: &mut CliWorld) {
    let root = cli_world.root();
    let root = root.to_str().expect("UTF-8 temp path").to_owned();
    cli_world.run(&["install", "--root", &root]);
}

#[when("the installer installs into a temporary root allowing plaintext")]
fn when_install_plaintext(cli_world: &mut CliWorld) {
    let root = cli_world.root();
    let root = root.to_str().expect("UTF-8 temp path").to_owned();
    cli_world.run(&["install", "--root", &root, "--allow-insecure", "--max-retries", "1"]);
}

#[when("the installer installs into a temporary root with \"{flag}\"")]
fn when_install_with_flag(cli_world: &mut CliWorld, flag: String) {
    let root = cli_world.root();
    let root = root.to_str().expect("UTF-8 temp path").to_owned();
    cli_world.run(&["install", "--root", &root, &flag]);
}

#[then("the CLI exits with status \"{code}\"")]
fn then_exit_status(cli_world: &mut CliWorld, code: String) {
    let expected: i32 = code.parse().expect("numeric status");
    assert_eq!(
        cli_world.output().status.code(),
        Some(expected),
        "stderr: {}",
        cli_world.stderr()
    );
}

#[then("stderr contains \"{text}\"")]
fn then_stderr_contains(cli_world: &mut CliWorld, text: String) {
    let stderr = cli_world.stderr();
    assert!(stderr.contains(&text), "expected {text:?} in stderr: {stderr}");
}

#[then("the tool exists under the temporary root")]
fn then_tool_exists(cli_world: &mut CliWorld) {
    let tool = cli_world.root().join("usr/local/bin/tool");
    assert!(tool.is_file(), "{} missing", tool.display());
}

#[then("nothing exists under the temporary root")]
fn then_nothing_exists(cli_world: &mut CliWorld) {
    let root = cli_world.root();
    assert!(!root.exists() || entries(&root).is_empty());
}

#[scenario(
    path = "tests/features/cli.feature",
    name = "Check prints the resolved plan"
)]
fn scenario_check_prints_plan(cli_world: CliWorld) {
    let _ = cli_world;
}

#[scenario(
    path = "tests/features/cli.feature",
    name = "A missing descriptor is a usage error"
)]
fn scenario_missing_descriptor(cli_world: CliWorld) {
    let _ = cli_world;
}

#[scenario(
    path = "tests/features/cli.feature",
    name = "Install from a release server"
)]
fn scenario_install_from_server(cli_world: CliWorld) {
    let _ = cli_world;
}

#[scenario(
    path = "tests/features/cli.feature",
    name = "A tampered archive fails the install"
)]
fn scenario_tampered_archive(cli_world: CliWorld) {
    let _ = cli_world;
}

#[scenario(
    path = "tests/features/cli.feature",
    name = "Dry run touches nothing"
)]
fn scenario_dry_run(cli_world: CliWorld) {
    let _ = cli_world;
}
