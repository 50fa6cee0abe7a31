//! Process-level tests driving the real `bitkv-server` and `bitkv-client`
//! binaries, as opposed to `tests/custom.rs`'s in-process `Server`/
//! `KvsClient` scenarios.

use std::net::TcpListener;
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::tempdir;

struct ServerProcess {
    child: Child,
    addr: String,
}

impl ServerProcess {
    fn start(data_path: &std::path::Path, threshold: f64) -> Self {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let addr = format!("127.0.0.1:{}", port);

        let child = Command::cargo_bin("bitkv-server")
            .unwrap()
            .arg("--addr")
            .arg(&addr)
            .arg("--data")
            .arg(data_path)
            .arg("--threshold")
            .arg(threshold.to_string())
            .spawn()
            .unwrap();

        // Give the listener a moment to bind before the first client connects.
        thread::sleep(Duration::from_millis(300));

        ServerProcess { child, addr }
    }

    /// A `bitkv-client` invocation against this server. The subcommand and
    /// its positional args must be added before `--addr`, since `--addr`
    /// belongs to the subcommand, not to `ClientArgs` itself.
    fn client(&self) -> ClientCommand {
        ClientCommand {
            cmd: Command::cargo_bin("bitkv-client").unwrap(),
            addr: self.addr.clone(),
        }
    }

    fn shutdown(mut self) {
        let _ = self.client().arg("shutdown").output();
        let _ = self.child.wait();
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Builds a `bitkv-client` invocation, appending `--addr` last so it always
/// lands after the subcommand's own positional args.
struct ClientCommand {
    cmd: Command,
    addr: String,
}

impl ClientCommand {
    fn arg<S: AsRef<std::ffi::OsStr>>(mut self, arg: S) -> Self {
        self.cmd.arg(arg);
        self
    }

    fn assert(mut self) -> assert_cmd::assert::Assert {
        self.cmd.arg("--addr").arg(&self.addr);
        self.cmd.assert()
    }

    fn output(mut self) -> std::io::Result<std::process::Output> {
        self.cmd.arg("--addr").arg(&self.addr);
        self.cmd.output()
    }
}

#[test]
fn cli_put_then_read_round_trips_through_real_processes() {
    let dir = tempdir().unwrap();
    let server = ServerProcess::start(&dir.path().join("store.dat"), 0.5);

    server
        .client()
        .arg("put")
        .arg("key1")
        .arg("hello")
        .assert()
        .success();

    server
        .client()
        .arg("read")
        .arg("key1")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));

    server.shutdown();
}

#[test]
fn cli_read_of_missing_key_reports_not_found() {
    let dir = tempdir().unwrap();
    let server = ServerProcess::start(&dir.path().join("store.dat"), 0.5);

    server
        .client()
        .arg("read")
        .arg("never-put")
        .assert()
        .success()
        .stdout(predicate::str::contains("Key not found"));

    server.shutdown();
}

#[test]
fn cli_delete_of_missing_key_fails_nonzero() {
    let dir = tempdir().unwrap();
    let server = ServerProcess::start(&dir.path().join("store.dat"), 0.5);

    server
        .client()
        .arg("delete")
        .arg("never-put")
        .assert()
        .failure();

    server.shutdown();
}

#[test]
fn cli_readrange_prints_every_pair_in_order() {
    let dir = tempdir().unwrap();
    let server = ServerProcess::start(&dir.path().join("store.dat"), 0.5);

    server.client().arg("put").arg("a").arg("1").assert().success();
    server.client().arg("put").arg("b").arg("2").assert().success();
    server.client().arg("put").arg("c").arg("3").assert().success();

    server
        .client()
        .arg("readrange")
        .arg("a")
        .arg("b")
        .assert()
        .success()
        .stdout(predicate::str::contains("a\t1").and(predicate::str::contains("b\t2")));

    server.shutdown();
}

#[test]
fn cli_batchput_installs_every_item() {
    let dir = tempdir().unwrap();
    let server = ServerProcess::start(&dir.path().join("store.dat"), 0.5);

    server
        .client()
        .arg("batchput")
        .arg("x=1")
        .arg("y=2")
        .arg("z=3")
        .assert()
        .success();

    server
        .client()
        .arg("read")
        .arg("y")
        .assert()
        .success()
        .stdout(predicate::str::contains("2"));

    server.shutdown();
}
