//! Exercises the `fleet-cli` binary itself — `serve` and `health` are the
//! whole of its surface, so these drive it the way an operator would rather
//! than calling `fleet-daemon` directly.

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Kills the spawned `serve` process even if an assertion above panics.
struct ServeGuard(Child);

impl Drop for ServeGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

#[test]
fn health_reports_ok_once_serve_is_listening() {
    let data_dir = tempfile::tempdir().unwrap();
    let addr = format!("127.0.0.1:{}", free_port());

    let child = Command::new(env!("CARGO_BIN_EXE_fleet-cli"))
        .arg("serve")
        .env("FLEET_DATA_DIR", data_dir.path())
        .env("FLEET_BIND_ADDR", &addr)
        .env("FLEET_LOG_LEVEL", "error")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn fleet-cli serve");
    let _guard = ServeGuard(child);

    let url = format!("http://{addr}");
    for attempt in 0..50 {
        let mut cmd = assert_cmd::Command::cargo_bin("fleet-cli").unwrap();
        cmd.args(["health", "--addr", &url, "--timeout-secs", "1"]);
        if let Ok(output) = cmd.output() {
            if output.status.success() {
                let stdout = String::from_utf8_lossy(&output.stdout);
                assert!(stdout.contains("\"status\":\"ok\""), "unexpected health output: {stdout}");
                return;
            }
        }
        if attempt == 49 {
            panic!("fleet-cli serve at {addr} never became healthy");
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn health_reports_failure_when_core_is_unreachable() {
    let addr = format!("127.0.0.1:{}", free_port());
    let url = format!("http://{addr}");

    let mut cmd = assert_cmd::Command::cargo_bin("fleet-cli").unwrap();
    cmd.args(["health", "--addr", &url, "--timeout-secs", "1"]);
    cmd.assert().failure().stderr(predicate::str::contains("health check"));
}
