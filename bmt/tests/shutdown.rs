use std::process::{Child, Command, Stdio};
use std::time::Duration;

use bmt_test::collector::TestCollector;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

const BMT_EXE: &str = env!("CARGO_BIN_EXE_bmt");

fn spawn_bmt(collector: &TestCollector, workers: &str) -> Child {
    Command::new(BMT_EXE)
        .arg("run")
        .arg(workers)
        .env("BMT__COLLECTOR__HOST", collector.addr().ip().to_string())
        .env("BMT__COLLECTOR__PORT", collector.addr().port().to_string())
        .env("BMT__RAMP__INTERVAL", "100ms")
        .env("BMT__EMITTER__PACING_INTERVAL", "10ms")
        .env("BMT__LOGGING__LEVEL", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to spawn subprocess")
}

fn assert_clean_shutdown(mut child: Child, signal: Signal) {
    let pid = Pid::from_raw(child.id() as i32);
    signal::kill(pid, signal).expect("Failed to send signal");

    let output = child.wait().expect("Failed to wait on child process");

    assert!(
        output.success(),
        "Process exited with non-zero status: {:?}",
        output.code()
    );
}

// The collector has to keep answering while the test thread blocks on the child.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ramps_up_and_exits_on_sigint() {
    let collector = TestCollector::new().await;
    let child = spawn_bmt(&collector, "2");

    let ramped = collector
        .wait_for(&["bmt_0", "bmt_1"], 50, Duration::from_secs(20))
        .await;
    assert!(ramped, "workers did not reach the collector");

    assert_clean_shutdown(child, Signal::SIGINT);
    assert!(collector.entries("bmt_2").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exits_on_sigterm() {
    let collector = TestCollector::new().await;
    let child = spawn_bmt(&collector, "1");

    assert!(
        collector
            .wait_for(&["bmt_0"], 50, Duration::from_secs(20))
            .await
    );

    assert_clean_shutdown(child, Signal::SIGTERM);
}

#[test]
fn rejects_zero_workers() {
    let output = Command::new(BMT_EXE)
        .args(["run", "0"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("Failed to spawn subprocess");

    assert!(!output.success());
}
