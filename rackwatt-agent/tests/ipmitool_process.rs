//! Process-level runs against the devkit's fake ipmitool
#![cfg(unix)]

use rackwatt_agent::config::ToolConfig;
use rackwatt_agent::execution::{IpmiTool, ProcessRunner};
use rackwatt_agent::report::RunReport;
use rackwatt_agent::scanner::SensorScanner;
use rackwatt_agent::{build_orchestrator, inventory, EngineConfig, HostRecord, SampleStatus};
use rackwatt_devkit::test_utils::process_alive;
use rackwatt_devkit::{Behavior, InventoryBuilder, SensorListingBuilder, TestHarness};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn host(name: &str, address: &str) -> HostRecord {
    HostRecord {
        room: "R1".into(),
        rack: "A".into(),
        name: name.into(),
        address: address.into(),
        username: "admin".into(),
        secret: "changeme".into(),
    }
}

fn runner(harness: &TestHarness, timeout: Duration) -> ProcessRunner {
    let tool = IpmiTool::from_config(&ToolConfig {
        program: harness.tool.program(),
        program_args: harness.tool.program_args(),
        ..ToolConfig::default()
    });
    ProcessRunner::new(tool, Arc::new(SensorScanner::new(&[], &[]).unwrap()), timeout)
}

fn engine_config(harness: &TestHarness, timeout_secs: f64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.ipmitool.program = harness.tool.program();
    config.ipmitool.program_args = harness.tool.program_args();
    config.sampling.timeout_secs = timeout_secs;
    config.sampling.workers = 4;
    config.sampling.retries = 1;
    config
}

#[tokio::test]
async fn confident_match_stops_a_hanging_tool() {
    let harness = TestHarness::new().unwrap();
    let listing = SensorListingBuilder::new()
        .filler(5)
        .watts("Total Power", 342.0)
        .filler(3)
        .lines();
    harness.script("10.0.0.1", vec![Behavior::hang(&listing)]).unwrap();

    let started = Instant::now();
    let outcome = runner(&harness, Duration::from_secs(10))
        .run(&host("n1", "10.0.0.1"), &CancellationToken::new())
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.status, SampleStatus::Ok);
    assert_eq!(outcome.watts, Some(342.0));
    assert_eq!(outcome.log.matched_name, "Total Power");
    assert_eq!(outcome.log.matched_value_text, "342 Watts");
    assert_eq!(outcome.log.exit_code, None);

    let pid = harness.tool.last_pid("10.0.0.1").unwrap();
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn deadline_kills_a_silent_tool() {
    let harness = TestHarness::new().unwrap();
    let listing = SensorListingBuilder::new().filler(4).lines();
    harness.script("10.0.0.2", vec![Behavior::hang(&listing)]).unwrap();

    let started = Instant::now();
    let outcome = runner(&harness, Duration::from_secs(1))
        .run(&host("n2", "10.0.0.2"), &CancellationToken::new())
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, SampleStatus::Timeout);
    assert!(outcome.watts.is_none());
    assert!(elapsed >= Duration::from_millis(950), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "returned late: {:?}", elapsed);
    assert_eq!(outcome.log.lines_scanned, 4);
    assert!(outcome.log.duration_secs >= 0.95);

    let pid = harness.tool.last_pid("10.0.0.2").unwrap();
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn deadline_keeps_the_weak_candidate_seen_so_far() {
    let harness = TestHarness::new().unwrap();
    let listing = SensorListingBuilder::new()
        .filler(2)
        .watts("Sys Power", 300.0)
        .filler(2)
        .lines();
    harness.script("10.0.0.7", vec![Behavior::hang(&listing)]).unwrap();

    let outcome = runner(&harness, Duration::from_secs(1))
        .run(&host("n7", "10.0.0.7"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, SampleStatus::Timeout);
    assert!(outcome.watts.is_none());
    assert_eq!(outcome.log.matched_name, "Sys Power");
    assert_eq!(outcome.log.matched_value_text, "300 Watts");
    assert_eq!(outcome.log.exit_code, None);
}

#[tokio::test]
async fn failing_exit_overrides_a_weak_match() {
    let harness = TestHarness::new().unwrap();
    let listing = SensorListingBuilder::new()
        .filler(2)
        .watts("Sys Power", 280.0)
        .lines();
    harness
        .script("10.0.0.8", vec![Behavior::listing_with_exit(&listing, 1)])
        .unwrap();

    let outcome = runner(&harness, Duration::from_secs(5))
        .run(&host("n8", "10.0.0.8"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, SampleStatus::ToolError(1));
    assert!(outcome.watts.is_none());
    assert_eq!(outcome.log.exit_code, Some(1));
    assert_eq!(outcome.log.matched_name, "Sys Power");
}

#[tokio::test]
async fn full_listing_without_power_sensor() {
    let harness = TestHarness::new().unwrap();
    let listing = SensorListingBuilder::new()
        .filler(20)
        .fan("FAN1", 5400)
        .watts("CPU Power", 120.0)
        .watts("PSU1 Power", 180.0)
        .no_reading("Power Meter")
        .raw("SDR scan complete")
        .lines();
    harness.script("10.0.0.3", vec![Behavior::listing(&listing)]).unwrap();

    let outcome = runner(&harness, Duration::from_secs(5))
        .run(&host("n3", "10.0.0.3"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, SampleStatus::NoPowerOutputFound);
    assert_eq!(outcome.log.lines_scanned, 25);
    assert_eq!(outcome.log.exit_code, Some(0));
    assert!(outcome.log.matched_name.is_empty());
}

#[tokio::test]
async fn weak_match_is_used_after_natural_exit() {
    let harness = TestHarness::new().unwrap();
    let listing = SensorListingBuilder::new()
        .filler(2)
        .watts("Sys Power", 342.0)
        .filler(2)
        .lines();
    harness.script("10.0.0.4", vec![Behavior::listing(&listing)]).unwrap();

    let outcome = runner(&harness, Duration::from_secs(5))
        .run(&host("n4", "10.0.0.4"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, SampleStatus::Ok);
    assert_eq!(outcome.watts, Some(342.0));
    assert_eq!(outcome.log.exit_code, Some(0));
    assert_eq!(outcome.log.lines_scanned, 5);
}

#[tokio::test]
async fn unterminated_last_line_is_scanned() {
    let harness = TestHarness::new().unwrap();
    let mut stdout = SensorListingBuilder::new().filler(2).build();
    stdout.push_str("Power            | 70h | ok  | 7.1 | 50");
    harness
        .script("10.0.0.5", vec![Behavior::Output { stdout, exit_code: 0 }])
        .unwrap();

    let outcome = runner(&harness, Duration::from_secs(5))
        .run(&host("n5", "10.0.0.5"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, SampleStatus::Ok);
    assert_eq!(outcome.watts, Some(50.0));
}

#[tokio::test]
async fn tool_failure_keeps_an_error_excerpt() {
    let harness = TestHarness::new().unwrap();
    harness
        .script(
            "10.0.0.6",
            vec![Behavior::fail(
                "Error: Unable to establish IPMI v2 / RMCP+ session\n\n   Get Device ID command failed\n",
                1,
            )],
        )
        .unwrap();

    let outcome = runner(&harness, Duration::from_secs(5))
        .run(&host("n6", "10.0.0.6"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, SampleStatus::ToolError(1));
    assert_eq!(outcome.log.exit_code, Some(1));
    assert_eq!(
        outcome.log.stderr_excerpt,
        "Error: Unable to establish IPMI v2 / RMCP+ session Get Device ID command failed"
    );
}

#[tokio::test]
async fn three_host_rack_totals() {
    let harness = TestHarness::new().unwrap();
    let confident = SensorListingBuilder::new()
        .filler(3)
        .watts("Total Power", 100.0)
        .lines();
    let plain = SensorListingBuilder::new()
        .filler(3)
        .sensor("Power", "50")
        .lines();
    let nothing = SensorListingBuilder::new().filler(6).lines();

    harness.script("10.0.0.1", vec![Behavior::listing(&confident)]).unwrap();
    harness
        .script(
            "10.0.0.2",
            vec![Behavior::hang(&nothing), Behavior::listing(&plain)],
        )
        .unwrap();
    harness.script("10.0.0.3", vec![Behavior::listing(&nothing)]).unwrap();

    let inventory_path = harness
        .write_inventory(
            &InventoryBuilder::new("hosts")
                .host("R1", "A", "node-01", "10.0.0.1")
                .host("R1", "A", "node-02", "10.0.0.2")
                .host("R1", "A", "node-03", "10.0.0.3"),
        )
        .unwrap();
    let hosts = inventory::load(&inventory_path, "hosts").await.unwrap();

    let config = engine_config(&harness, 1.0);
    let orchestrator = build_orchestrator(&config, CancellationToken::new()).unwrap();
    let outcome = orchestrator.run(&hosts).await;

    assert_eq!(outcome.summary.rack_total("R1", "A"), Some(150.0));
    assert_eq!(outcome.summary.room_total("R1"), Some(150.0));

    let report = RunReport::build(&outcome);
    let statuses: Vec<&str> = report.detail.iter().map(|r| r.status.as_str()).collect();
    assert_eq!(statuses, vec!["ok", "ok", "no_power_output"]);
    assert_eq!(report.detail[1].attempts, 2);
    assert!(report.detail[1].log.starts_with("a1:"));
    assert!(report.detail[1].log.contains(" | a2:"));
    assert_eq!(report.detail[1].watts, Some(50.0));
    assert_eq!(report.ok_count, 2);

    let second = outcome
        .results
        .iter()
        .find(|r| r.host.address == "10.0.0.2")
        .unwrap();
    assert_eq!(second.attempts[0].exit_code, None);
    assert_eq!(harness.tool.attempts("10.0.0.2"), 2);
}

#[tokio::test]
async fn repeated_runs_agree() {
    let harness = TestHarness::new().unwrap();
    let mut hosts = Vec::new();
    for i in 1..=6 {
        let address = format!("10.0.1.{}", i);
        let listing = SensorListingBuilder::new()
            .filler(i)
            .watts("System Power", 100.0 + i as f64)
            .lines();
        harness.script(&address, vec![Behavior::listing(&listing)]).unwrap();
        hosts.push(host(&format!("node-{}", i), &address));
    }
    let orchestrator = build_orchestrator(&engine_config(&harness, 5.0), CancellationToken::new()).unwrap();

    let first = orchestrator.run(&hosts).await;
    let second = orchestrator.run(&hosts).await;

    assert_eq!(first.summary, second.summary);
    assert_eq!(first.summary.grand_total(), 621.0);
    assert_eq!(first.ok_count(), 6);
}

#[tokio::test]
async fn stop_terminates_in_flight_tools() {
    let harness = TestHarness::new().unwrap();
    let silent: Vec<String> = Vec::new();
    let hosts: Vec<HostRecord> = (1..=3)
        .map(|i| host(&format!("node-{}", i), &format!("10.0.2.{}", i)))
        .collect();
    for h in &hosts {
        harness.script(&h.address, vec![Behavior::hang(&silent)]).unwrap();
    }

    let cancel = CancellationToken::new();
    let mut config = engine_config(&harness, 20.0);
    config.sampling.workers = 2;
    let orchestrator = build_orchestrator(&config, cancel.clone()).unwrap();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });
    let started = Instant::now();
    let outcome = orchestrator.run(&hosts).await;
    stopper.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.results.iter().all(|r| r.status == SampleStatus::Cancelled));
    for h in &hosts[..2] {
        let pid = harness.tool.last_pid(&h.address).unwrap();
        assert!(!process_alive(pid));
    }
    assert_eq!(harness.tool.attempts("10.0.2.3"), 0);
}
