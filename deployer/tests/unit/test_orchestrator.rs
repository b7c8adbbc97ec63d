//! Orchestrator tests

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use nugget_deployer::deploy::events::event_channel;
use nugget_deployer::deploy::fsm::RunState;
use nugget_deployer::deploy::gate::{flash_gate, GateHandle};
use nugget_deployer::deploy::outputs::Outputs;
use nugget_deployer::deploy::orchestrator::{
    DeployConfig, DeviceOrchestrator, DeviceStatus, RunOptions, ALL_DEVICES_TARGET,
    FIRMWARE_UNCHANGED,
};
use nugget_deployer::deploy::strategy::StrategyRegistry;
use nugget_deployer::errors::DeployError;
use nugget_deployer::models::events::DeployEvent;
use nugget_deployer::models::manifest::{DeployMethod, DeviceManifest};
use nugget_deployer::models::spec::{DeviceSpec, NuggetSpec};

use crate::fakes::{
    auto_confirm, flash_manifest, manifest, registry, FakeCloud, FakeProvisioner, Journal,
    RecordingStrategy,
};

struct Harness {
    orchestrator: DeviceOrchestrator,
    events: mpsc::UnboundedReceiver<DeployEvent>,
    gate: GateHandle,
}

fn harness(manifests: Vec<DeviceManifest>, strategy: RecordingStrategy) -> Harness {
    let mut strategies = StrategyRegistry::empty();
    strategies.register(Arc::new(strategy));
    let (sink, events) = event_channel();
    let (gate, flash_gate) = flash_gate();
    let orchestrator = DeviceOrchestrator::new(
        strategies,
        sink,
        flash_gate,
        DeployConfig {
            workspace_dir: PathBuf::from("/tmp/nugget-workspace"),
            cloud_region: "us-central1".to_string(),
        },
    )
    .with_registry(Arc::new(registry(manifests)));
    Harness {
        orchestrator,
        events,
        gate,
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<DeployEvent>) -> Vec<DeployEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn spec(plugins: &[&str]) -> NuggetSpec {
    NuggetSpec {
        devices: plugins.iter().map(|p| DeviceSpec::new(*p)).collect(),
        ..Default::default()
    }
}

fn provisioned_manifest(id: &str) -> DeviceManifest {
    manifest(json!({
        "id": id,
        "name": "Sensor Node",
        "deploy": {
            "method": "flash",
            "requires": ["agent_id", "API_KEY", "cloud_url"],
            "runtime_provision": { "required": true, "config_fields": ["agent_id"] },
            "flash": { "files": ["sensor.py"] }
        },
        "spec_mapping": { "role": "sensor_node", "extract_fields": { "runtime.wifi_ssid": "WIFI_SSID" } }
    }))
}

#[tokio::test]
async fn test_provisioning_runs_once_before_any_flash() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let injections = strategy.injections.clone();
    let provisioner = Arc::new(FakeProvisioner::new(journal.clone()));
    let seen = provisioner.seen.clone();

    let mut h = harness(
        vec![flash_manifest("display", &[], &[]), provisioned_manifest("sensor")],
        strategy,
    );
    h.orchestrator = h.orchestrator.with_provisioner(provisioner);
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());

    let mut nugget = spec(&["display", "sensor"]);
    nugget.devices[1] = DeviceSpec::new("sensor").with_field("WIFI_SSID", "home");

    let report = h
        .orchestrator
        .deploy_devices(&nugget, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["provision", "flash display", "flash sensor"]);
    assert_eq!(report.outputs.get("agent_id"), Some("agent-1"));
    assert_eq!(report.outputs.get("AGENT_ID"), Some("agent-1"));
    assert_eq!(report.outputs.get("api_key"), Some("key-1"));

    // the provisioner sees device-sourced configuration
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].get_path("runtime.wifi_ssid"), Some(&json!("home")));

    let injected = injections.lock().unwrap();
    let sensor = &injected["sensor"];
    assert_eq!(sensor.get("agent_id").map(String::as_str), Some("agent-1"));
    assert_eq!(sensor.get("API_KEY").map(String::as_str), Some("key-1"));
    assert!(!sensor.contains_key("cloud_url"));

    let events = drain(&mut h.events);
    assert!(events.contains(&DeployEvent::Error {
        message: "Missing required output cloud_url for sensor_node".to_string(),
        recoverable: true,
    }));
    assert!(events.contains(&DeployEvent::FlashComplete {
        device_role: "sensor_node".to_string(),
        success: true,
        message: "flashed".to_string(),
    }));
}

#[tokio::test]
async fn test_failing_device_does_not_stop_the_run() {
    let journal = Journal::default();
    let mut strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    strategy.fail_for = Some("b".to_string());

    let mut h = harness(
        vec![
            flash_manifest("a", &[], &[]),
            flash_manifest("b", &[], &[]),
            flash_manifest("c", &[], &[]),
        ],
        strategy,
    );
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());

    let report = h
        .orchestrator
        .deploy_devices(&spec(&["a", "b", "c"]), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["flash a", "flash b", "flash c"]);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.devices[1].status, DeviceStatus::Failed);

    let events = drain(&mut h.events);
    let completions: Vec<(String, bool)> = events
        .iter()
        .filter_map(|e| match e {
            DeployEvent::FlashComplete {
                device_role,
                success,
                ..
            } => Some((device_role.clone(), *success)),
            _ => None,
        })
        .collect();
    assert_eq!(
        completions,
        vec![
            ("a".to_string(), true),
            ("b".to_string(), false),
            ("c".to_string(), true),
        ]
    );
    assert_eq!(
        events.last(),
        Some(&DeployEvent::DeployComplete {
            target: ALL_DEVICES_TARGET.to_string(),
            url: None,
        })
    );
}

#[tokio::test]
async fn test_cycle_fails_before_any_device() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let mut h = harness(
        vec![
            flash_manifest("a", &["x"], &["y"]),
            flash_manifest("b", &["y"], &["x"]),
        ],
        strategy,
    );
    let state = h.orchestrator.subscribe_state();

    let result = h
        .orchestrator
        .deploy_devices(&spec(&["a", "b"]), RunOptions::default())
        .await;

    assert!(matches!(result, Err(DeployError::DependencyCycle { .. })));
    assert!(journal.entries().is_empty());
    assert!(matches!(&*state.borrow(), RunState::Failed { .. }));

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        DeployEvent::Error { recoverable: false, message } if message.contains("cycle")
    ));
}

#[tokio::test]
async fn test_outputs_flow_from_cloud_to_later_device() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let injections = strategy.injections.clone();
    let cloud_manifest = manifest(json!({
        "id": "dashboard",
        "name": "Dashboard",
        "deploy": { "method": "cloud", "provides": ["cloud_url"], "cloud": { "region": "europe-west1" } }
    }));

    let mut h = harness(
        vec![flash_manifest("gateway", &[], &["cloud_url"]), cloud_manifest],
        strategy,
    );
    h.orchestrator = h.orchestrator.with_cloud(Arc::new(FakeCloud {
        journal: journal.clone(),
        url: Some("https://dash.run.app".to_string()),
    }));
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());

    let mut nugget = spec(&["gateway", "dashboard"]);
    nugget.set_path("project.name", json!("Weather"));

    let report = h
        .orchestrator
        .deploy_devices(&nugget, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(
        journal.entries(),
        vec!["cloud Weather europe-west1", "flash gateway"]
    );
    assert_eq!(report.outputs.get("cloud_url"), Some("https://dash.run.app"));
    assert_eq!(
        injections.lock().unwrap()["gateway"].get("cloud_url").map(String::as_str),
        Some("https://dash.run.app")
    );

    let events = drain(&mut h.events);
    assert!(events.contains(&DeployEvent::DeployComplete {
        target: "dashboard".to_string(),
        url: Some("https://dash.run.app".to_string()),
    }));
}

#[tokio::test]
async fn test_cloud_failure_still_completes() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let cloud_manifest = manifest(json!({
        "id": "dashboard",
        "name": "Dashboard",
        "deploy": { "method": "cloud", "provides": ["cloud_url"] }
    }));

    let mut h = harness(vec![cloud_manifest], strategy);
    h.orchestrator = h.orchestrator.with_cloud(Arc::new(FakeCloud {
        journal: journal.clone(),
        url: None,
    }));

    let report = h
        .orchestrator
        .deploy_devices(&spec(&["dashboard"]), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert!(report.outputs.is_empty());

    let events = drain(&mut h.events);
    assert_eq!(
        events.first(),
        Some(&DeployEvent::DeployStarted {
            target: "dashboard".to_string()
        })
    );
    assert!(events.contains(&DeployEvent::DeployComplete {
        target: "dashboard".to_string(),
        url: None,
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, DeployEvent::Error { recoverable: true, .. })));
}

#[tokio::test]
async fn test_provisioning_failure_is_recoverable() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let mut provisioner = FakeProvisioner::new(journal.clone());
    provisioner.fail = true;

    let mut h = harness(vec![provisioned_manifest("sensor")], strategy);
    h.orchestrator = h.orchestrator.with_provisioner(Arc::new(provisioner));
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());

    let report = h
        .orchestrator
        .deploy_devices(&spec(&["sensor"]), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["provision", "flash sensor"]);
    assert!(!report.outputs.contains("agent_id"));

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        DeployEvent::Error { recoverable: true, message } if message.contains("runtime unreachable")
    )));
}

#[tokio::test]
async fn test_flash_waits_for_the_gate() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let mut h = harness(vec![flash_manifest("blink", &[], &[])], strategy);

    let mut state = h.orchestrator.subscribe_state();
    let gate = h.gate.clone();
    let flash_journal = journal.clone();
    let confirm = tokio::spawn(async move {
        state
            .wait_for(|s| matches!(s, RunState::Gated { .. }))
            .await
            .unwrap();
        // nothing flashes while the gate is closed
        assert!(flash_journal.entries().is_empty());
        gate.ready().unwrap();
    });

    let report = h
        .orchestrator
        .deploy_devices(&spec(&["blink"]), RunOptions::default())
        .await
        .unwrap();
    confirm.await.unwrap();

    assert_eq!(journal.entries(), vec!["flash blink"]);
    assert_eq!(report.devices[0].status, DeviceStatus::Deployed);

    let events = drain(&mut h.events);
    assert_eq!(
        events[0],
        DeployEvent::FlashPrompt {
            device_role: "blink".to_string(),
            message: "Plug in your blink via USB and press Ready when it's connected.".to_string(),
        }
    );
    assert!(events.contains(&DeployEvent::FlashProgress {
        device_role: "blink".to_string(),
        step: "Flashing files".to_string(),
        progress: 50,
    }));
}

#[tokio::test]
async fn test_closed_gate_fails_the_device() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let Harness {
        mut orchestrator,
        mut events,
        gate,
    } = harness(vec![flash_manifest("blink", &[], &[])], strategy);
    drop(gate);

    let report = orchestrator
        .deploy_devices(&spec(&["blink"]), RunOptions::default())
        .await
        .unwrap();

    assert!(journal.entries().is_empty());
    assert_eq!(report.devices[0].status, DeviceStatus::Failed);
    assert!(drain(&mut events).contains(&DeployEvent::FlashComplete {
        device_role: "blink".to_string(),
        success: false,
        message: DeployError::GateClosed.to_string(),
    }));
}

fn flashed_credentials(cloud_url: &str) -> Outputs {
    let mut outputs = Outputs::new();
    outputs.insert_both_cases("agent_id", "agent-0");
    outputs.insert_both_cases("api_key", "key-0");
    outputs.insert("cloud_url", cloud_url);
    outputs
}

fn keep_firmware(previous: Option<Outputs>) -> RunOptions {
    RunOptions {
        skip_flash: true,
        previous_outputs: previous,
    }
}

fn dashboard_manifest() -> DeviceManifest {
    manifest(json!({
        "id": "dashboard",
        "name": "Dashboard",
        "deploy": {
            "method": "cloud",
            "provides": ["cloud_url", "api_key"],
            "cloud": { "region": "europe-west1" }
        }
    }))
}

#[tokio::test]
async fn test_config_only_run_keeps_flashed_credentials() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let mut h = harness(vec![provisioned_manifest("sensor")], strategy);
    h.orchestrator = h
        .orchestrator
        .with_provisioner(Arc::new(FakeProvisioner::new(journal.clone())));
    let previous = flashed_credentials("https://dash.run.app");

    let report = h
        .orchestrator
        .deploy_devices(&spec(&["sensor"]), keep_firmware(Some(previous.clone())))
        .await
        .unwrap();

    // no new agent, no flash
    assert!(journal.entries().is_empty());
    assert_eq!(report.outputs, previous);
    assert_eq!(report.devices[0].status, DeviceStatus::Skipped);
    let events = drain(&mut h.events);
    assert!(events.contains(&DeployEvent::FlashComplete {
        device_role: "sensor_node".to_string(),
        success: true,
        message: FIRMWARE_UNCHANGED.to_string(),
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, DeployEvent::FlashPrompt { .. })));
}

#[tokio::test]
async fn test_config_only_run_without_record_flashes_again() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let mut h = harness(
        vec![flash_manifest("blink", &[], &[]), provisioned_manifest("sensor")],
        strategy,
    );
    h.orchestrator = h
        .orchestrator
        .with_provisioner(Arc::new(FakeProvisioner::new(journal.clone())));
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());

    let report = h
        .orchestrator
        .deploy_devices(&spec(&["blink", "sensor"]), keep_firmware(None))
        .await
        .unwrap();

    // blink needs nothing injected; the sensor's new credentials must reach the board
    assert_eq!(journal.entries(), vec!["provision", "flash sensor"]);
    assert_eq!(report.devices[0].status, DeviceStatus::Skipped);
    assert_eq!(report.devices[1].status, DeviceStatus::Deployed);
}

#[tokio::test]
async fn test_config_only_cloud_redeploys_keep_the_api_key() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let mut h = harness(
        vec![flash_manifest("gateway", &[], &["cloud_url", "api_key"]), dashboard_manifest()],
        strategy,
    );
    h.orchestrator = h.orchestrator.with_cloud(Arc::new(FakeCloud {
        journal: journal.clone(),
        url: Some("https://dash.run.app".to_string()),
    }));
    let mut nugget = spec(&["gateway", "dashboard"]);
    nugget.set_path("project.name", json!("Weather"));
    let previous = flashed_credentials("https://dash.run.app");

    let first = h
        .orchestrator
        .deploy_devices(&nugget, keep_firmware(Some(previous.clone())))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .deploy_devices(&nugget, keep_firmware(Some(first.outputs.clone())))
        .await
        .unwrap();

    assert_eq!(
        journal.entries(),
        vec!["cloud Weather europe-west1", "cloud Weather europe-west1"]
    );
    for report in [&first, &second] {
        assert_eq!(report.outputs.get("api_key"), Some("key-0"));
        assert_eq!(report.devices[1].plugin_id, "gateway");
        assert_eq!(report.devices[1].status, DeviceStatus::Skipped);
    }
    assert_eq!(first.outputs, second.outputs);
}

#[tokio::test]
async fn test_config_only_run_reflashes_when_an_injected_value_changes() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let injections = strategy.injections.clone();
    let mut h = harness(
        vec![flash_manifest("gateway", &[], &["cloud_url", "api_key"]), dashboard_manifest()],
        strategy,
    );
    h.orchestrator = h.orchestrator.with_cloud(Arc::new(FakeCloud {
        journal: journal.clone(),
        url: Some("https://dash-v2.run.app".to_string()),
    }));
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());
    let mut nugget = spec(&["gateway", "dashboard"]);
    nugget.set_path("project.name", json!("Weather"));

    let report = h
        .orchestrator
        .deploy_devices(&nugget, keep_firmware(Some(flashed_credentials("https://dash.run.app"))))
        .await
        .unwrap();

    assert_eq!(
        journal.entries(),
        vec!["cloud Weather europe-west1", "flash gateway"]
    );
    assert_eq!(report.devices[1].status, DeviceStatus::Deployed);
    let gateway = &injections.lock().unwrap()["gateway"];
    assert_eq!(gateway.get("cloud_url").map(String::as_str), Some("https://dash-v2.run.app"));
    assert_eq!(gateway.get("api_key").map(String::as_str), Some("key-0"));
}

#[tokio::test]
async fn test_unknown_method_and_missing_manifest_are_skipped() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let odd = manifest(json!({ "id": "odd", "name": "Odd", "deploy": { "method": "uf2" } }));
    let mut h = harness(vec![odd, flash_manifest("blink", &[], &[])], strategy);
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());

    let report = h
        .orchestrator
        .deploy_devices(&spec(&["ghost", "odd", "blink"]), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.devices.len(), 2);
    assert_eq!(report.devices[0].status, DeviceStatus::Skipped);
    assert_eq!(report.devices[1].status, DeviceStatus::Deployed);
    assert_eq!(journal.entries(), vec!["flash blink"]);

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        DeployEvent::Error { recoverable: true, message } if message.contains("uf2")
    )));
}

#[tokio::test]
async fn test_empty_spec_is_skipped() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal);
    let mut h = harness(vec![], strategy);

    let report = h
        .orchestrator
        .deploy_devices(&NuggetSpec::default(), RunOptions::default())
        .await
        .unwrap();

    assert!(report.devices.is_empty());
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(*h.orchestrator.subscribe_state().borrow(), RunState::Idle);
}

#[tokio::test]
async fn test_second_run_starts_from_idle() {
    let journal = Journal::default();
    let strategy = RecordingStrategy::new(DeployMethod::Flash, journal.clone());
    let mut h = harness(vec![flash_manifest("blink", &[], &[])], strategy);
    auto_confirm(h.gate.clone(), h.orchestrator.subscribe_state());

    for _ in 0..2 {
        tokio_test::assert_ok!(
            h.orchestrator
                .deploy_devices(&spec(&["blink"]), RunOptions::default())
                .await
        );
    }

    assert_eq!(journal.entries(), vec!["flash blink", "flash blink"]);
    assert_eq!(*h.orchestrator.subscribe_state().borrow(), RunState::Done);
}
