//! End-to-end verification sessions against an in-memory platform.
//!
//! Covers:
//! - A clean single-unit run yields only OK partials and succeeds
//! - Mixed charms in one session fan out to separate verifiers
//! - Action failures and timeouts surface as FAIL partials, not aborts
//! - The session cache is shared across verifiers

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use verification::{
    ActionOutput, ActionParams, CharmMap, Dispatcher, ModelSnapshot, Platform, PlatformError,
    Session, SessionConfig, Severity, Target, VerifierOutcome,
};

/// Platform answering from a table; `hang` lists actions that never return.
#[derive(Default)]
struct TablePlatform {
    snapshot: ModelSnapshot,
    outputs: HashMap<(String, String), ActionOutput>,
    actions: HashMap<String, Vec<String>>,
    hang: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl TablePlatform {
    fn respond(&mut self, unit: &str, action: &str, results: Value) {
        self.outputs.insert(
            (unit.to_string(), action.to_string()),
            ActionOutput::completed(format!("{}", self.outputs.len() + 1), results),
        );
    }

    fn respond_status(&mut self, unit: &str, action: &str, status: &str) {
        self.outputs.insert(
            (unit.to_string(), action.to_string()),
            ActionOutput {
                id: "42".to_string(),
                status: status.to_string(),
                results: serde_json::Map::new(),
            },
        );
    }

    fn calls_of(&self, action: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|a| *a == action).count()
    }
}

#[async_trait]
impl Platform for TablePlatform {
    async fn snapshot(&self) -> Result<ModelSnapshot, PlatformError> {
        Ok(self.snapshot.clone())
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        _params: &ActionParams,
        _timeout: Duration,
    ) -> Result<ActionOutput, PlatformError> {
        self.calls.lock().unwrap().push(action.to_string());
        if self.hang.iter().any(|a| a == action) {
            std::future::pending::<()>().await;
        }
        self.outputs
            .get(&(unit.to_string(), action.to_string()))
            .cloned()
            .ok_or_else(|| PlatformError::CommandFailed(format!("no {action} on {unit}")))
    }

    async fn application_actions(&self, application: &str) -> Result<Vec<String>, PlatformError> {
        Ok(self.actions.get(application).cloned().unwrap_or_default())
    }
}

/// Two compute hosts and a three-node ceph cluster, no co-located units.
fn model() -> ModelSnapshot {
    serde_json::from_value(json!({
        "applications": {
            "nova-compute": {
                "name": "nova-compute",
                "charm": "cs:focal/nova-compute-141",
                "units": ["nova-compute/0", "nova-compute/1"]
            },
            "ceph-osd": {
                "name": "ceph-osd",
                "charm": "ch:amd64/focal/ceph-osd-512",
                "units": ["ceph-osd/0", "ceph-osd/1", "ceph-osd/2"],
                "relations": {"mon": ["ceph-mon"]}
            },
            "ceph-mon": {
                "name": "ceph-mon",
                "charm": "ch:amd64/focal/ceph-mon-108",
                "units": ["ceph-mon/0"]
            }
        },
        "machines": {
            "0": {"id": "0", "hostname": "compute-0"},
            "1": {"id": "1", "hostname": "compute-1"},
            "2": {"id": "2", "hostname": "storage-0"},
            "3": {"id": "3", "hostname": "storage-1"},
            "4": {"id": "4", "hostname": "storage-2"},
            "5": {"id": "5", "hostname": "mon-0"}
        },
        "units": {
            "nova-compute/0": {"name": "nova-compute/0", "application": "nova-compute", "machine": "0", "workload_status": "active", "leader": true, "agent_version": "2.9.42"},
            "nova-compute/1": {"name": "nova-compute/1", "application": "nova-compute", "machine": "1", "workload_status": "active", "agent_version": "2.9.42"},
            "ceph-osd/0": {"name": "ceph-osd/0", "application": "ceph-osd", "machine": "2", "workload_status": "active", "leader": true, "agent_version": "2.9.42"},
            "ceph-osd/1": {"name": "ceph-osd/1", "application": "ceph-osd", "machine": "3", "workload_status": "active", "agent_version": "2.9.42"},
            "ceph-osd/2": {"name": "ceph-osd/2", "application": "ceph-osd", "machine": "4", "workload_status": "active", "agent_version": "2.9.42"},
            "ceph-mon/0": {"name": "ceph-mon/0", "application": "ceph-mon", "machine": "5", "workload_status": "active", "leader": true, "agent_version": "2.9.42"}
        }
    }))
    .unwrap()
}

fn compute_nodes() -> Value {
    json!({
        "compute-nodes": json!([
            {"host": "compute-0", "zone": "nova", "state": "up", "status": "enabled"},
            {"host": "compute-1", "zone": "nova", "state": "up", "status": "enabled"}
        ])
        .to_string()
    })
}

fn storage_platform() -> TablePlatform {
    let mut platform = TablePlatform {
        snapshot: model(),
        ..Default::default()
    };
    platform.respond("ceph-mon/0", "get-health", json!({"message": "HEALTH_OK"}));
    platform.respond(
        "ceph-mon/0",
        "list-pools",
        json!({"message": json!([{"name": "rbd", "size": 3, "min_size": 2}]).to_string()}),
    );
    let host = |id: i64, name: &str, used: u64| {
        json!({"id": id, "name": name, "type": "host", "kb": 1000, "kb_used": used, "kb_avail": 1000 - used, "children": [id * 10]})
    };
    let osd = |id: i64, used: u64| {
        json!({"id": id, "name": format!("osd.{id}"), "type": "osd", "kb": 1000, "kb_used": used, "kb_avail": 1000 - used, "children": []})
    };
    platform.respond(
        "ceph-mon/0",
        "show-disk-free",
        json!({"message": json!({"nodes": [
            {"id": -1, "name": "default", "type": "root", "kb": 3000, "kb_used": 900, "kb_avail": 2100, "children": [-2, -3, -4]},
            host(-2, "storage-0", 300),
            host(-3, "storage-1", 300),
            host(-4, "storage-2", 300),
            osd(-20, 300),
            osd(-30, 300),
            osd(-40, 300)
        ]}).to_string()}),
    );
    platform
}

fn session(platform: TablePlatform, timeout: Duration) -> (Arc<Session>, Arc<TablePlatform>) {
    let platform = Arc::new(platform);
    let session = Arc::new(Session::new(
        platform.clone(),
        SessionConfig::default().with_action_timeout(timeout),
    ));
    (session, platform)
}

#[tokio::test]
async fn single_unit_reboot_passes() {
    let mut platform = TablePlatform {
        snapshot: model(),
        ..Default::default()
    };
    platform.respond("nova-compute/0", "instance-count", json!({"instance-count": "0"}));
    platform.respond("nova-compute/0", "node-name", json!({"node-name": "compute-0"}));
    platform.respond("nova-compute/0", "list-compute-nodes", compute_nodes());
    let (session, _) = session(platform, Duration::from_secs(5));

    let dispatcher = Dispatcher::connect(session, CharmMap::new()).await.unwrap();
    let report = dispatcher
        .run(&Target::Units(vec!["nova-compute/0".into()]), "reboot", false)
        .await
        .unwrap();

    assert_eq!(report.verifiers.len(), 1);
    assert_eq!(report.count(Severity::Fail), 0);
    assert_eq!(report.count(Severity::Unsupported), 0);
    assert_eq!(report.count(Severity::Warn), 0);
    assert!(report.success());
    assert_eq!(report.exit_code(), 0);

    let text = report.to_string();
    assert!(text.starts_with("===[nova-compute/0]===\nChecks:\n"));
    assert!(text.contains("[OK] Unit nova-compute/0 is running 0 VMs."));
    assert!(text.ends_with("Result: OK (All checks passed)\n"));
}

#[tokio::test]
async fn ceph_osd_shutdown_uses_related_mon() {
    let (session, platform) = session(storage_platform(), Duration::from_secs(5));

    let dispatcher = Dispatcher::connect(session, CharmMap::new()).await.unwrap();
    let report = dispatcher
        .run(&Target::Units(vec!["ceph-osd/0".into()]), "shutdown", false)
        .await
        .unwrap();

    let VerifierOutcome::Verdict { verdict } = &report.verifiers[0].outcome else {
        panic!("expected a verdict: {report}");
    };
    assert!(verdict.success(), "{verdict}");
    assert!(verdict
        .partials()
        .iter()
        .any(|p| p.message == "Availability zone check passed."));
    assert_eq!(platform.calls_of("show-disk-free"), 1);
}

#[tokio::test]
async fn failed_action_becomes_fail_partial() {
    let mut platform = storage_platform();
    platform.respond_status("ceph-mon/0", "list-pools", "failed");
    let (session, _) = session(platform, Duration::from_secs(5));

    let dispatcher = Dispatcher::connect(session, CharmMap::new()).await.unwrap();
    let report = dispatcher
        .run(&Target::Units(vec!["ceph-osd/1".into()]), "reboot", false)
        .await
        .unwrap();

    let VerifierOutcome::Verdict { verdict } = &report.verifiers[0].outcome else {
        panic!("expected a verdict: {report}");
    };
    let fail = verdict
        .partials()
        .iter()
        .find(|p| p.severity == Severity::Fail)
        .unwrap();
    assert!(fail.message.starts_with("replication_number check failed with error:"));
    assert!(fail.message.contains("juju show-task 42"));
    // checks after the failure still ran
    assert!(verdict
        .partials()
        .iter()
        .any(|p| p.message == "Availability zone check passed."));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_action_times_out() {
    let mut platform = storage_platform();
    platform.hang.push("get-health".to_string());
    let (session, _) = session(platform, Duration::from_secs(30));

    let dispatcher = Dispatcher::connect(session.clone(), CharmMap::new()).await.unwrap();
    let report = dispatcher
        .run(&Target::Units(vec!["ceph-osd/2".into()]), "reboot", true)
        .await
        .unwrap();

    let VerifierOutcome::Verdict { verdict } = &report.verifiers[0].outcome else {
        panic!("expected a verdict: {report}");
    };
    let last = verdict.partials().last().unwrap();
    assert_eq!(last.severity, Severity::Fail);
    assert!(last.message.contains("timed out after 30s"), "{}", last.message);
    assert_eq!(session.cache_stats().await.timeouts, 1);
}

#[tokio::test]
async fn mixed_charms_share_one_cache() {
    let mut platform = storage_platform();
    for (unit, host) in [("nova-compute/0", "compute-0"), ("nova-compute/1", "compute-1")] {
        platform.respond(unit, "instance-count", json!({"instance-count": "0"}));
        platform.respond(unit, "node-name", json!({"node-name": host}));
        platform.respond(unit, "list-compute-nodes", compute_nodes());
    }
    let (session, platform) = session(platform, Duration::from_secs(5));

    let dispatcher = Dispatcher::connect(session.clone(), CharmMap::new()).await.unwrap();
    let report = dispatcher
        .run(
            &Target::Machines(vec!["0".into(), "2".into(), "3".into()]),
            "reboot",
            false,
        )
        .await
        .unwrap();

    assert_eq!(report.verifiers.len(), 2);
    assert_eq!(report.verifiers[0].charm, "nova-compute");
    assert_eq!(report.verifiers[1].units, vec!["ceph-osd/0", "ceph-osd/1"]);
    assert!(report.verifiers[0].success());

    // two OSD hosts down with size - min_size == 1
    assert!(!report.verifiers[1].success());
    assert_eq!(platform.calls_of("get-health"), 1);
    assert!(session.cache_stats().await.calls >= 4);
}
