//! Bridge to the `juju` CLI binary.
//!
//! Every call shells out with `--format=json` and parses stdout. Commands are
//! killed when their future is dropped, so a timed-out call does not leave a
//! stray client process behind.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};
use verification::{
    ActionOutput, ActionParams, ApplicationInfo, MachineInfo, ModelSnapshot, Platform,
    PlatformError, UnitInfo,
};

use crate::config::JujuConfig;

/// `juju status --format=json`, reduced to what the verifiers use
#[derive(Debug, Deserialize)]
pub struct JujuStatus {
    #[serde(default)]
    pub machines: BTreeMap<String, StatusMachine>,
    #[serde(default)]
    pub applications: BTreeMap<String, StatusApplication>,
}

#[derive(Debug, Deserialize)]
pub struct StatusMachine {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub containers: BTreeMap<String, StatusMachine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusApplication {
    #[serde(default)]
    pub charm: String,
    /// Present on older controllers; carries the charm store URL
    #[serde(default)]
    pub charm_url: Option<String>,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub units: BTreeMap<String, StatusUnit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusUnit {
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default)]
    pub workload_status: StatusValue,
    #[serde(default)]
    pub juju_status: StatusValue,
    #[serde(default)]
    pub leader: bool,
    #[serde(default)]
    pub subordinates: BTreeMap<String, StatusUnit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusValue {
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// One entry of `juju run --format=json` output
#[derive(Debug, Deserialize)]
struct RunEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "task-id")]
    task_id: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: serde_json::Map<String, serde_json::Value>,
}

impl JujuStatus {
    pub fn into_snapshot(self) -> ModelSnapshot {
        let mut snapshot = ModelSnapshot::default();

        for (id, machine) in self.machines {
            insert_machine(&mut snapshot, id, machine);
        }

        for (app_name, app) in self.applications {
            let mut info = ApplicationInfo {
                name: app_name.clone(),
                charm: app.charm_url.clone().unwrap_or(app.charm),
                units: Vec::new(),
                relations: app.relations,
            };

            for (unit_name, unit) in app.units {
                let machine = unit.machine.clone().unwrap_or_default();
                let subordinates: Vec<String> = unit.subordinates.keys().cloned().collect();
                let principal = unit_info(
                    unit_name.clone(),
                    app_name.clone(),
                    machine.clone(),
                    &unit,
                    false,
                    subordinates,
                );

                for (sub_name, sub) in unit.subordinates {
                    let sub_app = sub_name.split('/').next().unwrap_or_default().to_string();
                    snapshot.units.insert(
                        sub_name.clone(),
                        unit_info(sub_name, sub_app, machine.clone(), &sub, true, Vec::new()),
                    );
                }

                info.units.push(unit_name.clone());
                snapshot.units.insert(unit_name, principal);
            }

            snapshot.applications.insert(app_name, info);
        }

        // subordinate applications list no units of their own
        let subordinate_units: Vec<(String, String)> = snapshot
            .units
            .values()
            .filter(|u| u.subordinate)
            .map(|u| (u.application.clone(), u.name.clone()))
            .collect();
        for (app, unit) in subordinate_units {
            if let Some(info) = snapshot.applications.get_mut(&app) {
                if !info.units.contains(&unit) {
                    info.units.push(unit);
                }
            }
        }

        snapshot
    }
}

fn insert_machine(snapshot: &mut ModelSnapshot, id: String, machine: StatusMachine) {
    let children: Vec<String> = machine.containers.keys().cloned().collect();
    for (child_id, child) in machine.containers {
        insert_machine(snapshot, child_id, child);
    }
    snapshot.machines.insert(
        id.clone(),
        MachineInfo {
            id,
            hostname: machine.hostname,
            children,
        },
    );
}

fn unit_info(
    name: String,
    application: String,
    machine: String,
    unit: &StatusUnit,
    subordinate: bool,
    subordinates: Vec<String>,
) -> UnitInfo {
    UnitInfo {
        name,
        application,
        machine,
        workload_status: unit.workload_status.current.clone().unwrap_or_default(),
        subordinate,
        subordinates,
        leader: unit.leader,
        agent_version: unit.juju_status.version.clone(),
    }
}

/// Parse `juju status --format=json` output.
pub fn parse_status(raw: &[u8]) -> Result<ModelSnapshot, PlatformError> {
    let status: JujuStatus = serde_json::from_slice(raw)
        .map_err(|e| PlatformError::Parse(format!("juju status: {e}")))?;
    Ok(status.into_snapshot())
}

/// Parse `juju run --format=json` output for `unit`.
pub fn parse_run_output(unit: &str, raw: &[u8]) -> Result<ActionOutput, PlatformError> {
    let mut entries: BTreeMap<String, RunEntry> = serde_json::from_slice(raw)
        .map_err(|e| PlatformError::Parse(format!("juju run: {e}")))?;
    let entry = entries
        .remove(unit)
        .ok_or_else(|| PlatformError::Parse(format!("juju run: no result for unit {unit}")))?;

    Ok(ActionOutput {
        id: entry.id.or(entry.task_id).unwrap_or_default(),
        status: entry.status,
        results: entry.results,
    })
}

/// Parse `juju actions --format=json` output into action names.
pub fn parse_action_names(raw: &[u8]) -> Result<Vec<String>, PlatformError> {
    let actions: BTreeMap<String, serde_json::Value> = serde_json::from_slice(raw)
        .map_err(|e| PlatformError::Parse(format!("juju actions: {e}")))?;
    Ok(actions.into_keys().collect())
}

/// [`Platform`] implementation that drives the `juju` client
#[derive(Debug, Clone)]
pub struct JujuCli {
    config: JujuConfig,
}

impl JujuCli {
    pub fn new(config: JujuConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JujuConfig {
        &self.config
    }

    fn model_args(&self) -> Vec<String> {
        match &self.config.model {
            Some(model) => vec!["-m".to_string(), model.clone()],
            None => Vec::new(),
        }
    }

    /// Run `juju <args>` and return stdout.
    async fn juju(&self, args: Vec<String>, timeout: Duration) -> Result<Vec<u8>, PlatformError> {
        debug!(bin = %self.config.bin.display(), ?args, "Running juju");

        let child = Command::new(&self.config.bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| PlatformError::Timeout(timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(?args, code = ?output.status.code(), "juju command failed");
            return Err(PlatformError::CommandFailed(format!(
                "juju {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Platform for JujuCli {
    async fn snapshot(&self) -> Result<ModelSnapshot, PlatformError> {
        let mut args = vec!["status".to_string(), "--format=json".to_string()];
        args.extend(self.model_args());
        let raw = self.juju(args, self.config.command_timeout).await?;
        parse_status(&raw)
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
        timeout: Duration,
    ) -> Result<ActionOutput, PlatformError> {
        let mut args = vec![
            "run".to_string(),
            "--format=json".to_string(),
            format!("--wait={}s", timeout.as_secs()),
        ];
        args.extend(self.model_args());
        args.push(unit.to_string());
        args.push(action.to_string());
        args.extend(params.iter().map(|(k, v)| format!("{k}={v}")));

        // leave the client time to report its own wait timeout
        let raw = self.juju(args, timeout + Duration::from_secs(5)).await?;
        parse_run_output(unit, &raw)
    }

    async fn application_actions(&self, application: &str) -> Result<Vec<String>, PlatformError> {
        let mut args = vec!["actions".to_string(), "--format=json".to_string()];
        args.extend(self.model_args());
        args.push(application.to_string());
        let raw = self.juju(args, self.config.command_timeout).await?;
        parse_action_names(&raw)
    }
}
