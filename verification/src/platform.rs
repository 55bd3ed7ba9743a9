//! Orchestration Platform Boundary
//!
//! The engine never talks to Juju directly. It consumes a [`Platform`]
//! implementation that can take a topology snapshot of a model, run actions on
//! units and list the actions a charm exposes. Everything in a
//! [`ModelSnapshot`] is read-only and fetched once per session.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::error::{VerifyError, VerifyResult};

/// Errors reported by platform adapters
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform command failed: {0}")]
    CommandFailed(String),

    #[error("platform command timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Access to the orchestration platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Take a topology snapshot of the connected model
    async fn snapshot(&self) -> Result<ModelSnapshot, PlatformError>;

    /// Run an action on a unit and wait for it to finish
    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
        timeout: Duration,
    ) -> Result<ActionOutput, PlatformError>;

    /// Names of the actions exposed by an application's charm
    async fn application_actions(&self, application: &str) -> Result<Vec<String>, PlatformError>;
}

/// Action parameters; ordered so that equal parameter sets compare equal
pub type ActionParams = BTreeMap<String, String>;

/// Build an [`ActionParams`] from key/value pairs
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> ActionParams {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Output of a finished action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Action (task) id assigned by the platform
    pub id: String,
    /// Final status, `completed` on success
    pub status: String,
    /// Results map as reported by the action
    #[serde(default)]
    pub results: serde_json::Map<String, serde_json::Value>,
}

impl ActionOutput {
    pub fn completed(id: impl Into<String>, results: serde_json::Value) -> Self {
        let results = match results {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            id: id.into(),
            status: "completed".to_string(),
            results,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    /// Raw string value of a result field. Non-string scalars are rendered.
    pub fn field(&self, key: &str) -> Option<String> {
        match self.results.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Result field that must be present
    pub fn require(&self, key: &str) -> VerifyResult<String> {
        self.field(key).ok_or_else(|| {
            VerifyError::parse(
                format!("action {} output", self.id),
                format!("missing '{key}' in action results"),
            )
        })
    }

    /// Result field holding a JSON document (actions report JSON as strings)
    pub fn json_field<T: serde::de::DeserializeOwned>(&self, key: &str) -> VerifyResult<T> {
        let raw = self.require(key)?;
        serde_json::from_str(&raw).map_err(|e| {
            VerifyError::parse(format!("'{key}' of action {}", self.id), e.to_string())
        })
    }
}

/// Snapshot of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    /// Unit name, e.g. `nova-compute/0`
    pub name: String,
    pub application: String,
    /// Machine id, e.g. `0` or `0/lxd/1`
    pub machine: String,
    /// Workload status, e.g. `active`
    pub workload_status: String,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(default)]
    pub subordinates: Vec<String>,
    #[serde(default)]
    pub leader: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

impl UnitInfo {
    pub fn is_active(&self) -> bool {
        self.workload_status == "active"
    }
}

/// Snapshot of one machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Ids of nested machines (containers, VMs)
    #[serde(default)]
    pub children: Vec<String>,
}

/// Snapshot of one application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub name: String,
    /// Charm identity: bare name or charm URL
    pub charm: String,
    #[serde(default)]
    pub units: Vec<String>,
    /// Relation endpoint → related applications
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<String>>,
}

impl ApplicationInfo {
    /// Bare charm name of this application
    pub fn charm_name(&self) -> VerifyResult<String> {
        parse_charm_name(&self.charm)
    }
}

/// Read-only topology of one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    #[serde(default)]
    pub units: BTreeMap<String, UnitInfo>,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineInfo>,
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationInfo>,
}

impl ModelSnapshot {
    pub fn unit(&self, name: &str) -> Option<&UnitInfo> {
        self.units.get(name)
    }

    pub fn machine(&self, id: &str) -> Option<&MachineInfo> {
        self.machines.get(id)
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationInfo> {
        self.applications.get(name)
    }

    /// Look up units by name; every name must exist.
    pub fn find_units(&self, names: &[String]) -> VerifyResult<Vec<UnitInfo>> {
        names
            .iter()
            .map(|name| {
                self.unit(name).cloned().ok_or_else(|| {
                    VerifyError::configuration(format!("Unit '{name}' not found in the model."))
                })
            })
            .collect()
    }

    /// Principal units running on any of the given machines
    pub fn principal_units_on_machines(&self, machines: &[String]) -> Vec<UnitInfo> {
        self.units
            .values()
            .filter(|u| !u.subordinate && machines.iter().any(|m| *m == u.machine))
            .cloned()
            .collect()
    }

    /// Units of an application, in snapshot order
    pub fn application_units(&self, application: &str) -> Vec<&UnitInfo> {
        self.units
            .values()
            .filter(|u| u.application == application)
            .collect()
    }

    /// Hostname of the machine a unit runs on
    pub fn unit_hostname(&self, unit: &str) -> Option<&str> {
        let machine = &self.unit(unit)?.machine;
        self.machine(machine)?.hostname.as_deref()
    }

    /// Applications related to `application` over `endpoint`
    pub fn related_applications(&self, application: &str, endpoint: &str) -> Vec<String> {
        self.application(application)
            .and_then(|app| app.relations.get(endpoint))
            .cloned()
            .unwrap_or_default()
    }

    /// Names of every application deployed from the given charm
    pub fn applications_of_charm(&self, charm: &str) -> BTreeSet<String> {
        self.applications
            .values()
            .filter(|app| app.charm_name().map(|c| c == charm).unwrap_or(false))
            .map(|app| app.name.clone())
            .collect()
    }

    /// Machine ids nested (at any depth) under `machine`
    pub fn descendant_machines(&self, machine: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut stack = vec![machine.to_string()];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let children: Vec<String> = match self.machine(&current) {
                Some(info) if !info.children.is_empty() => info.children.clone(),
                _ => self
                    .machines
                    .keys()
                    .filter(|id| is_direct_child(&current, id))
                    .cloned()
                    .collect(),
            };
            for child in children.into_iter().rev() {
                found.push(child.clone());
                stack.push(child);
            }
        }
        found.sort();
        found.dedup();
        found
    }
}

/// `0/lxd/1` is a direct child of `0`; `0/lxd/1/kvm/0` is not.
fn is_direct_child(parent: &str, candidate: &str) -> bool {
    candidate
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| rest.split('/').count() == 2)
        .unwrap_or(false)
}

static CHARM_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*):(.*/)?(?P<charm>.*?)(-\d+)$").expect("CHARM_URL_RE regex should compile")
});

/// Reduce a charm identity to the bare charm name.
///
/// `cs:focal/nova-compute-141` → `nova-compute`. Identities without a schema
/// are already bare names and are returned unchanged.
pub fn parse_charm_name(charm: &str) -> VerifyResult<String> {
    if !charm.contains(':') {
        if charm.is_empty() {
            return Err(VerifyError::configuration("Empty charm identity"));
        }
        return Ok(charm.to_string());
    }

    CHARM_URL_RE
        .captures(charm)
        .and_then(|c| c.name("charm"))
        .map(|m| m.as_str().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| VerifyError::configuration(format!("Failed to parse charm-url: '{charm}'")))
}
