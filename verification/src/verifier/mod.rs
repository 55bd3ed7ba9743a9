//! Per-charm verifiers
//!
//! A [`Verifier`] is bound to a set of units that all run the same charm. One
//! `verify` call runs, in order:
//!
//! ```text
//! 1. check name supported?          → UNSUPPORTED and stop
//! 2. prerequisites (agent version,
//!    required charm actions)        → stop on first failure
//! 3. universal checks               ┐
//!    (affected machines,            │ one executor run,
//!     units on child machines)      │ honours stop_on_failure
//! 4. charm specific checks          ┘
//! ```

pub mod ceph;
pub mod neutron_gateway;
pub mod nova_compute;
pub mod ovn_central;
mod universal;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::charm::{CharmMap, CheckKind, VerifierKind};
use crate::error::{VerifyError, VerifyResult};
use crate::executor::{run_checks, Check};
use crate::platform::{ModelSnapshot, UnitInfo};
use crate::result::{Severity, Verdict};
use crate::session::Session;
use crate::version::AgentVersion;

/// State shared by the checks of one verifier
#[derive(Debug)]
pub struct VerifierContext {
    pub kind: VerifierKind,
    /// Target units, in target order
    pub units: Vec<UnitInfo>,
    /// Units targeted by sibling verifiers in the same session
    pub co_targets: BTreeSet<String>,
    pub snapshot: Arc<ModelSnapshot>,
    pub session: Arc<Session>,
}

impl VerifierContext {
    pub fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }

    pub fn is_target(&self, unit: &str) -> bool {
        self.units.iter().any(|u| u.name == unit)
    }

    /// Distinct applications of the target units
    pub fn applications(&self) -> BTreeSet<String> {
        self.units.iter().map(|u| u.application.clone()).collect()
    }

    /// Target units belonging to `application`
    pub fn units_of(&self, application: &str) -> Vec<&UnitInfo> {
        self.units
            .iter()
            .filter(|u| u.application == application)
            .collect()
    }

    /// Machines hosting target units, first-seen order
    pub fn affected_machines(&self) -> Vec<String> {
        let mut machines: Vec<String> = Vec::new();
        for unit in &self.units {
            if !machines.contains(&unit.machine) {
                machines.push(unit.machine.clone());
            }
        }
        machines
    }

    /// Hostname of the machine running `unit`
    pub fn hostname(&self, unit: &str) -> VerifyResult<String> {
        self.snapshot
            .unit_hostname(unit)
            .map(str::to_string)
            .ok_or_else(|| {
                VerifyError::parse(format!("machine of unit {unit}"), "no hostname reported")
            })
    }
}

/// Verifier for one group of same-charm units
#[derive(Debug)]
pub struct Verifier {
    ctx: VerifierContext,
}

impl Verifier {
    /// Bind a verifier of `kind` to `units`.
    ///
    /// Fails if `units` is empty, names a unit the model does not have, or
    /// contains a unit of another charm.
    pub fn new(
        kind: VerifierKind,
        units: &[String],
        charm_map: &CharmMap,
        snapshot: Arc<ModelSnapshot>,
        session: Arc<Session>,
    ) -> VerifyResult<Self> {
        if units.is_empty() {
            return Err(VerifyError::configuration(
                "Can not run verification. This verifier is not associated with any units.",
            ));
        }

        let units = snapshot.find_units(units)?;
        for unit in &units {
            let charm = charm_map.resolve(&snapshot, unit)?;
            if charm != kind.charm_name() {
                return Err(VerifyError::configuration(format!(
                    "Unit {} runs charm '{charm}' and can not be verified by the {kind} verifier.",
                    unit.name
                )));
            }
        }

        Ok(Self {
            ctx: VerifierContext {
                kind,
                units,
                co_targets: BTreeSet::new(),
                snapshot,
                session,
            },
        })
    }

    /// Units verified by sibling verifiers; they are not reported as
    /// unchecked neighbours.
    pub fn with_co_targets(mut self, units: impl IntoIterator<Item = String>) -> Self {
        self.ctx.co_targets = units
            .into_iter()
            .filter(|u| !self.ctx.is_target(u))
            .collect();
        self
    }

    pub fn kind(&self) -> VerifierKind {
        self.ctx.kind
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.ctx.unit_names()
    }

    pub fn context(&self) -> &VerifierContext {
        &self.ctx
    }

    /// Run the check named `check` against the bound units.
    pub async fn verify(&self, check: &str, stop_on_failure: bool) -> VerifyResult<Verdict> {
        let kind = self.ctx.kind;
        let units = self.ctx.unit_names().join(",");

        let Some(check_kind) = check
            .parse::<CheckKind>()
            .ok()
            .filter(|c| kind.supported_checks().contains(c))
        else {
            info!(verifier = %kind, check = %check, "Unsupported check requested");
            return Ok(Verdict::unsupported(format!(
                "Unsupported verification check \"{check}\" for charm {kind}"
            )));
        };

        info!(verifier = %kind, check = %check_kind, units = %units, "Running verification");

        let gate = run_checks(self.prerequisites(), true).await?;
        if !gate.success() {
            info!(verifier = %kind, "Prerequisites failed, skipping checks");
            return Ok(gate);
        }

        let mut checks = vec![
            Check::new("affected_machines", universal::affected_machines(&self.ctx)),
            Check::new("sub_machines", universal::sub_machines(&self.ctx)),
        ];
        checks.extend(self.specific_checks(check_kind));
        debug!(verifier = %kind, checks = checks.len(), "Check list assembled");

        let verdict = gate + run_checks(checks, stop_on_failure).await?;
        info!(
            verifier = %kind,
            success = verdict.success(),
            warnings = verdict.count(Severity::Warn),
            failures = verdict.count(Severity::Fail),
            "Verification finished"
        );
        Ok(verdict)
    }

    fn prerequisites(&self) -> Vec<Check<'_>> {
        let mut checks = Vec::new();
        if let Some(min) = self.ctx.kind.min_agent_version() {
            checks.push(Check::new("agent_version", agent_version(&self.ctx, min)));
        }
        let required = self.ctx.kind.required_actions();
        if !required.is_empty() {
            checks.push(Check::new("supported_actions", supported_actions(&self.ctx, required)));
        }
        checks
    }

    fn specific_checks(&self, check: CheckKind) -> Vec<Check<'_>> {
        match self.ctx.kind {
            VerifierKind::NovaCompute => nova_compute::checks(&self.ctx, check),
            VerifierKind::CephOsd => ceph::osd_checks(&self.ctx, check),
            VerifierKind::CephMon => ceph::mon_checks(&self.ctx, check),
            VerifierKind::NeutronGateway => neutron_gateway::checks(&self.ctx, check),
            VerifierKind::OvnCentral => ovn_central::checks(&self.ctx, check),
        }
    }
}

/// Every target unit runs an agent at least `min`
async fn agent_version(ctx: &VerifierContext, min: AgentVersion) -> VerifyResult<Option<Verdict>> {
    let mut verdict = Verdict::new();
    for unit in &ctx.units {
        let unparseable =
            || VerifyError::version(format!("Failed to parse juju version from unit {}.", unit.name));
        let raw = unit.agent_version.as_deref().ok_or_else(unparseable)?;
        let version: AgentVersion = raw.parse().map_err(|_| unparseable())?;

        if version < min {
            verdict.add_partial(
                Severity::Fail,
                format!(
                    "Juju agent on unit {} has lower than minimum required version. {raw} < {min}",
                    unit.name
                ),
            );
        }
    }

    if verdict.is_empty() {
        verdict.add_partial(Severity::Ok, "Minimum juju version check passed.");
    }
    Ok(Some(verdict))
}

/// The charm of every target application exposes `required` actions
async fn supported_actions(
    ctx: &VerifierContext,
    required: &'static [&'static str],
) -> VerifyResult<Option<Verdict>> {
    let mut verdict = Verdict::new();
    for app in ctx.applications() {
        let actions = ctx.session.application_actions(&app).await?;
        for action in required {
            if !actions.iter().any(|a| a == action) {
                verdict.add_partial(
                    Severity::Fail,
                    format!(
                        "Charm of application {app} does not support required action \
                         '{action}'. Please try upgrading charm."
                    ),
                );
            }
        }
    }

    if verdict.is_empty() {
        verdict.add_partial(Severity::Ok, "Charm supports all required actions.");
    }
    Ok(Some(verdict))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Model fixtures shared by the verifier tests

    use super::*;
    use crate::platform::{ActionOutput, ActionParams, ApplicationInfo, MachineInfo, Platform, PlatformError};
    use crate::session::SessionConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Platform answering actions from a fixed table keyed by
    /// `(unit, action)`. Unknown actions fail.
    #[derive(Default)]
    pub struct FakePlatform {
        pub snapshot: ModelSnapshot,
        pub outputs: HashMap<(String, String), serde_json::Value>,
        pub actions: HashMap<String, Vec<String>>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl FakePlatform {
        pub fn respond(&mut self, unit: &str, action: &str, results: serde_json::Value) {
            self.outputs.insert((unit.to_string(), action.to_string()), results);
        }

        pub fn call_count(&self, action: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, a)| a == action)
                .count()
        }
    }

    #[async_trait]
    impl Platform for FakePlatform {
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
            self.calls
                .lock()
                .unwrap()
                .push((unit.to_string(), action.to_string()));
            match self.outputs.get(&(unit.to_string(), action.to_string())) {
                Some(results) => Ok(ActionOutput::completed("1", results.clone())),
                None => Err(PlatformError::CommandFailed(format!(
                    "action {action} not defined on {unit}"
                ))),
            }
        }

        async fn application_actions(&self, application: &str) -> Result<Vec<String>, PlatformError> {
            Ok(self.actions.get(application).cloned().unwrap_or_default())
        }
    }

    pub struct ModelBuilder {
        snapshot: ModelSnapshot,
    }

    impl ModelBuilder {
        pub fn new() -> Self {
            Self {
                snapshot: ModelSnapshot::default(),
            }
        }

        pub fn app(mut self, name: &str, charm: &str) -> Self {
            self.snapshot.applications.insert(
                name.to_string(),
                ApplicationInfo {
                    name: name.to_string(),
                    charm: charm.to_string(),
                    ..Default::default()
                },
            );
            self
        }

        pub fn relate(mut self, app: &str, endpoint: &str, other: &str) -> Self {
            if let Some(info) = self.snapshot.applications.get_mut(app) {
                info.relations
                    .entry(endpoint.to_string())
                    .or_default()
                    .push(other.to_string());
            }
            self
        }

        pub fn machine(mut self, id: &str, hostname: &str) -> Self {
            self.snapshot.machines.insert(
                id.to_string(),
                MachineInfo {
                    id: id.to_string(),
                    hostname: Some(hostname.to_string()),
                    children: vec![],
                },
            );
            self
        }

        pub fn unit(self, name: &str, machine: &str) -> Self {
            self.unit_with(name, machine, |_| {})
        }

        pub fn unit_with(mut self, name: &str, machine: &str, edit: impl FnOnce(&mut UnitInfo)) -> Self {
            let application = name.split('/').next().unwrap_or_default().to_string();
            let mut unit = UnitInfo {
                name: name.to_string(),
                application: application.clone(),
                machine: machine.to_string(),
                workload_status: "active".to_string(),
                subordinate: false,
                subordinates: vec![],
                leader: name.ends_with("/0"),
                agent_version: Some("2.9.42".to_string()),
            };
            edit(&mut unit);
            if let Some(app) = self.snapshot.applications.get_mut(&unit.application) {
                app.units.push(unit.name.clone());
            }
            if !self.snapshot.machines.contains_key(machine) {
                self.snapshot.machines.insert(
                    machine.to_string(),
                    MachineInfo {
                        id: machine.to_string(),
                        hostname: Some(format!("juju-{}", machine.replace('/', "-"))),
                        children: vec![],
                    },
                );
            }
            self.snapshot.units.insert(unit.name.clone(), unit);
            self
        }

        pub fn build(self) -> ModelSnapshot {
            self.snapshot
        }
    }

    pub fn session_for(platform: FakePlatform) -> (Arc<Session>, Arc<FakePlatform>) {
        let platform = Arc::new(platform);
        let session = Arc::new(Session::new(
            platform.clone(),
            SessionConfig::default().with_action_timeout(Duration::from_secs(5)),
        ));
        (session, platform)
    }

    pub fn verifier(kind: VerifierKind, units: &[&str], platform: FakePlatform) -> (Verifier, Arc<FakePlatform>) {
        let snapshot = Arc::new(platform.snapshot.clone());
        let (session, platform) = session_for(platform);
        let units: Vec<String> = units.iter().map(|u| u.to_string()).collect();
        let verifier = Verifier::new(kind, &units, &CharmMap::new(), snapshot, session).unwrap();
        (verifier, platform)
    }

    pub fn messages(verdict: &Verdict) -> Vec<String> {
        verdict.partials().iter().map(|p| p.to_string()).collect()
    }
}
