//! Target resolution and verifier fan-out
//!
//! The dispatcher turns a target set (unit names or machine ids) into one
//! verifier per charm, runs them concurrently against a shared [`Session`] and
//! collects their verdicts into a [`SessionReport`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::charm::{CharmMap, VerifierKind};
use crate::error::{VerifyError, VerifyResult};
use crate::platform::ModelSnapshot;
use crate::result::{Severity, Verdict};
use crate::session::Session;
use crate::verifier::Verifier;

/// What the operator asked to verify
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Units(Vec<String>),
    /// Every principal unit on these machines
    Machines(Vec<String>),
}

/// Units of one charm, in target order
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnitGroup {
    charm: String,
    kind: Option<VerifierKind>,
    units: Vec<String>,
}

pub struct Dispatcher {
    session: Arc<Session>,
    snapshot: Arc<ModelSnapshot>,
    charm_map: CharmMap,
}

impl Dispatcher {
    pub fn new(session: Arc<Session>, snapshot: Arc<ModelSnapshot>, charm_map: CharmMap) -> Self {
        Self {
            session,
            snapshot,
            charm_map,
        }
    }

    /// Fetch the model through the session and build a dispatcher on it.
    pub async fn connect(session: Arc<Session>, charm_map: CharmMap) -> VerifyResult<Self> {
        let snapshot = Arc::new(session.snapshot().await?);
        debug!(
            units = snapshot.units.len(),
            machines = snapshot.machines.len(),
            applications = snapshot.applications.len(),
            "Model snapshot loaded"
        );
        Ok(Self::new(session, snapshot, charm_map))
    }

    pub fn snapshot(&self) -> &ModelSnapshot {
        &self.snapshot
    }

    /// Expand `target` into unit names. Every named unit or machine must exist.
    pub fn resolve_targets(&self, target: &Target) -> VerifyResult<Vec<String>> {
        let units = match target {
            Target::Units(names) => {
                self.snapshot.find_units(names)?;
                let mut seen = BTreeSet::new();
                names
                    .iter()
                    .filter(|n| seen.insert(n.as_str()))
                    .cloned()
                    .collect::<Vec<_>>()
            }
            Target::Machines(ids) => {
                let mut units = Vec::new();
                for id in ids {
                    if self.snapshot.machine(id).is_none() {
                        return Err(VerifyError::configuration(format!(
                            "Machine '{id}' not found in the model."
                        )));
                    }
                    for unit in self.snapshot.principal_units_on_machines(std::slice::from_ref(id)) {
                        if !units.contains(&unit.name) {
                            units.push(unit.name);
                        }
                    }
                }
                units
            }
        };

        if units.is_empty() {
            return Err(VerifyError::configuration(
                "No units were selected for verification.",
            ));
        }
        Ok(units)
    }

    fn group_units(&self, units: &[String]) -> VerifyResult<Vec<UnitGroup>> {
        let mut groups: Vec<UnitGroup> = Vec::new();
        for unit in self.snapshot.find_units(units)? {
            let charm = self.charm_map.resolve(&self.snapshot, &unit)?;
            match groups.iter_mut().find(|g| g.charm == charm) {
                Some(group) => group.units.push(unit.name),
                None => groups.push(UnitGroup {
                    kind: VerifierKind::from_charm(&charm),
                    charm,
                    units: vec![unit.name],
                }),
            }
        }
        Ok(groups)
    }

    /// Verify `check` on `target`.
    ///
    /// Configuration errors (unknown unit, bad mapping) abort before any check
    /// runs. Errors inside one verifier are recorded in its report entry and do
    /// not affect its siblings.
    pub async fn run(
        &self,
        target: &Target,
        check: &str,
        stop_on_failure: bool,
    ) -> VerifyResult<SessionReport> {
        let units = self.resolve_targets(target)?;
        let groups = self.group_units(&units)?;
        info!(
            session = %self.session.id(),
            check = %check,
            units = units.len(),
            verifiers = groups.len(),
            "Starting verification session"
        );

        let mut reports: Vec<Option<VerifierReport>> = vec![None; groups.len()];
        let mut join_set: JoinSet<(usize, VerifyResult<Verdict>)> = JoinSet::new();

        for (index, group) in groups.iter().enumerate() {
            let Some(kind) = group.kind else {
                warn!(charm = %group.charm, units = ?group.units, "No verifier for charm");
                reports[index] = Some(VerifierReport::new(
                    &group.charm,
                    group.units.clone(),
                    Ok(unsupported_charm(&group.charm)),
                ));
                continue;
            };

            let verifier = Verifier::new(
                kind,
                &group.units,
                &self.charm_map,
                self.snapshot.clone(),
                self.session.clone(),
            )?
            .with_co_targets(units.iter().cloned());
            let check = check.to_string();

            join_set.spawn(async move {
                let outcome = verifier.verify(&check, stop_on_failure).await;
                (index, outcome)
            });
        }

        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((index, outcome)) => {
                    let group = &groups[index];
                    if let Err(e) = &outcome {
                        warn!(charm = %group.charm, error = %e, "Verifier aborted");
                    }
                    reports[index] = Some(VerifierReport::new(&group.charm, group.units.clone(), outcome));
                }
                Err(e) => {
                    warn!(error = %e, "Verifier task panicked");
                }
            }
        }

        let verifiers = reports
            .into_iter()
            .zip(&groups)
            .map(|(report, group)| {
                report.unwrap_or_else(|| {
                    VerifierReport::new(
                        &group.charm,
                        group.units.clone(),
                        Err(VerifyError::internal("verifier task did not complete")),
                    )
                })
            })
            .collect();

        let stats = self.session.cache_stats().await;
        info!(
            session = %self.session.id(),
            calls = stats.calls,
            hits = stats.hits,
            timeouts = stats.timeouts,
            entries = stats.entries,
            "Action cache statistics"
        );

        Ok(SessionReport {
            session_id: self.session.id(),
            generated_at: Utc::now(),
            check: check.to_string(),
            verifiers,
        })
    }
}

fn unsupported_charm(charm: &str) -> Verdict {
    Verdict::unsupported(format!(
        "Charm '{charm}' is not supported. Supported charms:\n{}",
        VerifierKind::supported_charms()
    ))
}

/// What one verifier produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifierOutcome {
    Verdict { verdict: Verdict },
    Error { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierReport {
    pub charm: String,
    pub units: Vec<String>,
    pub outcome: VerifierOutcome,
}

impl VerifierReport {
    fn new(charm: &str, units: Vec<String>, outcome: VerifyResult<Verdict>) -> Self {
        let outcome = match outcome {
            Ok(verdict) => VerifierOutcome::Verdict { verdict },
            Err(e) => VerifierOutcome::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        };
        Self {
            charm: charm.to_string(),
            units,
            outcome,
        }
    }

    pub fn success(&self) -> bool {
        matches!(&self.outcome, VerifierOutcome::Verdict { verdict } if verdict.success())
    }
}

impl fmt::Display for VerifierReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===[{}]===", self.units.join(", "))?;
        match &self.outcome {
            VerifierOutcome::Verdict { verdict } => write!(f, "{verdict}"),
            VerifierOutcome::Error { code, message } => {
                writeln!(f, "Verification failed ({code}): {message}")?;
                writeln!(f)?;
                writeln!(f, "Result: Failed")
            }
        }
    }
}

/// Result of one verification session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub check: String,
    pub verifiers: Vec<VerifierReport>,
}

impl SessionReport {
    /// Every verifier produced a successful verdict
    pub fn success(&self) -> bool {
        self.verifiers.iter().all(VerifierReport::success)
    }

    /// Process exit code: 0 when every verifier passed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.verifiers
            .iter()
            .map(|v| match &v.outcome {
                VerifierOutcome::Verdict { verdict } => verdict.count(severity),
                VerifierOutcome::Error { .. } => 0,
            })
            .sum()
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, report) in self.verifiers.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{report}")?;
        }
        Ok(())
    }
}
