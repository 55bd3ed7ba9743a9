//! ovn-central checks
//!
//! ovn-central units form two Raft clusters, one for the Southbound and one
//! for the Northbound database. The `cluster-status` action reports how a
//! unit sees both of them, as YAML documents in the `ovnsb` and `ovnnb`
//! result fields:
//!
//! ```yaml
//! cluster_id: 567e7225-369e-40d6-abf8-9b442bbcd18b
//! server_id: 16335def-c21e-404c-b123-8337b3013c07
//! status: cluster member
//! role: follower
//! leader: dbdb
//! entries_not_yet_committed: 0
//! unit_map:
//!   ovn-central/0: 7f23
//!   UNKNOWN: [a1b2]
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::charm::CheckKind;
use crate::error::{VerifyError, VerifyResult};
use crate::executor::Check;
use crate::platform::ActionParams;
use crate::quorum::{self, ClusterQuorumState, ConsensusGroup, MemberView};
use crate::result::Verdict;

use super::VerifierContext;

/// Key under which members without a unit are listed in `unit_map`
const UNKNOWN_MEMBER: &str = "UNKNOWN";

/// Status of one OVN database cluster as seen by one unit
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub cluster_id: Option<String>,
    pub server_id: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub term: Option<u64>,
    /// Short id of the leader, or `self`
    pub leader: String,
    #[serde(default)]
    pub vote: Option<String>,
    pub entries_not_yet_committed: u64,
    #[serde(default)]
    pub entries_not_yet_applied: Option<u64>,
    pub unit_map: BTreeMap<String, serde_yaml::Value>,
}

impl ClusterStatus {
    pub fn parse(raw: &str) -> VerifyResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| VerifyError::parse("OVN cluster status", e.to_string()))
    }

    /// First four characters of the server id, the form OVN uses in logs
    pub fn short_id(&self) -> String {
        self.server_id.chars().take(4).collect()
    }

    pub fn is_leader(&self) -> bool {
        self.leader == "self"
    }

    /// Leader as seen by this server, in short id form
    pub fn leader_id(&self) -> Option<String> {
        if self.is_leader() {
            Some(self.short_id())
        } else if self.leader.is_empty() {
            None
        } else {
            Some(self.leader.clone())
        }
    }

    /// Servers the reporting unit could not associate with a unit
    pub fn unknown_servers(&self) -> Vec<String> {
        match self.unit_map.get(UNKNOWN_MEMBER) {
            None => Vec::new(),
            Some(serde_yaml::Value::Sequence(items)) => items
                .iter()
                .map(|v| match v {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                })
                .collect(),
            Some(serde_yaml::Value::String(s)) => vec![s.clone()],
            Some(_) => vec![UNKNOWN_MEMBER.to_string()],
        }
    }

    fn member_view(&self, unit: &str) -> MemberView {
        MemberView {
            unit: unit.to_string(),
            leader: self.leader_id(),
            is_leader: self.is_leader(),
            uncommitted: self.entries_not_yet_committed,
            unknown_peers: self.unknown_servers(),
        }
    }
}

/// Southbound and Northbound status reported by one unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitClusterStatus {
    pub southbound: ClusterStatus,
    pub northbound: ClusterStatus,
}

impl UnitClusterStatus {
    fn from_output(unit: &str, sb: Option<String>, nb: Option<String>) -> VerifyResult<Self> {
        let report = |field: Option<String>, cluster: &str| -> VerifyResult<ClusterStatus> {
            let raw = field.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
                VerifyError::parse(
                    format!("cluster-status of {unit}"),
                    format!(
                        "{unit} failed to report {cluster} cluster status. Please try to run \
                         `cluster-status` action manually."
                    ),
                )
            })?;
            ClusterStatus::parse(&raw)
        };

        Ok(Self {
            southbound: report(sb, "Southbound")?,
            northbound: report(nb, "Northbound")?,
        })
    }
}

pub(super) fn checks(ctx: &VerifierContext, check: CheckKind) -> Vec<Check<'_>> {
    vec![
        Check::new("single_application", single_application(ctx)),
        Check::new("cluster_quorum", cluster_quorum(ctx, check)),
    ]
}

async fn single_application(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let apps = ctx.applications();
    if apps.len() > 1 {
        let list: Vec<String> = apps.into_iter().collect();
        return Ok(Some(Verdict::fail(format!(
            "Can't verify multiple ovn-central application at the same time. Currently \
             selected units belong to: {}",
            list.join(", ")
        ))));
    }
    Ok(Some(Verdict::ok(
        "Selected units are part of only one application.",
    )))
}

/// Ask every unit of the application for a fresh cluster status and run the
/// quorum analysis for the requested operation.
async fn cluster_quorum(ctx: &VerifierContext, check: CheckKind) -> VerifyResult<Option<Verdict>> {
    let Some(app) = ctx.units.first().map(|u| u.application.clone()) else {
        return Ok(None);
    };
    let members: Vec<String> = ctx
        .snapshot
        .application_units(&app)
        .into_iter()
        .map(|u| u.name.clone())
        .collect();

    let outputs = ctx
        .session
        .run_action_on_units(&members, "cluster-status", &ActionParams::new(), false)
        .await?;

    let mut southbound = Vec::with_capacity(outputs.len());
    let mut northbound = Vec::with_capacity(outputs.len());
    for (unit, output) in &outputs {
        let status = UnitClusterStatus::from_output(unit, output.field("ovnsb"), output.field("ovnnb"))?;
        southbound.push(status.southbound.member_view(unit));
        northbound.push(status.northbound.member_view(unit));
    }

    let state = ClusterQuorumState {
        total_members: members.len(),
        targeted_members: ctx.units_of(&app).len(),
        groups: vec![
            ConsensusGroup {
                name: "Southbound".to_string(),
                members: southbound,
            },
            ConsensusGroup {
                name: "Northbound".to_string(),
                members: northbound,
            },
        ],
        cluster_label: "OVN".to_string(),
    };
    debug!(
        application = %app,
        total = state.total_members,
        targeted = state.targeted_members,
        operation = %check.operation(),
        "OVN cluster quorum"
    );

    Ok(Some(quorum::analyze(&state, check.operation())))
}
