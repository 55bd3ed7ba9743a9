//! Raft quorum and fault tolerance analysis
//!
//! A Raft cluster of `N` members needs `N/2 + 1` of them alive to elect a
//! leader and commit writes. The difference is its fault tolerance: how many
//! members may be down at once.
//!
//! | N | quorum | tolerance |
//! |---|--------|-----------|
//! | 1 | 1      | 0         |
//! | 3 | 2      | 1         |
//! | 5 | 3      | 2         |
//! | 7 | 4      | 3         |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::result::{Severity, Verdict};

/// Minimum number of live members for a cluster of `size`
pub fn min_quorum(size: usize) -> usize {
    size / 2 + 1
}

/// Number of members a cluster of `size` can lose and keep quorum
pub fn fault_tolerance(size: usize) -> usize {
    if size < 1 {
        return 0;
    }
    size - min_quorum(size)
}

/// How the targeted members leave the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Members come back after a while
    Reboot,
    /// Members leave for good
    Downscale,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reboot => write!(f, "reboot"),
            Self::Downscale => write!(f, "downscale"),
        }
    }
}

/// How one member sees one consensus group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    /// Unit reporting this view
    pub unit: String,
    /// Leader this member believes in; `None` if it reports no leader
    pub leader: Option<String>,
    /// Whether this member is the leader itself
    pub is_leader: bool,
    /// Log entries not yet committed (meaningful on the leader)
    pub uncommitted: u64,
    /// Peers this member cannot associate with a unit
    #[serde(default)]
    pub unknown_peers: Vec<String>,
}

/// One independent Raft cluster, e.g. the OVN Southbound database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusGroup {
    pub name: String,
    pub members: Vec<MemberView>,
}

impl ConsensusGroup {
    /// Leader id → units supporting it, in member order
    pub fn leader_support(&self) -> BTreeMap<String, Vec<String>> {
        let mut support: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for member in &self.members {
            if let Some(leader) = member.leader.as_ref().filter(|l| !l.is_empty()) {
                support.entry(leader.clone()).or_default().push(member.unit.clone());
            }
        }
        support
    }
}

/// Everything the analyzer needs about a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterQuorumState {
    /// Members registered in the cluster
    pub total_members: usize,
    /// Members the operation takes away
    pub targeted_members: usize,
    pub groups: Vec<ConsensusGroup>,
    /// Label used in messages, e.g. `OVN`
    #[serde(default)]
    pub cluster_label: String,
}

/// Evaluate whether `state` survives `operation`.
///
/// Prerequisites run first; each one returns early when it fails:
/// 1. every group agrees on one leader,
/// 2. group leaders have no uncommitted log entries,
/// 3. no member reports peers it cannot associate with a unit.
pub fn analyze(state: &ClusterQuorumState, operation: Operation) -> Verdict {
    let mut verdict = leader_consensus(&state.groups);
    if !verdict.success() {
        return verdict;
    }

    verdict += uncommitted_entries(&state.groups);
    if !verdict.success() {
        return verdict;
    }

    verdict += unknown_peers(&state.groups);
    if !verdict.success() {
        return verdict;
    }

    verdict
        + match operation {
            Operation::Reboot => reboot_tolerance(state),
            Operation::Downscale => downscale_tolerance(state),
        }
}

fn leader_consensus(groups: &[ConsensusGroup]) -> Verdict {
    let mut verdict = Verdict::new();
    for group in groups {
        let support = group.leader_support();
        match support.len() {
            0 => verdict.add_partial(
                Severity::Fail,
                format!("No unit reported elected leader in {} cluster.", group.name),
            ),
            1 => {
                let leader = support.keys().next().map(String::as_str).unwrap_or_default();
                verdict.add_partial(
                    Severity::Ok,
                    format!("All units agree that {leader} is {} leader.", group.name),
                );
            }
            _ => {
                let mut message = format!("There's no consensus on {} cluster leader. ", group.name);
                for (leader, units) in &support {
                    message.push_str(&format!("{leader} is supported by {}; ", units.join(", ")));
                }
                verdict.add_partial(Severity::Fail, message.trim_end().to_string());
            }
        }
    }
    verdict
}

fn uncommitted_entries(groups: &[ConsensusGroup]) -> Verdict {
    let mut verdict = Verdict::new();
    for group in groups {
        for member in group.members.iter().filter(|m| m.is_leader) {
            let severity = if member.uncommitted == 0 {
                Severity::Ok
            } else {
                Severity::Fail
            };
            verdict.add_partial(
                severity,
                format!(
                    "{} ({} leader) reports {} uncommitted log entries.",
                    member.unit, group.name, member.uncommitted
                ),
            );
        }
    }
    verdict
}

fn unknown_peers(groups: &[ConsensusGroup]) -> Verdict {
    let mut verdict = Verdict::new();
    for group in groups {
        if group.members.iter().any(|m| !m.unknown_peers.is_empty()) {
            verdict.add_partial(
                Severity::Fail,
                format!(
                    "{} cluster reports servers that are not associated with a unit.",
                    group.name
                ),
            );
        }
    }
    if verdict.is_empty() {
        verdict.add_partial(Severity::Ok, "No disassociated cluster members reported.");
    }
    verdict
}

fn reboot_tolerance(state: &ClusterQuorumState) -> Verdict {
    let total = state.total_members;
    let targeted = state.targeted_members;
    let tolerance = fault_tolerance(total);
    let label = cluster_label(state);

    if targeted > tolerance {
        return Verdict::fail(format!(
            "{label} with {total} units can not tolerate simultaneous reboot of {targeted} units."
        ));
    }

    let mut verdict = Verdict::ok(format!(
        "{label} with {total} units can safely tolerate simultaneous reboot of {targeted} units."
    ));
    if targeted == tolerance {
        verdict.add_partial(
            Severity::Warn,
            "While the rebooted units are down, this cluster won't be able to tolerate any \
             more failures.",
        );
    }
    verdict
}

fn downscale_tolerance(state: &ClusterQuorumState) -> Verdict {
    let total = state.total_members;
    let targeted = state.targeted_members;
    let tolerance = fault_tolerance(total);
    let remaining = total.saturating_sub(targeted);
    let new_tolerance = fault_tolerance(remaining);
    let base = format!("Removing {targeted} units from cluster of {total} units");

    if new_tolerance == 0 {
        return Verdict::fail(format!("{base} would bring its fault tolerance to 0."));
    }

    if new_tolerance < tolerance {
        return Verdict::ok(format!("{base} keeps the cluster fault tolerant."))
            + Verdict::warn(format!(
                "{base} will decrease its fault tolerance from {tolerance} to {new_tolerance}."
            ));
    }

    Verdict::ok(format!("{base} won't impact its fault tolerance."))
}

fn cluster_label(state: &ClusterQuorumState) -> String {
    if state.cluster_label.is_empty() {
        "Cluster".to_string()
    } else {
        format!("{} cluster", state.cluster_label)
    }
}
