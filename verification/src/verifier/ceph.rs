//! ceph-osd and ceph-mon checks
//!
//! Cluster-wide information (health, pools, disk usage) is only available
//! through ceph-mon actions. OSD applications find their monitor through the
//! `mon` relation endpoint.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::debug;

use crate::charm::CheckKind;
use crate::error::VerifyResult;
use crate::executor::Check;
use crate::platform::{params, ActionParams};
use crate::result::{Severity, Verdict};
use crate::session::Session;
use crate::zone::{self, DiskFree, RemovedUnit};

use super::VerifierContext;

const MON_ENDPOINT: &str = "mon";

#[derive(Debug, Clone, Deserialize)]
struct Pool {
    size: i64,
    min_size: i64,
}

pub(super) fn osd_checks(ctx: &VerifierContext, _check: CheckKind) -> Vec<Check<'_>> {
    vec![
        Check::new("ceph_cluster_health", osd_cluster_health(ctx)),
        Check::new("replication_number", replication_number(ctx)),
        Check::new("availability_zone", availability_zone(ctx)),
    ]
}

pub(super) fn mon_checks(ctx: &VerifierContext, _check: CheckKind) -> Vec<Check<'_>> {
    vec![
        Check::new("ceph_mon_quorum", mon_quorum(ctx)),
        Check::new("ceph_cluster_health", mon_cluster_health(ctx)),
    ]
}

/// Run `get-health` on each monitor unit and report what it says.
pub async fn cluster_health(session: &Session, mon_units: &[String]) -> VerifyResult<Verdict> {
    if mon_units.is_empty() {
        return Ok(Verdict::fail("Ceph cluster is in an unknown state"));
    }

    let outputs = session
        .run_action_on_units(mon_units, "get-health", &ActionParams::new(), true)
        .await?;

    let mut verdict = Verdict::new();
    for (unit, output) in outputs {
        let health = output.field("message").unwrap_or_default();
        debug!(unit = %unit, health = %health, "Ceph cluster health");

        if health.contains("HEALTH_OK") {
            verdict.add_partial(Severity::Ok, format!("{unit}: Ceph cluster is healthy"));
        } else if health.contains("HEALTH_WARN") || health.contains("HEALTH_ERR") {
            verdict.add_partial(Severity::Fail, format!("{unit}: Ceph cluster is unhealthy"));
        } else {
            verdict.add_partial(
                Severity::Fail,
                format!("{unit}: Ceph cluster is in an unknown state"),
            );
        }
    }
    Ok(verdict)
}

/// Target OSD application → first active unit of its related ceph-mon
fn mon_unit_map(ctx: &VerifierContext) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for app in ctx.applications() {
        let mon = ctx
            .snapshot
            .related_applications(&app, MON_ENDPOINT)
            .iter()
            .find_map(|mon_app| {
                ctx.snapshot
                    .application_units(mon_app)
                    .into_iter()
                    .find(|u| u.is_active())
                    .map(|u| u.name.clone())
            });
        match mon {
            Some(unit) => {
                map.insert(app, unit);
            }
            None => debug!(application = %app, "No active ceph-mon unit related"),
        }
    }
    map
}

async fn osd_cluster_health(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let mons: BTreeSet<String> = mon_unit_map(ctx).into_values().collect();
    let mons: Vec<String> = mons.into_iter().collect();
    cluster_health(&ctx.session, &mons).await.map(Some)
}

/// Targets plus already inactive units of an application must not exceed
/// the smallest `size - min_size` margin of any pool.
async fn replication_number(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let mons = mon_unit_map(ctx);
    if mons.is_empty() {
        return Ok(Some(no_mon_found(ctx)));
    }

    let mut verdict = Verdict::new();
    for (app, mon) in &mons {
        let output = ctx
            .session
            .run_action(mon, "list-pools", &params([("format", "json")]))
            .await?;
        let pools: Vec<Pool> = output.json_field("message")?;
        let Some(min_replicas) = pools.iter().map(|p| p.size - p.min_size).min() else {
            debug!(application = %app, "No pools, replication is unconstrained");
            continue;
        };

        let targets: BTreeSet<&str> = ctx.units_of(app).iter().map(|u| u.name.as_str()).collect();
        let inactive: BTreeSet<&str> = ctx
            .snapshot
            .application_units(app)
            .into_iter()
            .filter(|u| !u.is_active())
            .map(|u| u.name.as_str())
            .collect();
        let affected = targets.union(&inactive).count() as i64;

        if affected > min_replicas {
            verdict.add_partial(
                Severity::Fail,
                format!(
                    "The minimum number of replicas in '{app}' is {min_replicas} and it's not \
                     safe to restart/shutdown {} units. {} units are not active.",
                    targets.len(),
                    inactive.len()
                ),
            );
        }
    }

    if verdict.is_empty() {
        verdict.add_partial(Severity::Ok, "Minimum replica number check passed.");
    }
    Ok(Some(verdict))
}

/// Feed `ceph osd df tree` into the zone capacity analysis, once per OSD
/// application.
async fn availability_zone(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let mons = mon_unit_map(ctx);
    if mons.is_empty() {
        return Ok(Some(no_mon_found(ctx)));
    }

    let mut verdict = Verdict::new();
    for (app, mon) in &mons {
        let output = ctx
            .session
            .run_action(mon, "show-disk-free", &params([("format", "json")]))
            .await?;
        let df: DiskFree = output.json_field("message")?;

        let removed = ctx
            .units_of(app)
            .iter()
            .map(|u| Ok(RemovedUnit::new(&u.name, ctx.hostname(&u.name)?)))
            .collect::<VerifyResult<Vec<_>>>()?;

        let result = zone::check_capacity(df.nodes, &removed)?;
        let failed = !result.success();
        verdict += result;
        if failed {
            break;
        }
    }
    Ok(Some(verdict))
}

fn no_mon_found(ctx: &VerifierContext) -> Verdict {
    let apps: Vec<String> = ctx.applications().into_iter().collect();
    Verdict::fail(format!(
        "No active ceph-mon unit related to {} was found.",
        apps.join(", ")
    ))
}

/// Removing the targets must leave more than half of the known monitors
/// online, as seen by every target.
async fn mon_quorum(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let outputs = ctx
        .session
        .run_action_on_units(&ctx.unit_names(), "get-quorum-status", &ActionParams::new(), true)
        .await?;

    let affected_hosts = ctx
        .units
        .iter()
        .map(|u| ctx.hostname(&u.name))
        .collect::<VerifyResult<BTreeSet<String>>>()?;

    let mut verdict = Verdict::new();
    for (unit, output) in outputs {
        let known: BTreeSet<String> = output.json_field("known-mons")?;
        let online: BTreeSet<String> = output.json_field("online-mons")?;
        let after_change = online.difference(&affected_hosts).count();
        debug!(unit = %unit, known = known.len(), after_change, "Ceph mon quorum");

        if after_change <= known.len() / 2 {
            verdict.add_partial(
                Severity::Fail,
                format!("Removing unit {unit} will lose Ceph mon quorum"),
            );
        }
    }

    if verdict.is_empty() {
        verdict.add_partial(Severity::Ok, "Ceph-mon quorum check passed.");
    }
    Ok(Some(verdict))
}

/// Cluster health as seen by one target unit per ceph-mon application
async fn mon_cluster_health(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let mons: Vec<String> = ctx
        .applications()
        .iter()
        .filter_map(|app| ctx.units_of(app).first().map(|u| u.name.clone()))
        .collect();
    cluster_health(&ctx.session, &mons).await.map(Some)
}
