//! neutron-gateway checks
//!
//! Routers, DHCP networks and load balancers are hosted by gateway units.
//! Every gateway unit of the targeted applications is asked which resources
//! it hosts; a resource that is only ACTIVE on hosts being taken down would
//! become unavailable.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::charm::CheckKind;
use crate::error::{VerifyError, VerifyResult};
use crate::executor::Check;
use crate::platform::ActionParams;
use crate::result::{Severity, Verdict};

use super::VerifierContext;

/// A resource type the gateway hosts
#[derive(Debug, Clone, Copy)]
struct ResourceKind {
    /// Action listing the resources on one unit
    action: &'static str,
    /// Result field holding the JSON list
    field: &'static str,
    label: &'static str,
}

const ROUTERS: ResourceKind = ResourceKind {
    action: "get-status-routers",
    field: "router-list",
    label: "routers",
};

const DHCP: ResourceKind = ResourceKind {
    action: "get-status-dhcp",
    field: "dhcp-networks",
    label: "DHCP networks",
};

const LOAD_BALANCERS: ResourceKind = ResourceKind {
    action: "get-status-lb",
    field: "load-balancers",
    label: "load balancers",
};

/// One resource as reported by one gateway unit
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostedResource {
    id: String,
    status: String,
    ha: bool,
    host: String,
    unit: String,
    /// The host is being shut down
    shutdown: bool,
}

impl HostedResource {
    fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

pub(super) fn checks(ctx: &VerifierContext, _check: CheckKind) -> Vec<Check<'_>> {
    vec![
        Check::new("non_redundant_routers", non_redundant(ctx, ROUTERS)),
        Check::new("non_redundant_dhcp", non_redundant(ctx, DHCP)),
        Check::new("non_redundant_lb", non_redundant(ctx, LOAD_BALANCERS)),
        Check::new("router_ha", router_ha(ctx)),
    ]
}

/// Gateway units of every targeted application, including those staying up
fn gateway_units(ctx: &VerifierContext) -> Vec<String> {
    ctx.applications()
        .iter()
        .flat_map(|app| ctx.snapshot.application_units(app))
        .map(|u| u.name.clone())
        .collect()
}

async fn node_names(ctx: &VerifierContext, units: &[String]) -> VerifyResult<Vec<(String, String)>> {
    let outputs = ctx
        .session
        .run_action_on_units(units, "node-name", &ActionParams::new(), true)
        .await?;
    outputs
        .into_iter()
        .map(|(unit, output)| Ok((unit, output.require("node-name")?)))
        .collect()
}

/// Resources of `kind` across every gateway unit, tagged with their host
async fn hosted_resources(ctx: &VerifierContext, kind: ResourceKind) -> VerifyResult<Vec<HostedResource>> {
    let shutdown_hosts: BTreeSet<String> = node_names(ctx, &ctx.unit_names())
        .await?
        .into_iter()
        .map(|(_, host)| host)
        .collect();

    let units = gateway_units(ctx);
    let hosts = node_names(ctx, &units).await?;
    let listings = ctx
        .session
        .run_action_on_units(&units, kind.action, &ActionParams::new(), true)
        .await?;

    let mut resources = Vec::new();
    for ((unit, host), (_, output)) in hosts.into_iter().zip(listings) {
        let entries: Vec<Value> = output.json_field(kind.field)?;
        for entry in entries {
            let id = entry
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    VerifyError::parse(
                        format!("{} of {unit}", kind.field),
                        "resource without 'id'",
                    )
                })?
                .to_string();
            resources.push(HostedResource {
                id,
                status: entry
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                ha: entry.get("ha").and_then(Value::as_bool).unwrap_or(false),
                host: host.clone(),
                unit: unit.clone(),
                shutdown: shutdown_hosts.contains(&host),
            });
        }
    }
    debug!(kind = kind.label, count = resources.len(), "Collected gateway resources");
    Ok(resources)
}

/// Every resource ACTIVE on a host going down must also be ACTIVE elsewhere.
async fn non_redundant(ctx: &VerifierContext, kind: ResourceKind) -> VerifyResult<Option<Verdict>> {
    let resources = hosted_resources(ctx, kind).await?;

    let remaining: BTreeSet<&str> = resources
        .iter()
        .filter(|r| !r.shutdown && r.is_active())
        .map(|r| r.id.as_str())
        .collect();
    let lost: BTreeSet<&str> = resources
        .iter()
        .filter(|r| r.shutdown && r.is_active() && !remaining.contains(r.id.as_str()))
        .map(|r| r.id.as_str())
        .collect();

    if lost.is_empty() {
        return Ok(Some(Verdict::ok(format!(
            "No non-redundant {} found on the units being shut down.",
            kind.label
        ))));
    }

    let ids: Vec<&str> = lost.into_iter().collect();
    Ok(Some(Verdict::fail(format!(
        "The following {} are non-redundant and would become unavailable: {}",
        kind.label,
        ids.join(", ")
    ))))
}

/// HA routers fail over on their own, but a manual failover beforehand avoids
/// the outage window.
async fn router_ha(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let resources = hosted_resources(ctx, ROUTERS).await?;

    let ha_routers: Vec<String> = resources
        .iter()
        .filter(|r| r.shutdown && r.is_active() && r.ha)
        .map(|r| format!("{} ({} on {})", r.id, r.unit, r.host))
        .collect();

    if ha_routers.is_empty() {
        return Ok(None);
    }

    Ok(Some(Verdict::warn(format!(
        "It's recommended that you manually failover the following HA routers before \
         continuing: {}",
        ha_routers.join(", ")
    ))))
}
