//! nova-compute checks

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::debug;

use crate::charm::CheckKind;
use crate::error::{VerifyError, VerifyResult};
use crate::executor::Check;
use crate::platform::ActionParams;
use crate::result::{Severity, Verdict};

use super::VerifierContext;

/// Entry of the `list-compute-nodes` action output
#[derive(Debug, Clone, Deserialize)]
struct ComputeNode {
    host: String,
    zone: String,
    state: String,
    status: String,
}

impl ComputeNode {
    fn is_active(&self) -> bool {
        self.state == "up" && self.status == "enabled"
    }
}

/// Reboot and shutdown run the same checks.
pub(super) fn checks(ctx: &VerifierContext, _check: CheckKind) -> Vec<Check<'_>> {
    vec![
        Check::new("no_running_vms", no_running_vms(ctx)),
        Check::new("no_empty_az", no_empty_az(ctx)),
    ]
}

async fn no_running_vms(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let outputs = ctx
        .session
        .run_action_on_units(&ctx.unit_names(), "instance-count", &ActionParams::new(), true)
        .await?;

    let mut verdict = Verdict::new();
    for (unit, output) in outputs {
        let raw = output.require("instance-count")?;
        let running: u64 = raw.trim().parse().map_err(|e| {
            VerifyError::parse(format!("instance-count of {unit}"), format!("'{raw}': {e}"))
        })?;
        let severity = if running == 0 {
            Severity::Ok
        } else {
            Severity::Fail
        };
        verdict.add_partial(severity, format!("Unit {unit} is running {running} VMs."));
    }
    Ok(Some(verdict))
}

/// Removing the targets must not leave an availability zone without an
/// enabled compute node.
async fn no_empty_az(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let names = ctx
        .session
        .run_action_on_units(&ctx.unit_names(), "node-name", &ActionParams::new(), true)
        .await?;
    let target_hosts = names
        .iter()
        .map(|(_, output)| output.require("node-name"))
        .collect::<VerifyResult<BTreeSet<String>>>()?;

    let Some(first) = ctx.units.first() else {
        return Ok(None);
    };
    let listing = ctx
        .session
        .run_action(&first.name, "list-compute-nodes", &ActionParams::new())
        .await?;
    let nodes: Vec<ComputeNode> = listing.json_field("compute-nodes")?;

    let affected: BTreeSet<&str> = nodes
        .iter()
        .filter(|n| target_hosts.contains(&n.host))
        .map(|n| n.zone.as_str())
        .collect();
    let remaining: BTreeSet<&str> = nodes
        .iter()
        .filter(|n| !target_hosts.contains(&n.host) && n.is_active())
        .map(|n| n.zone.as_str())
        .collect();
    debug!(?affected, ?remaining, "Availability zones");

    let empty: Vec<&str> = affected.difference(&remaining).copied().collect();
    if empty.is_empty() {
        return Ok(Some(Verdict::ok("Empty Availability Zone check passed.")));
    }
    Ok(Some(Verdict::fail(format!(
        "Removing these units would leave following availability zones empty: {}",
        empty.join(", ")
    ))))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::charm::VerifierKind;
    use serde_json::json;

    fn compute_nodes(nodes: &[(&str, &str, &str)]) -> serde_json::Value {
        let list: Vec<serde_json::Value> = nodes
            .iter()
            .map(|(host, zone, status)| {
                json!({"host": host, "zone": zone, "state": "up", "status": status, "id": 1})
            })
            .collect();
        json!({ "compute-nodes": serde_json::to_string(&list).unwrap() })
    }

    fn platform(instances: &[(&str, &str)]) -> FakePlatform {
        let mut platform = FakePlatform::default();
        platform.snapshot = ModelBuilder::new()
            .app("nova-compute", "cs:focal/nova-compute-141")
            .unit("nova-compute/0", "0")
            .unit("nova-compute/1", "1")
            .unit("nova-compute/2", "2")
            .build();
        for (i, (unit, count)) in instances.iter().enumerate() {
            platform.respond(unit, "instance-count", json!({ "instance-count": count }));
            platform.respond(unit, "node-name", json!({ "node-name": format!("compute-{i}") }));
        }
        platform
    }

    #[tokio::test]
    async fn test_running_vms_fail() {
        let mut platform = platform(&[("nova-compute/0", "0"), ("nova-compute/1", "3")]);
        platform.respond(
            "nova-compute/0",
            "list-compute-nodes",
            compute_nodes(&[
                ("compute-0", "az1", "enabled"),
                ("compute-1", "az1", "enabled"),
                ("compute-2", "az1", "enabled"),
            ]),
        );
        let (verifier, _) = verifier(VerifierKind::NovaCompute, &["nova-compute/0", "nova-compute/1"], platform);

        let verdict = verifier.verify("shutdown", false).await.unwrap();
        let msgs = messages(&verdict);
        assert!(msgs.contains(&"[OK] Unit nova-compute/0 is running 0 VMs.".to_string()));
        assert!(msgs.contains(&"[FAIL] Unit nova-compute/1 is running 3 VMs.".to_string()));
        assert!(msgs.contains(&"[OK] Empty Availability Zone check passed.".to_string()));
        assert!(!verdict.success());
    }

    #[tokio::test]
    async fn test_empty_zone_fails() {
        let mut platform = platform(&[("nova-compute/0", "0")]);
        platform.respond(
            "nova-compute/0",
            "list-compute-nodes",
            compute_nodes(&[
                ("compute-0", "az1", "enabled"),
                ("compute-1", "az2", "enabled"),
                ("compute-2", "az1", "disabled"),
            ]),
        );
        let (verifier, _) = verifier(VerifierKind::NovaCompute, &["nova-compute/0"], platform);

        let verdict = verifier.verify("reboot", false).await.unwrap();
        assert_eq!(
            messages(&verdict).last().unwrap(),
            "[FAIL] Removing these units would leave following availability zones empty: az1"
        );
    }

    #[tokio::test]
    async fn test_malformed_count_is_check_failure() {
        let mut platform = platform(&[("nova-compute/0", "many")]);
        platform.respond(
            "nova-compute/0",
            "list-compute-nodes",
            compute_nodes(&[("compute-0", "az1", "enabled"), ("compute-1", "az1", "enabled")]),
        );
        let (verifier, _) = verifier(VerifierKind::NovaCompute, &["nova-compute/0"], platform);

        let verdict = verifier.verify("reboot", false).await.unwrap();
        let msgs = messages(&verdict);
        assert!(msgs[2].starts_with("[FAIL] no_running_vms check failed with error:"), "{msgs:?}");
        assert_eq!(msgs[3], "[OK] Empty Availability Zone check passed.");
    }

    #[tokio::test]
    async fn test_node_name_fetched_once_per_unit() {
        let mut platform = platform(&[("nova-compute/0", "0"), ("nova-compute/2", "0")]);
        platform.respond(
            "nova-compute/0",
            "list-compute-nodes",
            compute_nodes(&[
                ("compute-0", "az1", "enabled"),
                ("compute-1", "az2", "enabled"),
                ("compute-3", "az1", "enabled"),
            ]),
        );
        let (verifier, platform) = verifier(VerifierKind::NovaCompute, &["nova-compute/0", "nova-compute/2"], platform);

        verifier.verify("reboot", false).await.unwrap();
        verifier.verify("shutdown", false).await.unwrap();
        assert_eq!(platform.call_count("node-name"), 2);
        assert_eq!(platform.call_count("instance-count"), 2);
        assert_eq!(platform.call_count("list-compute-nodes"), 1);
    }
}
