//! Checks that apply to every charm

use crate::error::VerifyResult;
use crate::result::{Severity, Verdict};

use super::VerifierContext;

/// Warn about principal units that share a machine with the targets but are
/// not being verified.
pub(super) async fn affected_machines(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let mut verdict = Verdict::new();

    for machine in ctx.affected_machines() {
        let neighbours = ctx
            .snapshot
            .principal_units_on_machines(std::slice::from_ref(&machine));
        for unit in neighbours {
            if ctx.is_target(&unit.name) || ctx.co_targets.contains(&unit.name) {
                continue;
            }
            verdict.add_partial(
                Severity::Warn,
                format!(
                    "Machine {machine} runs other principal unit that is not being checked: {}",
                    unit.name
                ),
            );
        }
    }

    Ok(Some(verdict))
}

/// Warn about units on containers or VMs nested in the target machines.
/// Leader units are marked with `*`.
pub(super) async fn sub_machines(ctx: &VerifierContext) -> VerifyResult<Option<Verdict>> {
    let mut verdict = Verdict::new();

    for target in &ctx.units {
        let children = ctx.snapshot.descendant_machines(&target.machine);
        if children.is_empty() {
            continue;
        }
        for unit in ctx.snapshot.units.values() {
            if !children.contains(&unit.machine) {
                continue;
            }
            let marker = if unit.leader { "*" } else { "" };
            verdict.add_partial(
                Severity::Warn,
                format!(
                    "{} has units running on child machines: {}{marker}",
                    target.name, unit.name
                ),
            );
        }
    }

    Ok(Some(verdict))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::charm::VerifierKind;

    #[tokio::test]
    async fn test_leader_on_child_machine_is_marked() {
        let mut platform = FakePlatform::default();
        platform.snapshot = ModelBuilder::new()
            .app("ceph-osd", "cs:ceph-osd-310")
            .app("ceph-mon", "cs:ceph-mon-55")
            .unit("ceph-osd/3", "2")
            .unit("ceph-mon/0", "2/lxd/0")
            .unit("ceph-mon/1", "2/lxd/1")
            .unit("ceph-mon/2", "3/lxd/0")
            .build();
        let (verifier, _) = verifier(VerifierKind::CephOsd, &["ceph-osd/3"], platform);

        let verdict = super::sub_machines(verifier.context()).await.unwrap().unwrap();
        assert_eq!(
            messages(&verdict),
            vec![
                "[WARN] ceph-osd/3 has units running on child machines: ceph-mon/0*",
                "[WARN] ceph-osd/3 has units running on child machines: ceph-mon/1",
            ]
        );
    }

    #[tokio::test]
    async fn test_no_neighbours_yields_empty_verdict() {
        let mut platform = FakePlatform::default();
        platform.snapshot = ModelBuilder::new()
            .app("nova-compute", "nova-compute")
            .unit("nova-compute/0", "0")
            .unit("nova-compute/1", "1")
            .build();
        let (verifier, _) = verifier(VerifierKind::NovaCompute, &["nova-compute/0", "nova-compute/1"], platform);

        let verdict = super::affected_machines(verifier.context()).await.unwrap().unwrap();
        assert!(verdict.is_empty());
        let verdict = super::sub_machines(verifier.context()).await.unwrap().unwrap();
        assert!(verdict.is_empty());
    }
}
