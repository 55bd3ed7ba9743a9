//! Supported charms and check names

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VerifyError, VerifyResult};
use crate::platform::{ModelSnapshot, UnitInfo};
use crate::quorum::Operation;
use crate::version::AgentVersion;

/// Charms with a dedicated verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifierKind {
    NovaCompute,
    CephOsd,
    CephMon,
    NeutronGateway,
    OvnCentral,
}

impl VerifierKind {
    pub const ALL: [VerifierKind; 5] = [
        Self::NovaCompute,
        Self::CephOsd,
        Self::CephMon,
        Self::NeutronGateway,
        Self::OvnCentral,
    ];

    /// Map a bare charm name to its verifier
    pub fn from_charm(charm: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.charm_name() == charm)
    }

    pub fn charm_name(&self) -> &'static str {
        match self {
            Self::NovaCompute => "nova-compute",
            Self::CephOsd => "ceph-osd",
            Self::CephMon => "ceph-mon",
            Self::NeutronGateway => "neutron-gateway",
            Self::OvnCentral => "ovn-central",
        }
    }

    /// Checks this verifier implements
    pub fn supported_checks(&self) -> &'static [CheckKind] {
        &[CheckKind::Reboot, CheckKind::Shutdown]
    }

    /// Lowest unit agent version the verifier works with. Ceph-mon relies on
    /// machine hostnames, which older agents do not report.
    pub fn min_agent_version(&self) -> Option<AgentVersion> {
        match self {
            Self::CephMon => Some(AgentVersion::new(2, 8, 10)),
            _ => None,
        }
    }

    /// Actions the charm must expose for the verifier to work
    pub fn required_actions(&self) -> &'static [&'static str] {
        match self {
            Self::OvnCentral => &["cluster-status"],
            _ => &[],
        }
    }

    /// Newline separated list of supported charm names
    pub fn supported_charms() -> String {
        Self::ALL
            .iter()
            .map(|k| k.charm_name())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for VerifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.charm_name())
    }
}

/// Disruptive operation to verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Reboot,
    Shutdown,
}

impl CheckKind {
    pub const ALL: [CheckKind; 2] = [Self::Reboot, Self::Shutdown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reboot => "reboot",
            Self::Shutdown => "shutdown",
        }
    }

    /// Effect of this check on a consensus cluster
    pub fn operation(&self) -> Operation {
        match self {
            Self::Reboot => Operation::Reboot,
            Self::Shutdown => Operation::Downscale,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reboot" => Ok(Self::Reboot),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(VerifyError::configuration(format!(
                "Unsupported verification check \"{other}\""
            ))),
        }
    }
}

/// Explicit application → charm overrides (`APP:CHARM` pairs)
///
/// Needed for applications deployed from local or renamed charms whose charm
/// URL does not carry the upstream name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharmMap {
    overrides: BTreeMap<String, String>,
}

impl CharmMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `APP:CHARM` pair and add it
    pub fn parse(&mut self, pair: &str) -> VerifyResult<()> {
        let (app, charm) = parse_mapping(pair)?;
        self.overrides.insert(app, charm);
        Ok(())
    }

    pub fn insert(&mut self, application: impl Into<String>, charm: impl Into<String>) {
        self.overrides.insert(application.into(), charm.into());
    }

    pub fn get(&self, application: &str) -> Option<&str> {
        self.overrides.get(application).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Bare charm name of the unit's application, honouring overrides
    pub fn resolve(&self, snapshot: &ModelSnapshot, unit: &UnitInfo) -> VerifyResult<String> {
        if let Some(charm) = self.get(&unit.application) {
            tracing::debug!(unit = %unit.name, charm = %charm, "Using explicitly mapped charm");
            return Ok(charm.to_string());
        }

        let app = snapshot.application(&unit.application).ok_or_else(|| {
            VerifyError::configuration(format!(
                "Application '{}' of unit {} not found in the model.",
                unit.application, unit.name
            ))
        })?;
        let charm = app.charm_name()?;
        tracing::debug!(unit = %unit.name, charm = %charm, "Inferred charm");
        Ok(charm)
    }
}

impl FromIterator<(String, String)> for CharmMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            overrides: iter.into_iter().collect(),
        }
    }
}

/// Split `APP:CHARM` into its two halves
pub fn parse_mapping(pair: &str) -> VerifyResult<(String, String)> {
    let invalid = || {
        VerifyError::configuration(format!(
            "Unexpected format of charm mapping '{pair}'. Expected <APP_NAME>:<CHARM_NAME>."
        ))
    };
    let mut parts = pair.split(':');
    let (Some(app), Some(charm), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let (app, charm) = (app.trim(), charm.trim());
    if app.is_empty() || charm.is_empty() {
        return Err(invalid());
    }
    Ok((app.to_string(), charm.to_string()))
}
