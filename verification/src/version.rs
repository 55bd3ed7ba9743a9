//! Juju agent versions

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::VerifyError;

static AGENT_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?").expect("AGENT_VERSION_RE regex should compile")
});

/// `major.minor.patch` version reported by a unit agent.
///
/// Suffixes such as `-beta1` or a fourth build component are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AgentVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for AgentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for AgentVersion {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VerifyError::version(format!("invalid agent version '{s}'"));
        let caps = AGENT_VERSION_RE.captures(s.trim()).ok_or_else(invalid)?;

        let component = |i: usize| -> Result<u32, VerifyError> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().map_err(|_| invalid()),
                None => Ok(0),
            }
        };

        Ok(Self {
            major: component(1)?,
            minor: component(2)?,
            patch: component(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        assert_eq!("2.8.10".parse::<AgentVersion>().unwrap(), AgentVersion::new(2, 8, 10));
        assert_eq!("2.9".parse::<AgentVersion>().unwrap(), AgentVersion::new(2, 9, 0));
        assert_eq!(
            "3.1.6.1".parse::<AgentVersion>().unwrap(),
            AgentVersion::new(3, 1, 6)
        );
        assert_eq!(
            "2.9-beta1".parse::<AgentVersion>().unwrap(),
            AgentVersion::new(2, 9, 0)
        );
    }

    #[test]
    fn test_invalid_version_is_version_error() {
        for raw in ["", "latest", "v2.9.1", "2"] {
            let err = raw.parse::<AgentVersion>().unwrap_err();
            assert_eq!(err.code(), "VERSION", "{raw}");
        }
    }

    #[test]
    fn test_ordering() {
        let min = AgentVersion::new(2, 8, 10);
        assert!(AgentVersion::new(2, 8, 9) < min);
        assert!(AgentVersion::new(2, 8, 10) >= min);
        assert!(AgentVersion::new(2, 9, 0) > min);
        assert!(AgentVersion::new(3, 0, 0) > min);
    }
}
