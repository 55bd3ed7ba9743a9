use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser, ValueEnum};
use verification::{CharmMap, SessionConfig, Target, VerifyResult};

/// Verbosity selected with `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Everything, including dependency crates
    Trace,
    /// Debug output of this tool only
    Debug,
    Info,
}

impl LogLevel {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub fn filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "info,preflight=debug,verification=debug",
            Self::Info => "info",
        }
    }
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["units", "machines"])))]
pub struct Args {
    /// Check to run: reboot or shutdown
    pub check: String,

    /// Units to verify
    #[arg(short, long, num_args = 1..)]
    pub units: Vec<String>,

    /// Machines whose principal units are verified
    #[arg(short, long, num_args = 1..)]
    pub machines: Vec<String>,

    /// Model to connect to (overrides PREFLIGHT_JUJU_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Stop each verifier at its first failing check
    #[arg(short, long, default_value_t = false)]
    pub stop_on_failure: bool,

    /// Treat an application as deployed from a known charm, e.g. `nova-canary:nova-compute`
    #[arg(long = "map-charm", value_name = "APP:CHARM")]
    pub map_charm: Vec<String>,

    /// Timeout for a single action, in seconds (overrides PREFLIGHT_ACTION_TIMEOUT_SECS)
    #[arg(long, value_name = "SECS")]
    pub action_timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl Args {
    pub fn target(&self) -> Target {
        if self.units.is_empty() {
            Target::Machines(self.machines.clone())
        } else {
            Target::Units(self.units.clone())
        }
    }

    pub fn charm_map(&self) -> VerifyResult<CharmMap> {
        let mut map = CharmMap::new();
        for pair in &self.map_charm {
            map.parse(pair)?;
        }
        Ok(map)
    }

    pub fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::default();
        match self.action_timeout {
            Some(secs) => config.with_action_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }

    pub fn juju_config(&self) -> JujuConfig {
        let mut config = JujuConfig::default();
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        config
    }
}

/// How the `juju` client is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JujuConfig {
    pub bin: PathBuf,
    /// Model name; the client's current model when unset
    pub model: Option<String>,
    /// Upper bound for `status` and `actions` calls
    pub command_timeout: Duration,
}

impl Default for JujuConfig {
    fn default() -> Self {
        Self {
            bin: std::env::var("PREFLIGHT_JUJU_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("juju")),
            model: std::env::var("PREFLIGHT_JUJU_MODEL").ok(),
            command_timeout: Duration::from_secs(
                std::env::var("PREFLIGHT_JUJU_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }
}
