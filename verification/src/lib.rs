//! Pre-flight verification engine
//!
//! Decides whether a set of deployed units can be rebooted or shut down
//! without breaking the service they belong to.
//!
//! # Components
//!
//! - [`result`]: severities, partial results and verdict composition
//! - [`executor`]: runs a list of named checks into one verdict
//! - [`session`] / [`cache`]: per-invocation action cache over a [`Platform`]
//! - [`zone`]: storage capacity analysis over the Ceph CRUSH tree
//! - [`quorum`]: Raft fault tolerance analysis
//! - [`verifier`]: per-charm verifiers (nova-compute, ceph-osd, ceph-mon,
//!   neutron-gateway, ovn-central)
//! - [`dispatch`]: target resolution and concurrent verifier runs
//!
//! # Usage
//!
//! ```ignore
//! let session = Arc::new(Session::new(platform, SessionConfig::default()));
//! let dispatcher = Dispatcher::connect(session, CharmMap::new()).await?;
//! let report = dispatcher
//!     .run(&Target::Units(vec!["nova-compute/0".into()]), "reboot", false)
//!     .await?;
//! print!("{report}");
//! std::process::exit(report.exit_code());
//! ```

pub mod cache;
pub mod charm;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod platform;
pub mod quorum;
pub mod result;
pub mod session;
pub mod verifier;
pub mod version;
pub mod zone;

// Re-export result types
pub use result::{Partial, Severity, Verdict};

// Re-export error types
pub use error::{VerifyError, VerifyResult};

// Re-export platform boundary types
pub use platform::{
    params, ActionOutput, ActionParams, ApplicationInfo, MachineInfo, ModelSnapshot, Platform,
    PlatformError, UnitInfo,
};

// Re-export session types
pub use cache::{ActionCache, ActionKey, CacheStats};
pub use session::{Session, SessionConfig};

pub use executor::{run_checks, Check};

// Re-export analyzer types
pub use quorum::{ClusterQuorumState, ConsensusGroup, MemberView, Operation};
pub use zone::{check_capacity, RemovedUnit, StorageNode, ZoneTree};

pub use charm::{CharmMap, CheckKind, VerifierKind};
pub use dispatch::{Dispatcher, SessionReport, Target, VerifierOutcome, VerifierReport};
pub use verifier::Verifier;
pub use version::AgentVersion;
