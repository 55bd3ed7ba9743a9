//! Juju front end for the verification engine
//!
//! - [`config`]: command line arguments and Juju client settings
//! - [`juju`]: [`verification::Platform`] implementation backed by the `juju` CLI

pub mod config;
pub mod juju;

pub use config::{Args, JujuConfig, LogLevel};
pub use juju::JujuCli;
