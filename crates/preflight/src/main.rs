//! preflight: check whether Juju units can be rebooted or shut down
//!
//! # Usage
//!
//! ```bash
//! # Verify a reboot of two compute units
//! preflight reboot --units nova-compute/0 nova-compute/1
//!
//! # Verify shutting down everything on machines 3 and 4, JSON report
//! preflight shutdown --machines 3 4 --json
//!
//! # Locally built charm deployed under another name
//! preflight reboot -u canary/0 --map-charm canary:nova-compute
//! ```
//!
//! Exit status: 0 when every check passed (warnings allowed), 1 when any
//! check failed or is unsupported, 2 when verification could not run.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use preflight::{Args, JujuCli};
use verification::{Dispatcher, Session};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.filter().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Verification could not run");
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let charm_map = args.charm_map().context("Invalid charm mapping")?;
    let juju = JujuCli::new(args.juju_config());
    info!(
        bin = %juju.config().bin.display(),
        model = juju.config().model.as_deref().unwrap_or("<current>"),
        check = %args.check,
        "Preflight starting"
    );

    let session = Arc::new(Session::new(Arc::new(juju), args.session_config()));
    let dispatcher = Dispatcher::connect(session, charm_map)
        .await
        .context("Failed to load model status")?;

    let report = dispatcher
        .run(&args.target(), &args.check, args.stop_on_failure)
        .await
        .context("Failed to start verification")?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{json}");
    } else {
        print!("{report}");
    }

    info!(
        session = %report.session_id,
        success = report.success(),
        "Preflight finished"
    );
    // exit codes are 0 or 1 here
    Ok(ExitCode::from(report.exit_code() as u8))
}
