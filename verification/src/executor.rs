//! Check executor
//!
//! Runs an ordered list of checks one after another and folds their verdicts
//! together. Check failures (see [`VerifyError::is_check_failure`]) become a
//! FAIL partial for the offending check; any other error aborts the run.

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::VerifyResult;
use crate::result::Verdict;

/// A named check that has not started yet.
///
/// A check resolving to `Ok(None)` or to an empty verdict is recorded as
/// passed.
pub struct Check<'a> {
    name: String,
    fut: BoxFuture<'a, VerifyResult<Option<Verdict>>>,
}

impl<'a> Check<'a> {
    pub fn new<F>(name: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = VerifyResult<Option<Verdict>>> + Send + 'a,
    {
        Self {
            name: name.into(),
            fut: Box::pin(fut),
        }
    }

    /// Check that always returns the given verdict
    pub fn ready(name: impl Into<String>, verdict: Verdict) -> Self {
        Self::new(name, async move { Ok(Some(verdict)) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Check<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// Run `checks` in order and combine their verdicts.
///
/// With `stop_on_failure`, execution stops right after the first check whose
/// own verdict is unsuccessful; that verdict is included in the result.
pub async fn run_checks(checks: Vec<Check<'_>>, stop_on_failure: bool) -> VerifyResult<Verdict> {
    let total = checks.len();
    let mut aggregate = Verdict::new();

    for (index, check) in checks.into_iter().enumerate() {
        let Check { name, fut } = check;
        debug!(check = %name, index, total, "Check started");

        let verdict = match fut.await {
            Ok(Some(verdict)) if !verdict.is_empty() => verdict,
            Ok(_) => Verdict::ok(format!("{name} check passed")),
            Err(e) if e.is_check_failure() => {
                warn!(check = %name, error = %e, "Check failed with error");
                Verdict::fail(format!("{name} check failed with error: {e}"))
            }
            Err(e) => {
                warn!(check = %name, error = %e, "Check aborted verification");
                return Err(e);
            }
        };

        let passed = verdict.success();
        debug!(check = %name, passed, partials = verdict.len(), "Check finished");
        aggregate += verdict;

        if !passed && stop_on_failure {
            debug!(check = %name, skipped = total - index - 1, "Stopping after failed check");
            break;
        }
    }

    Ok(aggregate)
}
