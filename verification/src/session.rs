//! Verification session
//!
//! A [`Session`] lives for one CLI invocation. It owns the platform handle
//! and the [`ActionCache`], and is shared (behind an `Arc`) by every verifier
//! task spawned for that invocation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{ActionCache, ActionKey, CacheStats};
use crate::error::{VerifyError, VerifyResult};
use crate::platform::{ActionOutput, ActionParams, ModelSnapshot, Platform};

/// Session-wide settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for a single remote action
    pub action_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            // PREFLIGHT_ACTION_TIMEOUT_SECS: Seconds to wait for one action
            action_timeout: std::env::var("PREFLIGHT_ACTION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(120)),
        }
    }
}

impl SessionConfig {
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }
}

pub struct Session {
    id: Uuid,
    platform: Arc<dyn Platform>,
    cache: ActionCache,
    config: SessionConfig,
}

impl Session {
    pub fn new(platform: Arc<dyn Platform>, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            cache: ActionCache::new(),
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> VerifyResult<ModelSnapshot> {
        self.platform
            .snapshot()
            .await
            .map_err(|e| VerifyError::transport("model status", e.to_string()))
    }

    /// Names of the actions an application's charm exposes
    pub async fn application_actions(&self, application: &str) -> VerifyResult<Vec<String>> {
        self.platform
            .application_actions(application)
            .await
            .map_err(|e| VerifyError::transport(application, e.to_string()))
    }

    /// Run an action through the session cache.
    pub async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> VerifyResult<ActionOutput> {
        let key = ActionKey::new(unit, action, params.clone());
        self.cache
            .get_or_run(key, self.config.action_timeout, || self.invoke(unit, action, params))
            .await
    }

    /// Run an action bypassing the cache. Used where the output must reflect
    /// the cluster state at the time of the check.
    pub async fn run_action_uncached(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> VerifyResult<ActionOutput> {
        let timeout = self.config.action_timeout;
        match tokio::time::timeout(timeout, self.invoke(unit, action, params)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(VerifyError::timeout(unit, action, timeout)),
        }
    }

    /// Run the same action on several units concurrently.
    ///
    /// Outputs are returned in the order of `units`. If any unit fails, the
    /// first failure in that order is returned.
    pub async fn run_action_on_units(
        &self,
        units: &[String],
        action: &str,
        params: &ActionParams,
        cached: bool,
    ) -> VerifyResult<Vec<(String, ActionOutput)>> {
        let calls = units.iter().map(|unit| async move {
            let outcome = if cached {
                self.run_action(unit, action, params).await
            } else {
                self.run_action_uncached(unit, action, params).await
            };
            outcome.map(|out| (unit.clone(), out))
        });

        join_all(calls).await.into_iter().collect()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    async fn invoke(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> VerifyResult<ActionOutput> {
        let output = self
            .platform
            .run_action(unit, action, params, self.config.action_timeout)
            .await
            .map_err(|e| {
                warn!(unit = %unit, action = %action, error = %e, "Action call failed");
                VerifyError::transport(unit, e.to_string())
            })?;

        debug!(
            unit = %unit,
            action = %action,
            id = %output.id,
            status = %output.status,
            "Action finished"
        );

        if !output.is_completed() {
            return Err(VerifyError::ActionFailed {
                unit: unit.to_string(),
                action: action.to_string(),
                id: output.id,
                status: output.status,
            });
        }

        Ok(output)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
