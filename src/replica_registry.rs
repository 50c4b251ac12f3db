//! `ReplicaRegistry` (§4.1, C1): tracks replica endpoints, health, backoff
//! timestamps and sync tokens; orders replicas for dispatch.

use crate::backoff::BackoffSchedule;
use crate::model::Replica;
use rand::RngCore;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct ReplicaRegistry {
    replicas: RwLock<Vec<Replica>>,
    schedule: BackoffSchedule,
    rng: std::sync::Mutex<Box<dyn RngCore + Send>>,
}

impl ReplicaRegistry {
    #[must_use]
    pub fn new(endpoints: Vec<String>, schedule: BackoffSchedule) -> Self {
        Self::with_rng(endpoints, schedule, Box::new(rand::thread_rng()))
    }

    /// Construct with an injected RNG, used by tests that need deterministic
    /// cooldown jitter.
    #[must_use]
    pub fn with_rng(endpoints: Vec<String>, schedule: BackoffSchedule, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            replicas: RwLock::new(endpoints.into_iter().map(Replica::new).collect()),
            schedule,
            rng: std::sync::Mutex::new(rng),
        }
    }

    /// All configured replicas, in configured (preference) order.
    pub async fn all_replicas(&self) -> Vec<Replica> {
        self.replicas.read().await.clone()
    }

    /// Invariant 6: `replica.backoff_until > now` ⇒ excluded.
    pub async fn available_replicas(&self, now: Instant) -> Vec<Replica> {
        self.replicas
            .read()
            .await
            .iter()
            .filter(|r| r.backoff_until <= now)
            .cloned()
            .collect()
    }

    pub async fn mark_result(&self, endpoint: &str, success: bool) {
        let now = Instant::now();
        let mut replicas = self.replicas.write().await;
        let Some(replica) = replicas.iter_mut().find(|r| r.endpoint == endpoint) else {
            return;
        };
        if success {
            replica.consecutive_failures = 0;
            replica.backoff_until = now;
            debug!(endpoint, "replica marked healthy");
        } else {
            replica.consecutive_failures += 1;
            let cooldown = {
                let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                self.schedule.replica_cooldown(replica.consecutive_failures, &mut *rng)
            };
            replica.backoff_until = now + cooldown;
            warn!(endpoint, failures = replica.consecutive_failures, cooldown_secs = cooldown.as_secs(), "replica entering cooldown");
        }
    }

    /// Returns `false` if `endpoint` names no known replica; `true` otherwise
    /// after recording the token. Unknown endpoints must not mutate any
    /// replica state (sync-token isolation property).
    pub async fn update_sync_token(&self, endpoint: &str, token: String) -> bool {
        let mut replicas = self.replicas.write().await;
        let Some(replica) = replicas.iter_mut().find(|r| r.endpoint == endpoint) else {
            return false;
        };
        replica.sync_token = Some(token);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn registry(endpoints: &[&str]) -> ReplicaRegistry {
        ReplicaRegistry::with_rng(
            endpoints.iter().map(ToString::to_string).collect(),
            BackoffSchedule::default(),
            Box::new(StepRng::new(0, 1)),
        )
    }

    #[tokio::test]
    async fn available_excludes_backed_off_replicas() {
        let reg = registry(&["r1", "r2"]);
        reg.mark_result("r1", false).await;
        let available = reg.available_replicas(Instant::now()).await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].endpoint, "r2");
    }

    #[tokio::test]
    async fn success_resets_failure_count_and_cooldown() {
        let reg = registry(&["r1"]);
        reg.mark_result("r1", false).await;
        reg.mark_result("r1", false).await;
        reg.mark_result("r1", true).await;
        let all = reg.all_replicas().await;
        assert_eq!(all[0].consecutive_failures, 0);
        assert!(reg.available_replicas(Instant::now()).await.len() == 1);
    }

    #[tokio::test]
    async fn unknown_endpoint_sync_token_is_isolated() {
        let reg = registry(&["r1"]);
        let before = reg.all_replicas().await;
        assert!(!reg.update_sync_token("unknown", "tok".into()).await);
        let after = reg.all_replicas().await;
        assert_eq!(before[0].sync_token, after[0].sync_token);
    }

    #[tokio::test]
    async fn known_endpoint_sync_token_updates() {
        let reg = registry(&["r1"]);
        assert!(reg.update_sync_token("r1", "tok".into()).await);
        assert_eq!(reg.all_replicas().await[0].sync_token, Some("tok".to_string()));
    }
}
