//! `PushIntake` (§4.8, C8): validates incoming push notifications, updates
//! the replica's sync token, and marks watchers dirty with a bounded random
//! delay to avoid thundering-herd refresh storms across many provider
//! instances reacting to the same notification.

use crate::error::{Error, Result};
use crate::replica_registry::ReplicaRegistry;
use crate::watcher_set::WatcherSet;
use rand::Rng;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct PushNotification {
    pub sync_token: String,
    pub event_type: String,
    pub resource_uri: String,
    #[serde(default)]
    pub max_delay: Option<Duration>,
}

impl PushNotification {
    fn validate(&self) -> Result<()> {
        if self.sync_token.is_empty() || self.event_type.is_empty() || self.resource_uri.is_empty() {
            return Err(Error::InvalidConfig("push notification missing a required field".into()));
        }
        Ok(())
    }
}

pub struct PushIntake<'a> {
    registry: &'a ReplicaRegistry,
    watchers: &'a WatcherSet,
}

impl<'a> PushIntake<'a> {
    #[must_use]
    pub fn new(registry: &'a ReplicaRegistry, watchers: &'a WatcherSet) -> Self {
        Self { registry, watchers }
    }

    /// §7 category 7: malformed notifications fail fast to the caller.
    pub async fn process(&self, notification: &PushNotification, rng: &mut impl Rng) -> Result<()> {
        notification.validate()?;

        if !self.registry.update_sync_token(&notification.resource_uri, notification.sync_token.clone()).await {
            warn!(endpoint = notification.resource_uri, "push notification from unknown replica, ignoring");
            return Ok(());
        }

        let max_delay = notification.max_delay.unwrap_or(DEFAULT_MAX_DELAY);
        let jitter = if max_delay.is_zero() { Duration::ZERO } else { rng.gen_range(Duration::ZERO..=max_delay) };
        let due_at = Instant::now() + jitter;

        info!(endpoint = notification.resource_uri, delay_ms = jitter.as_millis(), "push notification accelerated next refresh");
        self.watchers.mark_all_due(due_at).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffSchedule;
    use crate::model::Watcher;
    use rand::rngs::mock::StepRng;

    fn notification(uri: &str) -> PushNotification {
        PushNotification {
            sync_token: "tok".into(),
            event_type: "Modified".into(),
            resource_uri: uri.into(),
            max_delay: Some(Duration::ZERO),
        }
    }

    #[tokio::test]
    async fn missing_field_fails_fast() {
        let registry = ReplicaRegistry::new(vec!["r1".into()], BackoffSchedule::default());
        let watchers = WatcherSet::new(vec![], vec![]);
        let intake = PushIntake::new(&registry, &watchers);
        let mut rng = StepRng::new(0, 1);

        let mut bad = notification("r1");
        bad.sync_token = String::new();
        let result = intake.process(&bad, &mut rng).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn unknown_endpoint_does_not_mutate_watchers() {
        let registry = ReplicaRegistry::new(vec!["r1".into()], BackoffSchedule::default());
        let future = Instant::now() + Duration::from_secs(1000);
        let mut w = Watcher::new("k".into(), None, Duration::from_secs(30), false);
        w.next_due_at = future;
        let watchers = WatcherSet::new(vec![w], vec![]);
        let intake = PushIntake::new(&registry, &watchers);
        let mut rng = StepRng::new(0, 1);

        intake.process(&notification("unknown"), &mut rng).await.unwrap();

        assert!(watchers.expired_watchers(Instant::now()).await.is_empty());
    }

    #[tokio::test]
    async fn known_endpoint_accelerates_all_watchers() {
        let registry = ReplicaRegistry::new(vec!["r1".into()], BackoffSchedule::default());
        let future = Instant::now() + Duration::from_secs(1000);
        let mut w = Watcher::new("k".into(), None, Duration::from_secs(30), false);
        w.next_due_at = future;
        let watchers = WatcherSet::new(vec![w], vec![]);
        let intake = PushIntake::new(&registry, &watchers);
        let mut rng = StepRng::new(0, 1);

        intake.process(&notification("r1"), &mut rng).await.unwrap();

        assert_eq!(watchers.expired_watchers(Instant::now()).await.len(), 1);
        assert_eq!(registry.all_replicas().await[0].sync_token, Some("tok".to_string()));
    }
}
