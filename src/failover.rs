//! `FailoverExecutor` (§4.2, C2): runs one logical operation against an
//! ordered replica list, advancing on fail-overable errors until success or
//! exhaustion.

use crate::error::{Error, Result};
use crate::model::Replica;
use crate::replica_registry::ReplicaRegistry;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

pub struct FailoverExecutor<'a> {
    registry: &'a ReplicaRegistry,
    request_tracing_enabled: bool,
}

impl<'a> FailoverExecutor<'a> {
    #[must_use]
    pub const fn new(registry: &'a ReplicaRegistry, request_tracing_enabled: bool) -> Self {
        Self { registry, request_tracing_enabled }
    }

    /// Iterate `replicas` in order, invoking `op`. On success, marks that
    /// replica healthy and returns. On a fail-overable error, advances to the
    /// next replica. On a non-fail-overable error, marks that replica failed
    /// and rethrows immediately. If every replica is exhausted, marks all of
    /// them failed (so all enter cooldown) and rethrows the last error.
    /// Honors `cancel` between attempts. When `request_tracing_enabled`, each
    /// attempt runs inside a span naming the replica endpoint and `operation`.
    pub async fn execute<T, F, Fut>(
        &self,
        replicas: &[Replica],
        cancel: &CancellationToken,
        operation: &str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(Replica) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if replicas.is_empty() {
            return Err(Error::Transient("no available replicas".into()));
        }

        let mut last_err: Option<Error> = None;

        for (idx, replica) in replicas.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let attempt = op(replica.clone());
            let outcome = if self.request_tracing_enabled {
                let span = info_span!("replica_attempt", endpoint = %replica.endpoint, operation);
                attempt.instrument(span).await
            } else {
                attempt.await
            };

            match outcome {
                Ok(value) => {
                    self.registry.mark_result(&replica.endpoint, true).await;
                    return Ok(value);
                }
                Err(err) if err.is_failoverable() => {
                    self.registry.mark_result(&replica.endpoint, false).await;
                    if let Some(next) = replicas.get(idx + 1) {
                        info!(from = replica.endpoint, to = next.endpoint, "failing over to next replica");
                    }
                    last_err = Some(err);
                }
                Err(err) => {
                    self.registry.mark_result(&replica.endpoint, false).await;
                    return Err(err);
                }
            }
        }

        warn!(attempts = replicas.len(), "all replicas exhausted");
        Err(last_err.unwrap_or(Error::Transient("all replicas exhausted".into())))
    }
}
