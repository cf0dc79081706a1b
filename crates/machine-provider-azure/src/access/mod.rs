//! Resource access layer.
//!
//! Wraps every backend call the orchestrators make with the same contract:
//!
//! - `get_*` returns `Ok(None)` when the backend reports the resource as
//!   absent
//! - `delete_*` succeeds when the resource is already gone
//! - long-running calls are awaited to a terminal state, bounded by a
//!   per-operation timeout and the caller's cancellation token
//! - every call is counted and timed, and failures are logged with the
//!   backend error code and request/correlation IDs

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::azure::Clients;
use crate::config::OperationTimeouts;
use crate::error::CloudError;
use crate::metrics::ApiMetrics;

mod disk;
mod graph;
mod group;
mod marketplace;
mod nic;
mod vm;

/// Instrumented access to the backend resources of one request.
#[derive(Clone)]
pub struct Access {
    clients: Clients,
    metrics: ApiMetrics,
    timeouts: OperationTimeouts,
}

impl Access {
    /// Create an access layer over `clients`.
    #[must_use]
    pub fn new(clients: Clients, metrics: ApiMetrics, timeouts: OperationTimeouts) -> Self {
        Self {
            clients,
            metrics,
            timeouts,
        }
    }

    /// Subscription the clients operate in.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.clients.subscription_id
    }

    /// Run `call`, racing it against `cancel`, and record its outcome.
    async fn observe<T, F>(
        &self,
        service: &'static str,
        resource: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, CloudError>
    where
        F: Future<Output = Result<T, CloudError>>,
    {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CloudError::Cancelled),
            result = call => result,
        };

        match &result {
            Ok(_) => self.metrics.record_success(service, started.elapsed()),
            Err(e) => {
                self.metrics.record_failure(service);
                let (request_id, correlation_id) = e.diagnostics();
                warn!(
                    service,
                    resource,
                    code = e.code().unwrap_or_default(),
                    request_id = request_id.unwrap_or_default(),
                    correlation_id = correlation_id.unwrap_or_default(),
                    error = %e,
                    "Azure API call failed"
                );
            }
        }
        result
    }

    /// Like [`Self::observe`], additionally bounded by `limit`.
    async fn observe_long_running<T, F>(
        &self,
        service: &'static str,
        resource: &str,
        cancel: &CancellationToken,
        limit: Duration,
        call: F,
    ) -> Result<T, CloudError>
    where
        F: Future<Output = Result<T, CloudError>>,
    {
        self.observe(service, resource, cancel, async {
            tokio::time::timeout(limit, call)
                .await
                .map_err(|_| CloudError::Timeout(limit.as_secs()))?
        })
        .await
    }
}

/// Turn a not-found response into `None`. A missing resource group stays an
/// error so callers can tell it apart from a missing resource.
fn absent_as_none<T>(result: Result<T, CloudError>) -> Result<Option<T>, CloudError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() && !e.is_resource_group_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Turn a not-found response into success.
fn absent_as_done(result: Result<(), CloudError>) -> Result<(), CloudError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
