//! Long-running operation polling.

use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::ArmClient;
use super::models::OperationStatus;
use crate::error::CloudError;

/// Upper bound on a backend-requested polling delay.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// An operation the backend accepted but has not finished.
pub(crate) struct Operation {
    pub(crate) client: ArmClient,
    /// `Azure-AsyncOperation` status URL.
    pub(crate) async_url: Option<String>,
    /// `Location` URL.
    pub(crate) location_url: Option<String>,
    /// Resource to read once the operation succeeded.
    pub(crate) resource_url: Option<String>,
    pub(crate) retry_after: Option<Duration>,
}

enum State<T> {
    Done(T),
    InProgress(Operation),
}

/// Handle on a started long-running operation.
pub struct Poller<T> {
    state: State<T>,
}

impl<T: DeserializeOwned> Poller<T> {
    /// A poller for an operation that already completed with `value`.
    pub fn done(value: T) -> Self {
        Self {
            state: State::Done(value),
        }
    }

    pub(crate) fn in_progress(operation: Operation) -> Self {
        Self {
            state: State::InProgress(operation),
        }
    }

    /// Whether the operation completed without polling.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done(_))
    }

    /// Poll until the operation reaches a terminal state.
    ///
    /// # Errors
    /// Returns [`CloudError::OperationFailed`] if the operation failed or was
    /// canceled by the backend and [`CloudError::Cancelled`] if `cancel` fires
    /// first.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<T, CloudError> {
        match self.state {
            State::Done(value) => Ok(value),
            State::InProgress(operation) => operation.wait(cancel).await,
        }
    }
}

impl Operation {
    async fn wait<T: DeserializeOwned>(mut self, cancel: &CancellationToken) -> Result<T, CloudError> {
        loop {
            let delay = self
                .retry_after
                .unwrap_or_else(|| self.client.poll_interval())
                .min(MAX_RETRY_AFTER);
            tokio::select! {
                () = cancel.cancelled() => return Err(CloudError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            if self.poll_once().await? {
                break;
            }
        }

        match &self.resource_url {
            Some(url) => {
                let response = self.client.send(Method::GET, url, None).await?;
                if response.status.is_success() {
                    response.json()
                } else {
                    Err(response.into_error())
                }
            }
            None => Ok(serde_json::from_value(serde_json::Value::Null)?),
        }
    }

    /// Poll once. Returns `true` once the operation succeeded.
    async fn poll_once(&mut self) -> Result<bool, CloudError> {
        if let Some(url) = &self.async_url {
            let response = self.client.send(Method::GET, url, None).await?;
            if !response.status.is_success() {
                return Err(response.into_error());
            }
            self.retry_after = response.retry_after();
            let status: OperationStatus = response.json()?;
            debug!(status = %status.status, "Long-running operation status");
            match status.status.as_str() {
                "Succeeded" => return Ok(true),
                "Failed" | "Canceled" | "Cancelled" => {}
                _ => return Ok(false),
            }
            let (code, message) = status
                .error
                .map(|e| (e.code, e.message.unwrap_or_default()))
                .unwrap_or_default();
            return Err(CloudError::OperationFailed {
                status: status.status,
                code,
                message,
            });
        }

        let Some(url) = self.location_url.clone() else {
            return Ok(true);
        };
        let response = self.client.send(Method::GET, &url, None).await?;
        match response.status {
            StatusCode::ACCEPTED => {
                self.retry_after = response.retry_after();
                if let Some(next) = response.header(LOCATION.as_str()) {
                    self.location_url = Some(next);
                }
                Ok(false)
            }
            StatusCode::NOT_FOUND if self.resource_url.is_none() => Ok(true),
            status if status.is_success() => Ok(true),
            _ => Err(response.into_error()),
        }
    }
}
