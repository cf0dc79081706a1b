//! Azure AD token acquisition.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{ConnectConfig, Credential};
use crate::error::CloudError;

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 120;

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Source of bearer tokens for Azure Resource Manager.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a currently valid access token.
    async fn token(&self) -> Result<String, CloudError>;
}

/// A fixed token, for tests and pre-authenticated callers.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, CloudError> {
        Ok(self.0.clone())
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// OAuth2 client-credentials flow against Azure AD, with a client secret or
/// a federated workload identity token as the client proof.
pub struct ClientCredentialToken {
    client: Client,
    token_url: String,
    client_id: String,
    scope: String,
    proof: Credential,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialToken {
    /// Create a token source for `config`.
    #[must_use]
    pub fn new(client: Client, config: &ConnectConfig) -> Self {
        Self::with_endpoints(
            client,
            config,
            config.cloud.authority_host(),
            config.cloud.resource_manager_endpoint(),
        )
    }

    /// Create a token source against explicit authority and resource endpoints.
    #[must_use]
    pub fn with_endpoints(
        client: Client,
        config: &ConnectConfig,
        authority_host: &str,
        resource: &str,
    ) -> Self {
        Self {
            client,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                authority_host.trim_end_matches('/'),
                config.tenant_id
            ),
            client_id: config.client_id.clone(),
            scope: format!("{}/.default", resource.trim_end_matches('/')),
            proof: config.credential.clone(),
            cached: Mutex::new(None),
        }
    }

    async fn client_assertion(path: &Path) -> Result<String, CloudError> {
        tokio::fs::read_to_string(path)
            .await
            .map(|token| token.trim().to_string())
            .map_err(|e| {
                CloudError::Auth(format!(
                    "cannot read workload identity token file {}: {e}",
                    path.display()
                ))
            })
    }

    async fn fetch(&self) -> Result<CachedToken, CloudError> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.client_id.clone()),
            ("scope", self.scope.clone()),
        ];
        match &self.proof {
            Credential::ClientSecret(secret) => form.push(("client_secret", secret.clone())),
            Credential::WorkloadIdentity { token_file } => {
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                form.push(("client_assertion", Self::client_assertion(token_file).await?));
            }
        }

        debug!(url = %self.token_url, client_id = %self.client_id, "Requesting access token");

        let response = self.client.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CloudError::Auth(format!(
                "token endpoint returned {}: {text}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text)?;
        let lifetime = token.expires_in.unwrap_or(3600);
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentialToken {
    async fn token(&self) -> Result<String, CloudError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

/// Build the token source matching the credential in `config`.
#[must_use]
pub fn token_source(client: Client, config: &ConnectConfig) -> Arc<dyn TokenSource> {
    Arc::new(ClientCredentialToken::new(client, config))
}
