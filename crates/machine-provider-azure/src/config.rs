//! Connection and driver configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MachineError;

/// Raw secret data as handed over by the calling layer.
pub type SecretData = HashMap<String, Vec<u8>>;

/// Secret keys, current name first, legacy alias second.
const SUBSCRIPTION_ID_KEYS: [&str; 2] = ["azureSubscriptionId", "subscriptionID"];
const TENANT_ID_KEYS: [&str; 2] = ["azureTenantId", "tenantID"];
const CLIENT_ID_KEYS: [&str; 2] = ["azureClientId", "clientID"];
const CLIENT_SECRET_KEYS: [&str; 2] = ["azureClientSecret", "clientSecret"];
const WORKLOAD_IDENTITY_TOKEN_FILE_KEY: &str = "workloadIdentityTokenFile";

/// Secret key holding cloud-init user data for new machines.
pub const USER_DATA_KEY: &str = "userData";

/// Azure cloud instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudEnvironment {
    /// Azure public cloud.
    #[default]
    AzurePublic,
    /// Azure US Government cloud.
    AzureGovernment,
    /// Azure China cloud (21Vianet).
    AzureChina,
}

impl CloudEnvironment {
    /// Azure Active Directory authority host.
    #[must_use]
    pub fn authority_host(self) -> &'static str {
        match self {
            Self::AzurePublic => "https://login.microsoftonline.com",
            Self::AzureGovernment => "https://login.microsoftonline.us",
            Self::AzureChina => "https://login.chinacloudapi.cn",
        }
    }

    /// Azure Resource Manager endpoint.
    #[must_use]
    pub fn resource_manager_endpoint(self) -> &'static str {
        match self {
            Self::AzurePublic => "https://management.azure.com",
            Self::AzureGovernment => "https://management.usgovcloudapi.net",
            Self::AzureChina => "https://management.chinacloudapi.cn",
        }
    }
}

/// How the driver proves its identity to Azure AD.
#[derive(Clone)]
pub enum Credential {
    /// Service principal client secret.
    ClientSecret(String),
    /// Federated token projected into a file (workload identity).
    WorkloadIdentity { token_file: PathBuf },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientSecret(_) => f.write_str("ClientSecret(<redacted>)"),
            Self::WorkloadIdentity { token_file } => f
                .debug_struct("WorkloadIdentity")
                .field("token_file", token_file)
                .finish(),
        }
    }
}

/// Everything needed to authenticate against one subscription.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Subscription ID.
    pub subscription_id: String,
    /// Tenant ID.
    pub tenant_id: String,
    /// Client (application) ID.
    pub client_id: String,
    /// Credential material.
    pub credential: Credential,
    /// Cloud instance to talk to.
    pub cloud: CloudEnvironment,
}

impl ConnectConfig {
    /// Build a connect config from secret data.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidArgument`] if a required key is missing
    /// or empty.
    pub fn from_secret(data: &SecretData, cloud: CloudEnvironment) -> Result<Self, MachineError> {
        let subscription_id = required(data, SUBSCRIPTION_ID_KEYS)?;
        let tenant_id = required(data, TENANT_ID_KEYS)?;
        let client_id = required(data, CLIENT_ID_KEYS)?;

        let credential = if let Some(secret) = lookup(data, CLIENT_SECRET_KEYS) {
            Credential::ClientSecret(secret)
        } else if let Some(path) = lookup(data, [WORKLOAD_IDENTITY_TOKEN_FILE_KEY; 2]) {
            Credential::WorkloadIdentity {
                token_file: PathBuf::from(path),
            }
        } else {
            return Err(MachineError::InvalidArgument(format!(
                "secret must contain either {} or {WORKLOAD_IDENTITY_TOKEN_FILE_KEY}",
                CLIENT_SECRET_KEYS[0]
            )));
        };

        Ok(Self {
            subscription_id,
            tenant_id,
            client_id,
            credential,
            cloud,
        })
    }
}

/// Read cloud-init user data from the secret.
///
/// # Errors
/// Returns [`MachineError::InvalidArgument`] if the key is missing or empty.
pub fn user_data(data: &SecretData) -> Result<String, MachineError> {
    required(data, [USER_DATA_KEY; 2])
}

fn lookup(data: &SecretData, keys: [&str; 2]) -> Option<String> {
    keys.iter()
        .filter_map(|key| data.get(*key))
        .map(|value| String::from_utf8_lossy(value).trim().to_string())
        .find(|value| !value.is_empty())
}

fn required(data: &SecretData, keys: [&str; 2]) -> Result<String, MachineError> {
    lookup(data, keys).ok_or_else(|| {
        MachineError::InvalidArgument(format!("secret is missing required key {}", keys[0]))
    })
}

/// Upper bounds for long-running backend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub vm_create: Duration,
    pub vm_update: Duration,
    pub vm_delete: Duration,
    pub nic_create: Duration,
    pub nic_delete: Duration,
    pub disk_delete: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            vm_create: Duration::from_secs(15 * 60),
            vm_update: Duration::from_secs(10 * 60),
            vm_delete: Duration::from_secs(15 * 60),
            nic_create: Duration::from_secs(15 * 60),
            nic_delete: Duration::from_secs(10 * 60),
            disk_delete: Duration::from_secs(10 * 60),
        }
    }
}

/// Driver-wide settings shared read-only by every request.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Per-operation timeouts.
    pub timeouts: OperationTimeouts,
    /// Interval between polls of a long-running operation when the backend
    /// does not send `Retry-After`.
    pub poll_interval: Duration,
    /// Timeout for a single HTTP round trip.
    pub request_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            timeouts: OperationTimeouts::default(),
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(pairs: &[(&str, &str)]) -> SecretData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_client_secret_credential() {
        let data = secret(&[
            ("azureSubscriptionId", "sub-1"),
            ("azureTenantId", "tenant-1"),
            ("azureClientId", "client-1"),
            ("azureClientSecret", "s3cr3t\n"),
        ]);
        let config = ConnectConfig::from_secret(&data, CloudEnvironment::AzurePublic).unwrap();
        assert_eq!(config.subscription_id, "sub-1");
        assert!(matches!(config.credential, Credential::ClientSecret(ref s) if s == "s3cr3t"));
        assert!(!format!("{config:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_legacy_keys_and_workload_identity() {
        let data = secret(&[
            ("subscriptionID", "sub-1"),
            ("tenantID", "tenant-1"),
            ("clientID", "client-1"),
            ("workloadIdentityTokenFile", "/var/run/secrets/token"),
        ]);
        let config = ConnectConfig::from_secret(&data, CloudEnvironment::AzureChina).unwrap();
        assert_eq!(config.tenant_id, "tenant-1");
        assert!(matches!(
            config.credential,
            Credential::WorkloadIdentity { ref token_file } if token_file.to_str() == Some("/var/run/secrets/token")
        ));
        assert_eq!(
            config.cloud.resource_manager_endpoint(),
            "https://management.chinacloudapi.cn"
        );
    }

    #[test]
    fn test_missing_keys_are_invalid_argument() {
        let data = secret(&[("azureSubscriptionId", "sub-1"), ("azureTenantId", "")]);
        let err = ConnectConfig::from_secret(&data, CloudEnvironment::AzurePublic).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("azureTenantId"));
    }

    #[test]
    fn test_no_credential_material() {
        let data = secret(&[
            ("azureSubscriptionId", "sub-1"),
            ("azureTenantId", "tenant-1"),
            ("azureClientId", "client-1"),
        ]);
        assert!(ConnectConfig::from_secret(&data, CloudEnvironment::AzurePublic).is_err());
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = OperationTimeouts::default();
        assert_eq!(timeouts.vm_create, Duration::from_secs(900));
        assert_eq!(timeouts.vm_update, Duration::from_secs(600));
        assert_eq!(timeouts.nic_delete, Duration::from_secs(600));
    }
}
