//! Azure Resource Manager client implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::auth::{self, StaticToken, TokenSource};
use super::models::{
    AgreementTerms, CloudErrorBody, Disk, NetworkInterface, QueryRequest, QueryResponse, Subnet,
    VirtualMachine, VirtualMachineImage, VirtualMachineImageResource, VirtualMachineUpdate,
};
use super::poller::{Operation, Poller};
use super::{
    DisksApi, MarketplaceAgreementsApi, NetworkInterfacesApi, ResourceGraphApi,
    ResourceGroupsApi, SubnetsApi, VirtualMachineImagesApi, VirtualMachinesApi,
};
use crate::config::{ConnectConfig, DriverConfig};
use crate::error::CloudError;

/// Azure API version for Compute virtual machines and images.
const COMPUTE_API_VERSION: &str = "2024-03-01";

/// Azure API version for managed disks.
const DISK_API_VERSION: &str = "2023-04-02";

/// Azure API version for Network.
const NETWORK_API_VERSION: &str = "2023-09-01";

/// Azure API version for resource groups.
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Azure API version for Resource Graph.
const RESOURCE_GRAPH_API_VERSION: &str = "2022-10-01";

/// Azure API version for Marketplace Ordering.
const MARKETPLACE_API_VERSION: &str = "2021-01-01";

/// Header carrying the operation status URL of a long-running operation.
const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// Header carrying the backend request ID.
const REQUEST_ID: &str = "x-ms-request-id";

/// Header carrying the backend correlation ID.
const CORRELATION_ID: &str = "x-ms-correlation-request-id";

/// A fully read HTTP response.
pub(crate) struct RawResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: String,
}

impl RawResponse {
    pub(crate) fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// `Retry-After` in seconds, if the backend sent one.
    pub(crate) fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Turn a non-success response into a [`CloudError::Api`].
    pub(crate) fn into_error(self) -> CloudError {
        let detail = serde_json::from_str::<CloudErrorBody>(&self.body)
            .ok()
            .and_then(|body| body.error);
        let request_id = self.header(REQUEST_ID);
        let correlation_id = self.header(CORRELATION_ID);
        let (code, message) = match detail {
            Some(detail) => (detail.code, detail.message.unwrap_or_default()),
            None => (None, self.body),
        };
        CloudError::Api {
            status: self.status.as_u16(),
            code,
            message,
            request_id,
            correlation_id,
        }
    }

    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T, CloudError> {
        serde_json::from_str(&self.body).map_err(|e| {
            warn!(error = %e, body = %self.body, "Failed to parse response");
            CloudError::Serialization(e)
        })
    }
}

/// Azure Resource Manager client.
#[derive(Clone)]
pub struct ArmClient {
    /// HTTP client.
    client: Client,
    /// Resource Manager endpoint, without trailing slash.
    endpoint: String,
    /// Subscription ID.
    subscription_id: String,
    /// Bearer token source.
    credential: Arc<dyn TokenSource>,
    /// Default interval between long-running operation polls.
    poll_interval: Duration,
}

impl ArmClient {
    /// Create a new client.
    #[must_use]
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        credential: Arc<dyn TokenSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            credential,
            poll_interval,
        }
    }

    /// Create a client authenticated with the credential in `connect`.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn from_connect_config(
        connect: &ConnectConfig,
        config: &DriverConfig,
    ) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(CloudError::Http)?;
        let credential = auth::token_source(client.clone(), connect);

        Ok(Self::new(
            client,
            connect.cloud.resource_manager_endpoint(),
            connect.subscription_id.clone(),
            credential,
            config.poll_interval,
        ))
    }

    /// Create a client with a fixed bearer token against `endpoint`.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn with_static_token(
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        token: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self, CloudError> {
        let client = Client::builder().build().map_err(CloudError::Http)?;
        Ok(Self::new(
            client,
            endpoint,
            subscription_id,
            Arc::new(StaticToken(token.into())),
            poll_interval,
        ))
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Build an absolute URL for `path` with `api-version` and extra query pairs.
    fn url(&self, path: &str, api_version: &str, extra: &[(&str, &str)]) -> Result<String, CloudError> {
        let mut url = Url::parse(&format!("{}{path}", self.endpoint))
            .map_err(|e| CloudError::Config(format!("invalid request URL for {path}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api-version", api_version)
            .extend_pairs(extra);
        Ok(url.into())
    }

    /// Path of a resource group in the client's subscription.
    fn resource_group_path(&self, resource_group: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{resource_group}",
            self.subscription_id
        )
    }

    fn vm_url(&self, resource_group: &str, name: &str) -> Result<String, CloudError> {
        self.url(
            &format!(
                "{}/providers/Microsoft.Compute/virtualMachines/{name}",
                self.resource_group_path(resource_group)
            ),
            COMPUTE_API_VERSION,
            &[],
        )
    }

    fn nic_url(&self, resource_group: &str, name: &str) -> Result<String, CloudError> {
        self.url(
            &format!(
                "{}/providers/Microsoft.Network/networkInterfaces/{name}",
                self.resource_group_path(resource_group)
            ),
            NETWORK_API_VERSION,
            &[],
        )
    }

    fn disk_url(&self, resource_group: &str, name: &str) -> Result<String, CloudError> {
        self.url(
            &format!(
                "{}/providers/Microsoft.Compute/disks/{name}",
                self.resource_group_path(resource_group)
            ),
            DISK_API_VERSION,
            &[],
        )
    }

    fn agreement_url(&self, publisher: &str, offer: &str, plan: &str) -> Result<String, CloudError> {
        self.url(
            &format!(
                "/subscriptions/{}/providers/Microsoft.MarketplaceOrdering/offerTypes/virtualmachine/publishers/{publisher}/offers/{offer}/plans/{plan}/agreements/current",
                self.subscription_id
            ),
            MARKETPLACE_API_VERSION,
            &[],
        )
    }

    fn image_versions_path(&self, location: &str, publisher: &str, offer: &str, sku: &str) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Compute/locations/{location}/publishers/{publisher}/artifacttypes/vmimage/offers/{offer}/skus/{sku}/versions",
            self.subscription_id
        )
    }

    /// Send an authenticated request and read the whole response.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<RawResponse, CloudError> {
        debug!(method = %method, url = %url, "ARM request");

        let token = self.credential.token().await?;
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {token}"));
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        debug!(status = status.as_u16(), url = %url, "ARM response");

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    /// Make an authenticated GET request.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        let response = self.send(Method::GET, url, None).await?;
        if response.status.is_success() {
            response.json()
        } else {
            Err(response.into_error())
        }
    }

    /// Make an authenticated request with a JSON body and a JSON response.
    async fn send_json<T, B>(&self, method: Method, url: &str, body: &B) -> Result<T, CloudError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let body = serde_json::to_value(body)?;
        let response = self.send(method, url, Some(&body)).await?;
        if response.status.is_success() {
            response.json()
        } else {
            Err(response.into_error())
        }
    }

    /// Start a long-running operation.
    ///
    /// A `DELETE` of an absent resource completes immediately. Creations and
    /// updates are finished by re-reading the resource at `url`.
    async fn begin<T, B>(
        &self,
        method: Method,
        url: String,
        body: Option<&B>,
    ) -> Result<Poller<T>, CloudError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let is_delete = method == Method::DELETE;
        let body = body.map(serde_json::to_value).transpose()?;
        let response = self.send(method, &url, body.as_ref()).await?;

        if is_delete && response.status == StatusCode::NOT_FOUND {
            return Ok(Poller::done(serde_json::from_value(serde_json::Value::Null)?));
        }
        if !response.status.is_success() {
            return Err(response.into_error());
        }

        let async_url = response.header(AZURE_ASYNC_OPERATION);
        if response.status == StatusCode::ACCEPTED || async_url.is_some() {
            return Ok(Poller::in_progress(Operation {
                client: self.clone(),
                async_url,
                location_url: response.header(LOCATION.as_str()),
                resource_url: (!is_delete).then_some(url),
                retry_after: response.retry_after(),
            }));
        }

        if is_delete {
            Ok(Poller::done(serde_json::from_value(serde_json::Value::Null)?))
        } else {
            Ok(Poller::done(response.json()?))
        }
    }
}

#[async_trait]
impl VirtualMachinesApi for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<VirtualMachine, CloudError> {
        self.get_json(&self.vm_url(resource_group, name)?).await
    }

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<Poller<VirtualMachine>, CloudError> {
        self.begin(Method::PUT, self.vm_url(resource_group, name)?, Some(vm))
            .await
    }

    async fn begin_update(
        &self,
        resource_group: &str,
        name: &str,
        update: &VirtualMachineUpdate,
    ) -> Result<Poller<VirtualMachine>, CloudError> {
        self.begin(Method::PATCH, self.vm_url(resource_group, name)?, Some(update))
            .await
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Poller<()>, CloudError> {
        self.begin::<(), ()>(Method::DELETE, self.vm_url(resource_group, name)?, None)
            .await
    }
}

#[async_trait]
impl NetworkInterfacesApi for ArmClient {
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<NetworkInterface, CloudError> {
        self.get_json(&self.nic_url(resource_group, name)?).await
    }

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<Poller<NetworkInterface>, CloudError> {
        self.begin(Method::PUT, self.nic_url(resource_group, name)?, Some(nic))
            .await
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Poller<()>, CloudError> {
        self.begin::<(), ()>(Method::DELETE, self.nic_url(resource_group, name)?, None)
            .await
    }
}

#[async_trait]
impl DisksApi for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Disk, CloudError> {
        self.get_json(&self.disk_url(resource_group, name)?).await
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Poller<()>, CloudError> {
        self.begin::<(), ()>(Method::DELETE, self.disk_url(resource_group, name)?, None)
            .await
    }
}

#[async_trait]
impl ResourceGroupsApi for ArmClient {
    async fn check_existence(&self, resource_group: &str) -> Result<bool, CloudError> {
        let url = self.url(
            &format!("/subscriptions/{}/resourcegroups/{resource_group}", self.subscription_id),
            RESOURCES_API_VERSION,
            &[],
        )?;
        let response = self.send(Method::HEAD, &url, None).await?;
        match response.status {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(response.into_error()),
        }
    }
}

#[async_trait]
impl SubnetsApi for ArmClient {
    async fn get(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<Subnet, CloudError> {
        let url = self.url(
            &format!(
                "{}/providers/Microsoft.Network/virtualNetworks/{vnet_name}/subnets/{subnet_name}",
                self.resource_group_path(resource_group)
            ),
            NETWORK_API_VERSION,
            &[],
        )?;
        self.get_json(&url).await
    }
}

#[async_trait]
impl ResourceGraphApi for ArmClient {
    async fn resources(&self, request: &QueryRequest) -> Result<QueryResponse, CloudError> {
        let url = self.url(
            "/providers/Microsoft.ResourceGraph/resources",
            RESOURCE_GRAPH_API_VERSION,
            &[],
        )?;
        self.send_json(Method::POST, &url, request).await
    }
}

#[async_trait]
impl MarketplaceAgreementsApi for ArmClient {
    async fn get(
        &self,
        publisher: &str,
        offer: &str,
        plan: &str,
    ) -> Result<AgreementTerms, CloudError> {
        self.get_json(&self.agreement_url(publisher, offer, plan)?)
            .await
    }

    async fn create(
        &self,
        publisher: &str,
        offer: &str,
        plan: &str,
        terms: &AgreementTerms,
    ) -> Result<AgreementTerms, CloudError> {
        let url = self.agreement_url(publisher, offer, plan)?;
        self.send_json(Method::PUT, &url, terms).await
    }
}

#[async_trait]
impl VirtualMachineImagesApi for ArmClient {
    async fn get(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
        version: &str,
    ) -> Result<VirtualMachineImage, CloudError> {
        let url = self.url(
            &format!(
                "{}/{version}",
                self.image_versions_path(location, publisher, offer, sku)
            ),
            COMPUTE_API_VERSION,
            &[],
        )?;
        self.get_json(&url).await
    }

    async fn list_versions(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
    ) -> Result<Vec<VirtualMachineImageResource>, CloudError> {
        let url = self.url(
            &self.image_versions_path(location, publisher, offer, sku),
            COMPUTE_API_VERSION,
            &[],
        )?;
        self.get_json(&url).await
    }
}
