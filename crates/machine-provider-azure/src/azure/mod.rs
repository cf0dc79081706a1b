//! Azure Resource Manager REST layer.
//!
//! One trait per resource type, each covering only the operations the
//! machine lifecycle needs. [`ArmClient`] implements all of them over HTTP;
//! tests substitute an in-memory backend.
//!
//! ## API surface
//!
//! - **Compute**: virtual machines (get, create, update, delete), disks
//!   (get, delete), marketplace VM images (get, list versions)
//! - **Network**: network interfaces (get, create, delete), subnets (get)
//! - **Resources**: resource group existence, Resource Graph queries
//! - **Marketplace ordering**: agreement terms (get, accept)

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConnectConfig, DriverConfig};
use crate::error::CloudError;

pub mod auth;
mod client;
mod models;
mod poller;

pub use client::ArmClient;
pub use models::*;
pub use poller::Poller;

/// Virtual machine operations.
#[async_trait]
pub trait VirtualMachinesApi: Send + Sync {
    /// Get a VM.
    async fn get(&self, resource_group: &str, name: &str) -> Result<VirtualMachine, CloudError>;

    /// Start creating or replacing a VM.
    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<Poller<VirtualMachine>, CloudError>;

    /// Start a partial update of a VM.
    async fn begin_update(
        &self,
        resource_group: &str,
        name: &str,
        update: &VirtualMachineUpdate,
    ) -> Result<Poller<VirtualMachine>, CloudError>;

    /// Start deleting a VM.
    async fn begin_delete(&self, resource_group: &str, name: &str)
        -> Result<Poller<()>, CloudError>;
}

/// Network interface operations.
#[async_trait]
pub trait NetworkInterfacesApi: Send + Sync {
    /// Get a NIC.
    async fn get(&self, resource_group: &str, name: &str)
        -> Result<NetworkInterface, CloudError>;

    /// Start creating or replacing a NIC.
    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<Poller<NetworkInterface>, CloudError>;

    /// Start deleting a NIC.
    async fn begin_delete(&self, resource_group: &str, name: &str)
        -> Result<Poller<()>, CloudError>;
}

/// Managed disk operations.
#[async_trait]
pub trait DisksApi: Send + Sync {
    /// Get a disk.
    async fn get(&self, resource_group: &str, name: &str) -> Result<Disk, CloudError>;

    /// Start deleting a disk.
    async fn begin_delete(&self, resource_group: &str, name: &str)
        -> Result<Poller<()>, CloudError>;
}

/// Resource group operations.
#[async_trait]
pub trait ResourceGroupsApi: Send + Sync {
    /// Whether the resource group exists.
    async fn check_existence(&self, resource_group: &str) -> Result<bool, CloudError>;
}

/// Subnet operations.
#[async_trait]
pub trait SubnetsApi: Send + Sync {
    /// Get a subnet of a virtual network.
    async fn get(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<Subnet, CloudError>;
}

/// Resource Graph operations.
#[async_trait]
pub trait ResourceGraphApi: Send + Sync {
    /// Run one page of a query.
    async fn resources(&self, request: &QueryRequest) -> Result<QueryResponse, CloudError>;
}

/// Marketplace agreement operations.
#[async_trait]
pub trait MarketplaceAgreementsApi: Send + Sync {
    /// Get the current agreement for a plan.
    async fn get(
        &self,
        publisher: &str,
        offer: &str,
        plan: &str,
    ) -> Result<AgreementTerms, CloudError>;

    /// Create or replace the agreement for a plan.
    async fn create(
        &self,
        publisher: &str,
        offer: &str,
        plan: &str,
        terms: &AgreementTerms,
    ) -> Result<AgreementTerms, CloudError>;
}

/// Marketplace VM image operations.
#[async_trait]
pub trait VirtualMachineImagesApi: Send + Sync {
    /// Get one image version.
    async fn get(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
        version: &str,
    ) -> Result<VirtualMachineImage, CloudError>;

    /// List all versions of an image SKU.
    async fn list_versions(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
    ) -> Result<Vec<VirtualMachineImageResource>, CloudError>;
}

/// Every resource API a request needs, sharing one authenticated backend.
#[derive(Clone)]
pub struct Clients {
    pub subscription_id: String,
    pub virtual_machines: Arc<dyn VirtualMachinesApi>,
    pub network_interfaces: Arc<dyn NetworkInterfacesApi>,
    pub disks: Arc<dyn DisksApi>,
    pub resource_groups: Arc<dyn ResourceGroupsApi>,
    pub subnets: Arc<dyn SubnetsApi>,
    pub resource_graph: Arc<dyn ResourceGraphApi>,
    pub marketplace_agreements: Arc<dyn MarketplaceAgreementsApi>,
    pub virtual_machine_images: Arc<dyn VirtualMachineImagesApi>,
}

impl Clients {
    /// Serve every resource API from one backend.
    pub fn from_backend<B>(subscription_id: impl Into<String>, backend: Arc<B>) -> Self
    where
        B: VirtualMachinesApi
            + NetworkInterfacesApi
            + DisksApi
            + ResourceGroupsApi
            + SubnetsApi
            + ResourceGraphApi
            + MarketplaceAgreementsApi
            + VirtualMachineImagesApi
            + 'static,
    {
        Self {
            subscription_id: subscription_id.into(),
            virtual_machines: backend.clone(),
            network_interfaces: backend.clone(),
            disks: backend.clone(),
            resource_groups: backend.clone(),
            subnets: backend.clone(),
            resource_graph: backend.clone(),
            marketplace_agreements: backend.clone(),
            virtual_machine_images: backend,
        }
    }
}

/// Builds authenticated [`Clients`] for a request's credentials.
pub trait ClientFactory: Send + Sync {
    /// Create clients for `connect`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    fn clients(&self, connect: &ConnectConfig) -> Result<Clients, CloudError>;
}

/// Factory producing [`ArmClient`]-backed clients.
#[derive(Debug, Clone, Default)]
pub struct ArmClientFactory {
    config: DriverConfig,
}

impl ArmClientFactory {
    /// Create a factory using `config` for HTTP and polling settings.
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for ArmClientFactory {
    fn clients(&self, connect: &ConnectConfig) -> Result<Clients, CloudError> {
        let client = ArmClient::from_connect_config(connect, &self.config)?;
        Ok(Clients::from_backend(
            connect.subscription_id.clone(),
            Arc::new(client),
        ))
    }
}
