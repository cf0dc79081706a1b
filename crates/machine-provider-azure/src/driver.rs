//! Driver entry points.
//!
//! Every call decodes and validates the machine class before touching the
//! backend, builds authenticated clients from the request's secret, and
//! delegates to provisioning, deprovisioning or discovery.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::PersistentVolumeSpec;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::access::Access;
use crate::azure::{ArmClientFactory, ClientFactory};
use crate::config::{self, ConnectConfig, DriverConfig, SecretData};
use crate::deprovision;
use crate::discovery;
use crate::error::MachineError;
use crate::metrics::ApiMetrics;
use crate::names::{provider_id, MachineInfo};
use crate::provision;
use crate::spec::ProviderSpec;

/// Provider name a machine class must carry.
pub const PROVIDER_NAME: &str = "Azure";

/// CSI driver name of Azure managed disks.
pub const AZURE_DISK_CSI_DRIVER: &str = "disk.csi.azure.com";

/// Machine class: provider name plus the raw provider spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineClass {
    /// Must be [`PROVIDER_NAME`].
    pub provider: String,
    /// Raw provider spec JSON.
    pub provider_spec: serde_json::Value,
}

/// Request to create a machine.
#[derive(Debug, Clone)]
pub struct CreateMachineRequest {
    pub machine_name: String,
    pub machine_class: MachineClass,
    pub secret: SecretData,
}

/// Request to delete a machine.
#[derive(Debug, Clone)]
pub struct DeleteMachineRequest {
    pub machine_name: String,
    pub machine_class: MachineClass,
    pub secret: SecretData,
}

/// Request for the status of a machine.
#[derive(Debug, Clone)]
pub struct GetMachineStatusRequest {
    pub machine_name: String,
    pub machine_class: MachineClass,
    pub secret: SecretData,
}

/// Request to list the machines of a machine class.
#[derive(Debug, Clone)]
pub struct ListMachinesRequest {
    pub machine_class: MachineClass,
    pub secret: SecretData,
}

/// Azure machine driver.
pub struct Driver<F = ArmClientFactory> {
    factory: F,
    config: DriverConfig,
    metrics: ApiMetrics,
}

impl Driver<ArmClientFactory> {
    /// Driver talking to Azure Resource Manager over HTTP.
    #[must_use]
    pub fn with_arm(config: DriverConfig, metrics: ApiMetrics) -> Self {
        Self::new(ArmClientFactory::new(config.clone()), config, metrics)
    }
}

impl<F: ClientFactory> Driver<F> {
    /// Create a driver building its clients with `factory`.
    #[must_use]
    pub fn new(factory: F, config: DriverConfig, metrics: ApiMetrics) -> Self {
        Self {
            factory,
            config,
            metrics,
        }
    }

    /// Decode and validate the machine class and connect to its subscription.
    fn prepare(
        &self,
        class: &MachineClass,
        secret: &SecretData,
    ) -> Result<(ProviderSpec, Access), MachineError> {
        if class.provider != PROVIDER_NAME {
            return Err(MachineError::InvalidArgument(format!(
                "machine class provider is {:?}, expected {PROVIDER_NAME:?}",
                class.provider
            )));
        }
        let spec = ProviderSpec::from_json(&class.provider_spec)?;
        spec.validate()?;

        let connect = ConnectConfig::from_secret(secret, spec.cloud())?;
        let clients = self
            .factory
            .clients(&connect)
            .map_err(|e| MachineError::Internal(format!("creating Azure clients: {e}")))?;

        Ok((
            spec,
            Access::new(clients, self.metrics.clone(), self.config.timeouts),
        ))
    }

    /// Create a machine.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidArgument`] for a bad machine class or
    /// secret, otherwise the provisioning error.
    pub async fn create_machine(
        &self,
        cancel: &CancellationToken,
        request: &CreateMachineRequest,
    ) -> Result<MachineInfo, MachineError> {
        let (spec, access) = self.prepare(&request.machine_class, &request.secret)?;
        let user_data = config::user_data(&request.secret)?;
        info!(machine = %request.machine_name, "Creating machine");
        provision::create_machine(&access, cancel, &request.machine_name, &spec, &user_data).await
    }

    /// Delete a machine. Succeeds if it does not exist.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidArgument`] for a bad machine class or
    /// secret, otherwise the deprovisioning error.
    pub async fn delete_machine(
        &self,
        cancel: &CancellationToken,
        request: &DeleteMachineRequest,
    ) -> Result<(), MachineError> {
        let (spec, access) = self.prepare(&request.machine_class, &request.secret)?;
        info!(machine = %request.machine_name, "Deleting machine");
        deprovision::delete_machine(&access, cancel, &request.machine_name, &spec).await
    }

    /// Provider ID and node name of an existing machine.
    ///
    /// # Errors
    /// Returns [`MachineError::NotFound`] if the VM does not exist.
    pub async fn get_machine_status(
        &self,
        cancel: &CancellationToken,
        request: &GetMachineStatusRequest,
    ) -> Result<MachineInfo, MachineError> {
        let (spec, access) = self.prepare(&request.machine_class, &request.secret)?;
        let name = &request.machine_name;
        let resource_group = &spec.resource_group;

        access
            .get_vm(cancel, resource_group, name)
            .await
            .map_err(|e| {
                MachineError::cloud(format!("getting virtual machine {resource_group}/{name}"), e)
            })?
            .ok_or_else(|| {
                MachineError::NotFound(format!("virtual machine {resource_group}/{name}"))
            })?;

        debug!(machine = %name, "Machine exists");
        Ok(MachineInfo::new(&spec.location, name))
    }

    /// All machines of the machine class, keyed by provider ID.
    ///
    /// # Errors
    /// Returns [`MachineError::Internal`] if discovery fails.
    pub async fn list_machines(
        &self,
        cancel: &CancellationToken,
        request: &ListMachinesRequest,
    ) -> Result<HashMap<String, String>, MachineError> {
        let (spec, access) = self.prepare(&request.machine_class, &request.secret)?;
        let names = discovery::list_machine_names(&access, cancel, &spec.resource_group).await?;

        Ok(names
            .into_iter()
            .map(|name| (provider_id(&spec.location, &name), name))
            .collect())
    }
}

/// Azure disk names referenced by persistent volumes.
///
/// In-tree `azureDisk` volumes contribute their disk name and CSI volumes of
/// the Azure disk driver their volume handle. Everything else is ignored.
#[must_use]
pub fn get_volume_ids(specs: &[PersistentVolumeSpec]) -> Vec<String> {
    specs
        .iter()
        .filter_map(|spec| {
            if let Some(disk) = &spec.azure_disk {
                return Some(disk.disk_name.clone());
            }
            spec.csi
                .as_ref()
                .filter(|csi| csi.driver == AZURE_DISK_CSI_DRIVER)
                .map(|csi| csi.volume_handle.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::{
        AzureDiskVolumeSource, CSIPersistentVolumeSource, NFSVolumeSource,
    };
    use serde_json::json;

    use super::*;
    use crate::azure::QueryResponse;
    use crate::error::ErrorKind;
    use crate::fake::{init_test_tracing, secret, FakeCloud, FakeClientFactory};
    use crate::spec::tests::valid_spec;

    fn driver(cloud: &Arc<FakeCloud>) -> Driver<FakeClientFactory> {
        init_test_tracing();
        Driver::new(
            FakeClientFactory(cloud.clone()),
            DriverConfig::default(),
            ApiMetrics::unregistered().unwrap(),
        )
    }

    fn machine_class() -> MachineClass {
        MachineClass {
            provider: PROVIDER_NAME.to_string(),
            provider_spec: serde_json::to_value(valid_spec()).unwrap(),
        }
    }

    fn status_request(name: &str) -> GetMachineStatusRequest {
        GetMachineStatusRequest {
            machine_name: name.to_string(),
            machine_class: machine_class(),
            secret: secret(),
        }
    }

    #[tokio::test]
    async fn test_wrong_provider_is_rejected_before_any_call() {
        let cloud = Arc::new(FakeCloud::new());
        let mut request = status_request("vm-0");
        request.machine_class.provider = "AWS".to_string();

        let err = driver(&cloud)
            .get_machine_status(&CancellationToken::new(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_before_any_call() {
        let cloud = Arc::new(FakeCloud::new());
        let mut spec = valid_spec();
        spec.properties.availability_set = Some(crate::spec::ResourceRef {
            id: "/avset".to_string(),
        });
        let mut request = status_request("vm-0");
        request.machine_class.provider_spec = serde_json::to_value(spec).unwrap();

        let err = driver(&cloud)
            .get_machine_status(&CancellationToken::new(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_are_invalid() {
        let cloud = Arc::new(FakeCloud::new());
        let mut request = status_request("vm-0");
        request.secret.remove("azureClientSecret");

        let err = driver(&cloud)
            .get_machine_status(&CancellationToken::new(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_status_of_missing_machine_is_not_found() {
        let cloud = Arc::new(FakeCloud::new());
        let err = driver(&cloud)
            .get_machine_status(&CancellationToken::new(), &status_request("vm-0"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_then_status_then_delete() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.insert_subnet("shoot-rg", "shoot-vnet", "nodes");
        cloud.insert_image("westeurope", "sap:gardenlinux:greatest:1443.3.0", None);
        cloud.set_resource_group("shoot-rg", true);
        let driver = driver(&cloud);
        let cancel = CancellationToken::new();

        let created = driver
            .create_machine(
                &cancel,
                &CreateMachineRequest {
                    machine_name: "vm-0".to_string(),
                    machine_class: machine_class(),
                    secret: secret(),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.provider_id, "azure:///westeurope/vm-0");

        let status = driver
            .get_machine_status(&cancel, &status_request("vm-0"))
            .await
            .unwrap();
        assert_eq!(status, created);

        driver
            .delete_machine(
                &cancel,
                &DeleteMachineRequest {
                    machine_name: "vm-0".to_string(),
                    machine_class: machine_class(),
                    secret: secret(),
                },
            )
            .await
            .unwrap();
        assert!(cloud.vm("shoot-rg", "vm-0").is_none());
        assert!(cloud.nic("shoot-rg", "vm-0-nic").is_none());
    }

    #[tokio::test]
    async fn test_create_requires_user_data() {
        let cloud = Arc::new(FakeCloud::new());
        let mut request = CreateMachineRequest {
            machine_name: "vm-0".to_string(),
            machine_class: machine_class(),
            secret: secret(),
        };
        request.secret.remove("userData");

        let err = driver(&cloud)
            .create_machine(&CancellationToken::new(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_machines_maps_provider_ids() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.push_graph_page(
            "microsoft.compute/virtualmachines",
            QueryResponse {
                total_records: 1,
                count: 1,
                data: vec![json!({ "name": "vm-0" })],
                skip_token: None,
            },
        );
        cloud.push_graph_page(
            "microsoft.network/networkinterfaces",
            QueryResponse {
                total_records: 1,
                count: 1,
                data: vec![json!({ "name": "vm-1-nic" })],
                skip_token: None,
            },
        );

        let machines = driver(&cloud)
            .list_machines(
                &CancellationToken::new(),
                &ListMachinesRequest {
                    machine_class: machine_class(),
                    secret: secret(),
                },
            )
            .await
            .unwrap();
        assert_eq!(machines.len(), 2);
        assert_eq!(machines["azure:///westeurope/vm-0"], "vm-0");
        assert_eq!(machines["azure:///westeurope/vm-1"], "vm-1");
    }

    #[test]
    fn test_volume_ids() {
        let specs = vec![
            PersistentVolumeSpec {
                azure_disk: Some(AzureDiskVolumeSource {
                    disk_name: "in-tree-disk".to_string(),
                    disk_uri: "/disks/in-tree-disk".to_string(),
                    ..AzureDiskVolumeSource::default()
                }),
                ..PersistentVolumeSpec::default()
            },
            PersistentVolumeSpec {
                csi: Some(CSIPersistentVolumeSource {
                    driver: AZURE_DISK_CSI_DRIVER.to_string(),
                    volume_handle: "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/disks/pv-1".to_string(),
                    ..CSIPersistentVolumeSource::default()
                }),
                ..PersistentVolumeSpec::default()
            },
            PersistentVolumeSpec {
                csi: Some(CSIPersistentVolumeSource {
                    driver: "file.csi.azure.com".to_string(),
                    volume_handle: "share".to_string(),
                    ..CSIPersistentVolumeSource::default()
                }),
                ..PersistentVolumeSpec::default()
            },
            PersistentVolumeSpec {
                nfs: Some(NFSVolumeSource {
                    path: "/export".to_string(),
                    server: "nfs".to_string(),
                    ..NFSVolumeSource::default()
                }),
                ..PersistentVolumeSpec::default()
            },
        ];

        assert_eq!(
            get_volume_ids(&specs),
            vec![
                "in-tree-disk".to_string(),
                "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/disks/pv-1"
                    .to_string()
            ]
        );
    }
}
