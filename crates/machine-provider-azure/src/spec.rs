//! Provider spec: the declarative description of one Azure machine.
//!
//! Decoded once per request from the machine class, validated, then
//! read-only for the rest of the request.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::CloudEnvironment;
use crate::error::MachineError;

/// Tag key prefix identifying the owning cluster.
pub const CLUSTER_TAG_PREFIX: &str = "kubernetes.io-cluster-";

/// Tag key prefix identifying the node role.
pub const ROLE_TAG_PREFIX: &str = "kubernetes.io-role-";

/// Desired state of an Azure machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Azure region.
    pub location: String,
    /// Resource group holding the machine resources.
    pub resource_group: String,
    /// Virtual network and subnet the NIC is attached to.
    pub subnet_info: SubnetInfo,
    /// Machine properties.
    pub properties: MachineProperties,
    /// Tags for VM and NIC.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Cloud instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_configuration: Option<CloudConfiguration>,
}

/// Cloud instance selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfiguration {
    /// Cloud instance name.
    pub name: CloudEnvironment,
}

/// Network placement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetInfo {
    /// Virtual network name.
    pub vnet_name: String,
    /// Resource group of the virtual network, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnet_resource_group: Option<String>,
    /// Subnet name.
    pub subnet_name: String,
}

/// Machine properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineProperties {
    /// Hardware profile.
    pub hardware_profile: HardwareProfile,
    /// Storage profile.
    pub storage_profile: StorageProfile,
    /// OS profile.
    pub os_profile: OsProfile,
    /// Network profile.
    #[serde(default)]
    pub network_profile: NetworkProfile,
    /// Availability zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<u32>,
    /// Availability set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<ResourceRef>,
    /// Virtual machine scale set (flexible orchestration).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_machine_scale_set: Option<ResourceRef>,
    /// User-assigned managed identity resource ID.
    #[serde(default, rename = "identityID", skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    /// Boot diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_profile: Option<DiagnosticsProfile>,
}

/// Reference to another ARM resource by ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource ID.
    pub id: String,
}

/// Hardware profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    /// VM size, e.g. `Standard_D4s_v5`.
    pub vm_size: String,
}

/// Storage profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    /// Image the OS disk is created from.
    pub image_reference: ImageReferenceSpec,
    /// OS disk.
    pub os_disk: OsDiskSpec,
    /// Data disks.
    #[serde(default)]
    pub data_disks: Vec<DataDiskSpec>,
}

/// Image identifier. Exactly one field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReferenceSpec {
    /// Marketplace URN `publisher:offer:sku:version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    /// Plain image resource ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Shared gallery image ID.
    #[serde(default, rename = "sharedGalleryImageID", skip_serializing_if = "Option::is_none")]
    pub shared_gallery_image_id: Option<String>,
    /// Community gallery image ID.
    #[serde(default, rename = "communityGalleryImageID", skip_serializing_if = "Option::is_none")]
    pub community_gallery_image_id: Option<String>,
    /// Skip the marketplace agreement check for marketplace images.
    #[serde(default)]
    pub skip_marketplace_agreement: bool,
}

/// Marketplace image coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceUrn {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

impl std::str::FromStr for MarketplaceUrn {
    type Err = MachineError;

    fn from_str(urn: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = urn.split(':').collect();
        match parts.as_slice() {
            [publisher, offer, sku, version]
                if parts.iter().all(|part| !part.trim().is_empty()) =>
            {
                Ok(Self {
                    publisher: (*publisher).to_string(),
                    offer: (*offer).to_string(),
                    sku: (*sku).to_string(),
                    version: (*version).to_string(),
                })
            }
            _ => Err(MachineError::InvalidArgument(format!(
                "image URN {urn:?} must have the form publisher:offer:sku:version"
            ))),
        }
    }
}

/// The one image source selected by an [`ImageReferenceSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Marketplace(MarketplaceUrn),
    Id(String),
    SharedGallery(String),
    CommunityGallery(String),
}

impl ImageReferenceSpec {
    /// Resolve the single configured image source.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidArgument`] unless exactly one
    /// identifier is set, or if the URN is malformed.
    pub fn source(&self) -> Result<ImageSource, MachineError> {
        let set = [
            self.urn.as_deref(),
            self.id.as_deref(),
            self.shared_gallery_image_id.as_deref(),
            self.community_gallery_image_id.as_deref(),
        ]
        .iter()
        .filter(|v| matches!(v, Some(s) if !s.trim().is_empty()))
        .count();
        if set != 1 {
            return Err(MachineError::InvalidArgument(format!(
                "exactly one of urn, id, sharedGalleryImageID or communityGalleryImageID must be set, found {set}"
            )));
        }

        if let Some(urn) = non_empty(self.urn.as_deref()) {
            return Ok(ImageSource::Marketplace(urn.parse()?));
        }
        if let Some(id) = non_empty(self.id.as_deref()) {
            return Ok(ImageSource::Id(id.to_string()));
        }
        if let Some(id) = non_empty(self.shared_gallery_image_id.as_deref()) {
            return Ok(ImageSource::SharedGallery(id.to_string()));
        }
        non_empty(self.community_gallery_image_id.as_deref())
            .map(|id| ImageSource::CommunityGallery(id.to_string()))
            .ok_or_else(|| MachineError::InvalidArgument("no image identifier set".to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// OS disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDiskSpec {
    /// Caching mode (`None`, `ReadOnly`, `ReadWrite`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    /// Disk size in GiB.
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: i32,
    /// Storage account type, e.g. `Premium_LRS`.
    pub storage_account_type: String,
}

/// Data disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDiskSpec {
    /// Optional logical name, part of the derived disk name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Logical unit number.
    pub lun: i32,
    /// Caching mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    /// Disk size in GiB.
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: i32,
    /// Storage account type.
    pub storage_account_type: String,
}

/// OS profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    /// Admin user name.
    pub admin_username: String,
    /// Linux configuration.
    pub linux_configuration: LinuxConfiguration,
}

/// Linux configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxConfiguration {
    /// Disable password authentication.
    #[serde(default = "default_true")]
    pub disable_password_authentication: bool,
    /// SSH configuration.
    pub ssh: SshConfiguration,
}

/// SSH configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    /// Authorized public key.
    pub public_keys: SshPublicKey,
}

/// SSH public key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshPublicKey {
    /// Path of the `authorized_keys` file on the VM.
    pub path: String,
    /// Public key data.
    pub key_data: String,
}

/// Network profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Enable accelerated networking on the NIC.
    #[serde(default)]
    pub accelerated_networking: bool,
}

/// Boot diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsProfile {
    /// Enable boot diagnostics.
    pub enabled: bool,
    /// Storage account blob endpoint; managed storage when empty.
    #[serde(default, rename = "storageURI", skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Where the VM is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Zone(u32),
    AvailabilitySet(String),
    ScaleSet(String),
}

impl ProviderSpec {
    /// Decode a provider spec from its raw JSON form.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidArgument`] if the JSON does not match
    /// the schema.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, MachineError> {
        serde_json::from_value(raw.clone())
            .map_err(|e| MachineError::InvalidArgument(format!("cannot decode provider spec: {e}")))
    }

    /// Cloud instance this spec targets.
    #[must_use]
    pub fn cloud(&self) -> CloudEnvironment {
        self.cloud_configuration
            .as_ref()
            .map(|c| c.name)
            .unwrap_or_default()
    }

    /// Resource group of the virtual network.
    #[must_use]
    pub fn vnet_resource_group(&self) -> &str {
        self.subnet_info
            .vnet_resource_group
            .as_deref()
            .filter(|rg| !rg.is_empty())
            .unwrap_or(&self.resource_group)
    }

    /// The single configured placement mode.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidArgument`] unless exactly one of zone,
    /// availability set or scale set is set.
    pub fn placement(&self) -> Result<Placement, MachineError> {
        let props = &self.properties;
        match (
            props.zone,
            props.availability_set.as_ref(),
            props.virtual_machine_scale_set.as_ref(),
        ) {
            (Some(zone), None, None) => Ok(Placement::Zone(zone)),
            (None, Some(set), None) => Ok(Placement::AvailabilitySet(set.id.clone())),
            (None, None, Some(vmss)) => Ok(Placement::ScaleSet(vmss.id.clone())),
            _ => Err(MachineError::InvalidArgument(
                "exactly one of zone, availabilitySet or virtualMachineScaleSet must be set"
                    .to_string(),
            )),
        }
    }

    /// Validate the provider spec, collecting every violation.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidArgument`] listing every violation.
    pub fn validate(&self) -> Result<(), MachineError> {
        let mut problems = Vec::new();

        for (field, value) in [
            ("location", &self.location),
            ("resourceGroup", &self.resource_group),
            ("subnetInfo.vnetName", &self.subnet_info.vnet_name),
            ("subnetInfo.subnetName", &self.subnet_info.subnet_name),
            (
                "properties.hardwareProfile.vmSize",
                &self.properties.hardware_profile.vm_size,
            ),
            (
                "properties.osProfile.adminUsername",
                &self.properties.os_profile.admin_username,
            ),
            (
                "properties.osProfile.linuxConfiguration.ssh.publicKeys.keyData",
                &self
                    .properties
                    .os_profile
                    .linux_configuration
                    .ssh
                    .public_keys
                    .key_data,
            ),
            (
                "properties.storageProfile.osDisk.storageAccountType",
                &self.properties.storage_profile.os_disk.storage_account_type,
            ),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{field} must not be empty"));
            }
        }

        if let Err(e) = self.properties.storage_profile.image_reference.source() {
            problems.push(inner_message(e));
        }
        if let Err(e) = self.placement() {
            problems.push(inner_message(e));
        }

        if self.properties.storage_profile.os_disk.disk_size_gb <= 0 {
            problems.push("properties.storageProfile.osDisk.diskSizeGB must be positive".to_string());
        }

        let mut luns = HashSet::new();
        for (i, disk) in self.properties.storage_profile.data_disks.iter().enumerate() {
            if disk.lun < 0 {
                problems.push(format!("dataDisks[{i}].lun must not be negative"));
            } else if !luns.insert(disk.lun) {
                problems.push(format!("dataDisks[{i}].lun {} is not unique", disk.lun));
            }
            if disk.disk_size_gb <= 0 {
                problems.push(format!("dataDisks[{i}].diskSizeGB must be positive"));
            }
            if disk.storage_account_type.trim().is_empty() {
                problems.push(format!("dataDisks[{i}].storageAccountType must not be empty"));
            }
        }

        if !self.tags.keys().any(|k| k.starts_with(CLUSTER_TAG_PREFIX)) {
            problems.push(format!("tags must contain a key with prefix {CLUSTER_TAG_PREFIX}"));
        }
        if !self.tags.keys().any(|k| k.starts_with(ROLE_TAG_PREFIX)) {
            problems.push(format!("tags must contain a key with prefix {ROLE_TAG_PREFIX}"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MachineError::InvalidArgument(format!(
                "invalid provider spec: {}",
                problems.join("; ")
            )))
        }
    }
}

fn inner_message(err: MachineError) -> String {
    match err {
        MachineError::InvalidArgument(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A spec that passes validation.
    pub(crate) fn valid_spec() -> ProviderSpec {
        serde_json::from_value(serde_json::json!({
            "location": "westeurope",
            "resourceGroup": "shoot-rg",
            "subnetInfo": { "vnetName": "shoot-vnet", "subnetName": "nodes" },
            "properties": {
                "hardwareProfile": { "vmSize": "Standard_D4s_v5" },
                "storageProfile": {
                    "imageReference": { "urn": "sap:gardenlinux:greatest:1443.3.0" },
                    "osDisk": { "diskSizeGB": 50, "storageAccountType": "Premium_LRS" },
                    "dataDisks": [
                        { "lun": 0, "diskSizeGB": 100, "storageAccountType": "Premium_LRS" },
                        { "name": "etcd", "lun": 1, "diskSizeGB": 20, "storageAccountType": "StandardSSD_LRS" }
                    ]
                },
                "osProfile": {
                    "adminUsername": "core",
                    "linuxConfiguration": {
                        "ssh": { "publicKeys": { "path": "/home/core/.ssh/authorized_keys", "keyData": "ssh-ed25519 AAAA" } }
                    }
                },
                "zone": 2
            },
            "tags": {
                "kubernetes.io-cluster-shoot": "1",
                "kubernetes.io-role-node": "1"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_spec_passes() {
        let spec = valid_spec();
        spec.validate().unwrap();
        assert_eq!(spec.placement().unwrap(), Placement::Zone(2));
        assert!(spec.properties.os_profile.linux_configuration.disable_password_authentication);
        assert_eq!(spec.vnet_resource_group(), "shoot-rg");
        assert_eq!(spec.cloud(), CloudEnvironment::AzurePublic);
    }

    #[test]
    fn test_urn_parsing() {
        let urn: MarketplaceUrn = "sap:gardenlinux:greatest:latest".parse().unwrap();
        assert_eq!(urn.offer, "gardenlinux");
        assert_eq!(urn.version, "latest");
        assert!("sap:gardenlinux:greatest".parse::<MarketplaceUrn>().is_err());
        assert!("sap::greatest:1".parse::<MarketplaceUrn>().is_err());
    }

    #[test]
    fn test_exactly_one_image_identifier() {
        let mut spec = valid_spec();
        spec.properties.storage_profile.image_reference.id = Some("/images/custom".to_string());
        assert!(spec.validate().is_err());

        spec.properties.storage_profile.image_reference = ImageReferenceSpec::default();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one of urn"));

        spec.properties.storage_profile.image_reference.community_gallery_image_id =
            Some("/CommunityGalleries/g/Images/i/Versions/1".to_string());
        assert_eq!(
            spec.properties.storage_profile.image_reference.source().unwrap(),
            ImageSource::CommunityGallery("/CommunityGalleries/g/Images/i/Versions/1".to_string())
        );
        spec.validate().unwrap();
    }

    #[test]
    fn test_exactly_one_placement() {
        let mut spec = valid_spec();
        spec.properties.availability_set = Some(ResourceRef {
            id: "/availabilitySets/as".to_string(),
        });
        assert!(spec.validate().is_err());

        spec.properties.zone = None;
        assert_eq!(
            spec.placement().unwrap(),
            Placement::AvailabilitySet("/availabilitySets/as".to_string())
        );

        spec.properties.availability_set = None;
        let err = spec.validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_data_disk_luns() {
        let mut spec = valid_spec();
        spec.properties.storage_profile.data_disks[1].lun = 0;
        assert!(spec.validate().unwrap_err().to_string().contains("not unique"));

        spec.properties.storage_profile.data_disks[1].lun = -1;
        assert!(spec.validate().unwrap_err().to_string().contains("must not be negative"));
    }

    #[test]
    fn test_required_tags() {
        let mut spec = valid_spec();
        spec.tags.remove("kubernetes.io-role-node");
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains(ROLE_TAG_PREFIX));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let err = ProviderSpec::from_json(&serde_json::json!({ "location": 5 })).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}
