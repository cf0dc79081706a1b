//! Machine provisioning.
//!
//! Steps run strictly in order: subnet, image (with marketplace agreement),
//! NIC, VM. A failure at any step is returned as-is; nothing created by an
//! earlier step is rolled back. A NIC left behind by a failed VM creation
//! is picked up again by the next attempt.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::access::Access;
use crate::azure::{
    BootDiagnostics, DataDisk, DeleteOption, DiagnosticsProfile, HardwareProfile, ImageReference,
    IpConfiguration, IpConfigurationProperties, LinuxConfiguration, ManagedDiskParameters,
    NetworkInterface, NetworkInterfaceProperties, NetworkInterfaceReference,
    NetworkInterfaceReferenceProperties, NetworkProfile, OsDisk, OsProfile, Plan, SshConfiguration,
    SshPublicKey, StorageProfile, SubResource, Subnet, VirtualMachine, VirtualMachineIdentity,
    VirtualMachineProperties,
};
use crate::error::MachineError;
use crate::names::{MachineInfo, MachineResourceNames};
use crate::spec::{ImageSource, MarketplaceUrn, Placement, ProviderSpec};

const IP_CONFIGURATION_NAME: &str = "ipconfig1";
const OS_DISK_CREATE_OPTION: &str = "FromImage";
const DATA_DISK_CREATE_OPTION: &str = "Empty";
const USER_ASSIGNED_IDENTITY: &str = "UserAssigned";

/// Image reference and optional purchase plan for the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub reference: ImageReference,
    pub plan: Option<Plan>,
}

/// Create the NIC and VM of machine `vm_name`.
///
/// # Errors
/// Returns the error of the first failing step, classified by
/// [`MachineError::cloud`].
pub async fn create_machine(
    access: &Access,
    cancel: &CancellationToken,
    vm_name: &str,
    spec: &ProviderSpec,
    user_data: &str,
) -> Result<MachineInfo, MachineError> {
    let names = MachineResourceNames::new(vm_name, &spec.properties.storage_profile.data_disks);
    let resource_group = spec.resource_group.as_str();
    let placement = spec.placement()?;

    let subnet = resolve_subnet(access, cancel, spec).await?;
    let image = resolve_image(access, cancel, spec).await?;
    let nic = ensure_nic(access, cancel, spec, &names, &subnet).await?;
    let nic_id = nic.id.ok_or_else(|| {
        MachineError::Internal(format!(
            "network interface {resource_group}/{} has no ID",
            names.nic
        ))
    })?;

    let vm = virtual_machine(spec, &names, &placement, image, &nic_id, user_data);
    access
        .create_or_update_vm(cancel, resource_group, &names.vm, &vm)
        .await
        .map_err(|e| {
            MachineError::cloud(
                format!("creating virtual machine {resource_group}/{}", names.vm),
                e,
            )
        })?;

    Ok(MachineInfo::new(&spec.location, &names.vm))
}

async fn resolve_subnet(
    access: &Access,
    cancel: &CancellationToken,
    spec: &ProviderSpec,
) -> Result<Subnet, MachineError> {
    let resource_group = spec.vnet_resource_group();
    let vnet = &spec.subnet_info.vnet_name;
    let subnet = &spec.subnet_info.subnet_name;
    access
        .get_subnet(cancel, resource_group, vnet, subnet)
        .await
        .map_err(|e| {
            MachineError::cloud(format!("getting subnet {resource_group}/{vnet}/{subnet}"), e)
        })?
        .ok_or_else(|| {
            MachineError::Internal(format!("subnet {resource_group}/{vnet}/{subnet} not found"))
        })
}

/// Build the image reference. Marketplace images carrying a purchase plan
/// get that plan, and their agreement is accepted unless skipped.
///
/// # Errors
/// Returns error if the image or its agreement cannot be read, or the
/// agreement cannot be accepted.
pub async fn resolve_image(
    access: &Access,
    cancel: &CancellationToken,
    spec: &ProviderSpec,
) -> Result<ResolvedImage, MachineError> {
    let image = &spec.properties.storage_profile.image_reference;
    let reference = match image.source()? {
        ImageSource::Marketplace(urn) => {
            let reference = ImageReference {
                publisher: Some(urn.publisher.clone()),
                offer: Some(urn.offer.clone()),
                sku: Some(urn.sku.clone()),
                version: Some(urn.version.clone()),
                ..ImageReference::default()
            };
            let plan = marketplace_plan(
                access,
                cancel,
                &spec.location,
                &urn,
                !image.skip_marketplace_agreement,
            )
            .await?;
            return Ok(ResolvedImage { reference, plan });
        }
        ImageSource::Id(id) => ImageReference {
            id: Some(id),
            ..ImageReference::default()
        },
        ImageSource::SharedGallery(id) => ImageReference {
            shared_gallery_image_id: Some(id),
            ..ImageReference::default()
        },
        ImageSource::CommunityGallery(id) => ImageReference {
            community_gallery_image_id: Some(id),
            ..ImageReference::default()
        },
    };

    Ok(ResolvedImage {
        reference,
        plan: None,
    })
}

/// Purchase plan of a marketplace image. With `check_agreement`, its
/// agreement is read and accepted if needed.
async fn marketplace_plan(
    access: &Access,
    cancel: &CancellationToken,
    location: &str,
    urn: &MarketplaceUrn,
    check_agreement: bool,
) -> Result<Option<Plan>, MachineError> {
    let image_name = format!("{}:{}:{}:{}", urn.publisher, urn.offer, urn.sku, urn.version);
    let image = access
        .get_vm_image(cancel, location, urn)
        .await
        .map_err(|e| MachineError::cloud(format!("getting image {image_name}"), e))?
        .ok_or_else(|| {
            MachineError::Internal(format!("image {image_name} not found in {location}"))
        })?;

    let Some(plan) = image.properties.plan else {
        return Ok(None);
    };
    if !check_agreement {
        debug!(image = %image_name, "Skipping marketplace agreement check");
        return Ok(Some(plan.into()));
    }

    let context = format!(
        "marketplace agreement {}/{}/{}",
        plan.publisher, plan.product, plan.name
    );
    let terms = access
        .get_agreement(cancel, &plan.publisher, &plan.product, &plan.name)
        .await
        .map_err(|e| MachineError::cloud(format!("getting {context}"), e))?
        .ok_or_else(|| MachineError::Internal(format!("{context} not found")))?;

    if terms.properties.accepted {
        debug!(agreement = %context, "Marketplace agreement already accepted");
    } else {
        access
            .accept_agreement(cancel, &plan.publisher, &plan.product, &plan.name, &terms)
            .await
            .map_err(|e| MachineError::cloud(format!("accepting {context}"), e))?;
    }

    Ok(Some(plan.into()))
}

/// Reuse the machine's NIC if a previous attempt left one, else create it.
async fn ensure_nic(
    access: &Access,
    cancel: &CancellationToken,
    spec: &ProviderSpec,
    names: &MachineResourceNames,
    subnet: &Subnet,
) -> Result<NetworkInterface, MachineError> {
    let resource_group = spec.resource_group.as_str();
    let context = format!("network interface {resource_group}/{}", names.nic);

    if let Some(existing) = access
        .get_nic(cancel, resource_group, &names.nic)
        .await
        .map_err(|e| MachineError::cloud(format!("getting {context}"), e))?
    {
        info!(resource_group, nic_name = %names.nic, "Reusing existing network interface");
        return Ok(existing);
    }

    access
        .create_or_update_nic(cancel, resource_group, &names.nic, &network_interface(spec, subnet))
        .await
        .map_err(|e| MachineError::cloud(format!("creating {context}"), e))
}

/// NIC body: one dynamic IPv4 configuration in `subnet`.
fn network_interface(spec: &ProviderSpec, subnet: &Subnet) -> NetworkInterface {
    NetworkInterface {
        location: spec.location.clone(),
        tags: spec.tags.clone(),
        properties: NetworkInterfaceProperties {
            ip_configurations: vec![IpConfiguration {
                name: Some(IP_CONFIGURATION_NAME.to_string()),
                properties: Some(IpConfigurationProperties {
                    subnet: Some(SubResource::new(subnet.id.clone())),
                    private_ip_allocation_method: Some("Dynamic".to_string()),
                    primary: Some(true),
                    ..IpConfigurationProperties::default()
                }),
            }],
            enable_accelerated_networking: Some(
                spec.properties.network_profile.accelerated_networking,
            ),
            enable_ip_forwarding: Some(true),
            ..NetworkInterfaceProperties::default()
        },
        ..NetworkInterface::default()
    }
}

/// VM body. Every dependent resource is marked for deletion with the VM.
fn virtual_machine(
    spec: &ProviderSpec,
    names: &MachineResourceNames,
    placement: &Placement,
    image: ResolvedImage,
    nic_id: &str,
    user_data: &str,
) -> VirtualMachine {
    let props = &spec.properties;
    let storage = &props.storage_profile;
    let linux = &props.os_profile.linux_configuration;

    let (zones, availability_set, virtual_machine_scale_set) = match placement {
        Placement::Zone(zone) => (vec![zone.to_string()], None, None),
        Placement::AvailabilitySet(id) => (Vec::new(), Some(SubResource::new(id.clone())), None),
        Placement::ScaleSet(id) => (Vec::new(), None, Some(SubResource::new(id.clone()))),
    };

    let identity = props
        .identity_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(|id| VirtualMachineIdentity {
            identity_type: USER_ASSIGNED_IDENTITY.to_string(),
            user_assigned_identities: HashMap::from([(
                id.to_string(),
                serde_json::Value::Object(serde_json::Map::new()),
            )]),
        });

    let data_disks = storage
        .data_disks
        .iter()
        .zip(&names.data_disks)
        .map(|(disk, name)| DataDisk {
            lun: disk.lun,
            name: Some(name.clone()),
            caching: disk.caching.clone(),
            create_option: Some(DATA_DISK_CREATE_OPTION.to_string()),
            disk_size_gb: Some(disk.disk_size_gb),
            managed_disk: Some(ManagedDiskParameters {
                id: None,
                storage_account_type: Some(disk.storage_account_type.clone()),
            }),
            delete_option: Some(DeleteOption::Delete),
            to_be_detached: None,
        })
        .collect();

    VirtualMachine {
        location: spec.location.clone(),
        tags: spec.tags.clone(),
        zones,
        plan: image.plan,
        identity,
        properties: VirtualMachineProperties {
            hardware_profile: Some(HardwareProfile {
                vm_size: props.hardware_profile.vm_size.clone(),
            }),
            storage_profile: Some(StorageProfile {
                image_reference: Some(image.reference),
                os_disk: Some(OsDisk {
                    name: Some(names.os_disk.clone()),
                    caching: storage.os_disk.caching.clone(),
                    create_option: Some(OS_DISK_CREATE_OPTION.to_string()),
                    disk_size_gb: Some(storage.os_disk.disk_size_gb),
                    managed_disk: Some(ManagedDiskParameters {
                        id: None,
                        storage_account_type: Some(storage.os_disk.storage_account_type.clone()),
                    }),
                    delete_option: Some(DeleteOption::Delete),
                    ..OsDisk::default()
                }),
                data_disks,
            }),
            os_profile: Some(OsProfile {
                computer_name: names.vm.clone(),
                admin_username: props.os_profile.admin_username.clone(),
                custom_data: Some(BASE64.encode(user_data)),
                linux_configuration: Some(LinuxConfiguration {
                    disable_password_authentication: linux.disable_password_authentication,
                    ssh: Some(SshConfiguration {
                        public_keys: vec![SshPublicKey {
                            path: linux.ssh.public_keys.path.clone(),
                            key_data: linux.ssh.public_keys.key_data.clone(),
                        }],
                    }),
                }),
            }),
            network_profile: Some(NetworkProfile {
                network_interfaces: vec![NetworkInterfaceReference {
                    id: nic_id.to_string(),
                    properties: Some(NetworkInterfaceReferenceProperties {
                        primary: Some(true),
                        delete_option: Some(DeleteOption::Delete),
                    }),
                }],
            }),
            availability_set,
            virtual_machine_scale_set,
            diagnostics_profile: props.diagnostics_profile.as_ref().map(|diagnostics| {
                DiagnosticsProfile {
                    boot_diagnostics: BootDiagnostics {
                        enabled: diagnostics.enabled,
                        storage_uri: diagnostics.storage_uri.clone().filter(|uri| !uri.is_empty()),
                    },
                }
            }),
            ..VirtualMachineProperties::default()
        },
        ..VirtualMachine::default()
    }
}
