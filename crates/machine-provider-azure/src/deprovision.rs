//! Machine deprovisioning.
//!
//! The VM is deleted with cascade-delete set on its NIC and disks so the
//! backend removes them together. When the VM is already gone, or could not
//! be updated, the NIC and disks are looked up by name and deleted
//! concurrently. A NIC or disk still attached to a VM is a conflict.

use anyhow::bail;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::access::Access;
use crate::azure::{
    DeleteOption, NetworkInterfaceReference, NetworkInterfaceReferenceProperties, NetworkProfile,
    StorageProfile, VirtualMachine, VirtualMachineUpdate, VirtualMachineUpdateProperties,
};
use crate::error::MachineError;
use crate::names::MachineResourceNames;
use crate::runner::{run_concurrently, Task, TaskError};
use crate::spec::ProviderSpec;

/// Provisioning state of a VM that rejects updates.
const FAILED_PROVISIONING_STATE: &str = "Failed";

/// Delete machine `vm_name` and every resource belonging to it.
///
/// Deleting a machine that does not exist succeeds.
///
/// # Errors
/// Returns error if any backend call fails. Failures of the concurrent
/// cleanup are joined into one error.
pub async fn delete_machine(
    access: &Access,
    cancel: &CancellationToken,
    vm_name: &str,
    spec: &ProviderSpec,
) -> Result<(), MachineError> {
    let resource_group = spec.resource_group.as_str();
    let names = MachineResourceNames::new(vm_name, &spec.properties.storage_profile.data_disks);

    let exists = access
        .resource_group_exists(cancel, resource_group)
        .await
        .map_err(|e| {
            MachineError::cloud(format!("checking resource group {resource_group}"), e)
        })?;
    if !exists {
        info!(resource_group, vm_name, "Resource group gone, nothing to delete");
        return Ok(());
    }

    let vm = match access.get_vm(cancel, resource_group, vm_name).await {
        Ok(vm) => vm,
        Err(e) if e.is_resource_group_not_found() => {
            info!(resource_group, vm_name, "Resource group deleted meanwhile, nothing to delete");
            return Ok(());
        }
        Err(e) => {
            return Err(MachineError::cloud(
                format!("getting virtual machine {resource_group}/{vm_name}"),
                e,
            ))
        }
    };

    match vm {
        Some(vm) if can_update(&vm) => {
            if let Some(update) = cascade_delete_update(&vm) {
                info!(resource_group, vm_name, "Setting cascade delete on NIC and disks");
                access
                    .update_vm(cancel, resource_group, vm_name, &update)
                    .await
                    .map_err(|e| {
                        MachineError::cloud(
                            format!("updating virtual machine {resource_group}/{vm_name}"),
                            e,
                        )
                    })?;
            }
            delete_vm(access, cancel, resource_group, vm_name).await
        }
        Some(_) => {
            warn!(
                resource_group,
                vm_name, "Virtual machine cannot be updated, deleting NIC and disks separately"
            );
            delete_vm(access, cancel, resource_group, vm_name).await?;
            delete_leftovers(access, cancel, resource_group, &names).await
        }
        None => {
            info!(resource_group, vm_name, "Virtual machine not found, deleting leftovers");
            delete_leftovers(access, cancel, resource_group, &names).await
        }
    }
}

async fn delete_vm(
    access: &Access,
    cancel: &CancellationToken,
    resource_group: &str,
    vm_name: &str,
) -> Result<(), MachineError> {
    access
        .delete_vm(cancel, resource_group, vm_name)
        .await
        .map_err(|e| {
            MachineError::cloud(format!("deleting virtual machine {resource_group}/{vm_name}"), e)
        })
}

/// Whether the backend would accept an update of `vm`.
fn can_update(vm: &VirtualMachine) -> bool {
    if vm.properties.provisioning_state.as_deref() == Some(FAILED_PROVISIONING_STATE) {
        return false;
    }
    !vm.properties
        .storage_profile
        .as_ref()
        .is_some_and(|storage| {
            storage
                .data_disks
                .iter()
                .any(|disk| disk.to_be_detached == Some(true))
        })
}

/// Update setting delete-with-VM on every NIC and disk, or `None` if all
/// of them already have it.
fn cascade_delete_update(vm: &VirtualMachine) -> Option<VirtualMachineUpdate> {
    let delete = Some(DeleteOption::Delete);
    let nics = vm
        .properties
        .network_profile
        .as_ref()
        .map(|network| network.network_interfaces.as_slice())
        .unwrap_or_default();
    let storage = vm.properties.storage_profile.as_ref();
    let os_disk = storage.and_then(|s| s.os_disk.as_ref());
    let data_disks = storage.map(|s| s.data_disks.as_slice()).unwrap_or_default();

    let nics_done = nics.iter().all(|nic| {
        nic.properties
            .as_ref()
            .is_some_and(|props| props.delete_option == delete)
    });
    let os_disk_done = os_disk.map_or(true, |disk| disk.delete_option == delete);
    let data_disks_done = data_disks.iter().all(|disk| disk.delete_option == delete);
    if nics_done && os_disk_done && data_disks_done {
        return None;
    }

    let network_interfaces = nics
        .iter()
        .map(|nic| NetworkInterfaceReference {
            id: nic.id.clone(),
            properties: Some(NetworkInterfaceReferenceProperties {
                primary: nic.properties.as_ref().and_then(|props| props.primary),
                delete_option: delete,
            }),
        })
        .collect();
    let os_disk = os_disk.map(|disk| {
        let mut disk = disk.clone();
        disk.delete_option = delete;
        disk
    });
    let data_disks = data_disks
        .iter()
        .map(|disk| {
            let mut disk = disk.clone();
            disk.delete_option = delete;
            disk
        })
        .collect();

    Some(VirtualMachineUpdate {
        properties: VirtualMachineUpdateProperties {
            storage_profile: Some(StorageProfile {
                image_reference: None,
                os_disk,
                data_disks,
            }),
            network_profile: Some(NetworkProfile { network_interfaces }),
        },
    })
}

/// Delete the NIC and disks of a machine whose VM is gone.
async fn delete_leftovers(
    access: &Access,
    cancel: &CancellationToken,
    resource_group: &str,
    names: &MachineResourceNames,
) -> Result<(), MachineError> {
    let errors = delete_leftover_resources(access, cancel, resource_group, names).await;
    if errors.is_empty() {
        return Ok(());
    }

    let message = format!(
        "deleting leftovers of machine {resource_group}/{}: {}",
        names.vm,
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    );
    if cancel.is_cancelled() {
        Err(MachineError::Cancelled(message))
    } else {
        Err(MachineError::Internal(message))
    }
}

/// Run one deletion task per leftover resource, bounded by their count.
pub(crate) async fn delete_leftover_resources(
    access: &Access,
    cancel: &CancellationToken,
    resource_group: &str,
    names: &MachineResourceNames,
) -> Vec<TaskError> {
    let mut tasks = Vec::with_capacity(1 + names.data_disks.len() + 1);

    let (nic_access, rg, nic) = (access.clone(), resource_group.to_string(), names.nic.clone());
    tasks.push(Task::new(format!("network interface {nic}"), move |cancel| async move {
        let Some(found) = nic_access.get_nic(&cancel, &rg, &nic).await? else {
            return Ok(());
        };
        if let Some(vm) = found.properties.virtual_machine {
            bail!("network interface {rg}/{nic} is still attached to {}", vm.id);
        }
        nic_access.delete_nic(&cancel, &rg, &nic).await?;
        Ok(())
    }));

    for disk in names.disks() {
        let (disk_access, rg, disk) = (access.clone(), resource_group.to_string(), disk.to_string());
        tasks.push(Task::new(format!("disk {disk}"), move |cancel| async move {
            let Some(found) = disk_access.get_disk(&cancel, &rg, &disk).await? else {
                return Ok(());
            };
            if let Some(owner) = found.managed_by {
                bail!("disk {rg}/{disk} is still attached to {owner}");
            }
            disk_access.delete_disk(&cancel, &rg, &disk).await?;
            Ok(())
        }));
    }

    let parallelism = tasks.len();
    run_concurrently(cancel, tasks, parallelism).await
}
