//! Virtual machine access.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{absent_as_done, absent_as_none, Access};
use crate::azure::{VirtualMachine, VirtualMachineUpdate};
use crate::error::CloudError;

impl Access {
    /// Get a VM, `None` if it does not exist.
    ///
    /// # Errors
    /// Returns error on any backend failure other than not-found.
    pub async fn get_vm(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, CloudError> {
        let resource = format!("{resource_group}/{name}");
        self.observe("virtual_machine_get", &resource, cancel, async {
            absent_as_none(self.clients.virtual_machines.get(resource_group, name).await)
        })
        .await
    }

    /// Create or replace a VM and wait for the operation to finish.
    ///
    /// # Errors
    /// Returns error if the operation fails, times out or is cancelled.
    pub async fn create_or_update_vm(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, CloudError> {
        let resource = format!("{resource_group}/{name}");
        info!(resource_group, vm_name = %name, "Creating virtual machine");
        let created = self
            .observe_long_running(
                "virtual_machine_create",
                &resource,
                cancel,
                self.timeouts.vm_create,
                async {
                    self.clients
                        .virtual_machines
                        .begin_create_or_update(resource_group, name, vm)
                        .await?
                        .wait(cancel)
                        .await
                },
            )
            .await?;
        info!(resource_group, vm_name = %name, "Created virtual machine");
        Ok(created)
    }

    /// Apply a partial update to a VM and wait for it to finish.
    ///
    /// # Errors
    /// Returns error if the operation fails, times out or is cancelled.
    pub async fn update_vm(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
        update: &VirtualMachineUpdate,
    ) -> Result<VirtualMachine, CloudError> {
        let resource = format!("{resource_group}/{name}");
        debug!(resource_group, vm_name = %name, "Updating virtual machine");
        self.observe_long_running(
            "virtual_machine_update",
            &resource,
            cancel,
            self.timeouts.vm_update,
            async {
                self.clients
                    .virtual_machines
                    .begin_update(resource_group, name, update)
                    .await?
                    .wait(cancel)
                    .await
            },
        )
        .await
    }

    /// Delete a VM and wait for it to be gone. Succeeds if it never existed.
    ///
    /// # Errors
    /// Returns error if the operation fails, times out or is cancelled.
    pub async fn delete_vm(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
    ) -> Result<(), CloudError> {
        let resource = format!("{resource_group}/{name}");
        info!(resource_group, vm_name = %name, "Deleting virtual machine");
        self.observe_long_running(
            "virtual_machine_delete",
            &resource,
            cancel,
            self.timeouts.vm_delete,
            async {
                absent_as_done(
                    async {
                        self.clients
                            .virtual_machines
                            .begin_delete(resource_group, name)
                            .await?
                            .wait(cancel)
                            .await
                    }
                    .await,
                )
            },
        )
        .await
    }
}
