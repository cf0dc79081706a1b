//! Network interface access.

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{absent_as_done, absent_as_none, Access};
use crate::azure::NetworkInterface;
use crate::error::CloudError;

impl Access {
    /// Get a NIC, `None` if it does not exist.
    ///
    /// # Errors
    /// Returns error on any backend failure other than not-found.
    pub async fn get_nic(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterface>, CloudError> {
        let resource = format!("{resource_group}/{name}");
        self.observe("network_interface_get", &resource, cancel, async {
            absent_as_none(self.clients.network_interfaces.get(resource_group, name).await)
        })
        .await
    }

    /// Create or replace a NIC and wait for the operation to finish.
    ///
    /// # Errors
    /// Returns error if the operation fails, times out or is cancelled.
    pub async fn create_or_update_nic(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface, CloudError> {
        let resource = format!("{resource_group}/{name}");
        info!(resource_group, nic_name = %name, "Creating network interface");
        self.observe_long_running(
            "network_interface_create",
            &resource,
            cancel,
            self.timeouts.nic_create,
            async {
                self.clients
                    .network_interfaces
                    .begin_create_or_update(resource_group, name, nic)
                    .await?
                    .wait(cancel)
                    .await
            },
        )
        .await
    }

    /// Delete a NIC and wait for it to be gone. Succeeds if it never existed.
    ///
    /// # Errors
    /// Returns error if the operation fails, times out or is cancelled.
    pub async fn delete_nic(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
    ) -> Result<(), CloudError> {
        let resource = format!("{resource_group}/{name}");
        info!(resource_group, nic_name = %name, "Deleting network interface");
        self.observe_long_running(
            "network_interface_delete",
            &resource,
            cancel,
            self.timeouts.nic_delete,
            async {
                absent_as_done(
                    async {
                        self.clients
                            .network_interfaces
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
