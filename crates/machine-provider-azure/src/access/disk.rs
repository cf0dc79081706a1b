//! Managed disk access.

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{absent_as_done, absent_as_none, Access};
use crate::azure::Disk;
use crate::error::CloudError;

impl Access {
    /// Get a disk, `None` if it does not exist.
    ///
    /// # Errors
    /// Returns error on any backend failure other than not-found.
    pub async fn get_disk(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<Disk>, CloudError> {
        let resource = format!("{resource_group}/{name}");
        self.observe("disk_get", &resource, cancel, async {
            absent_as_none(self.clients.disks.get(resource_group, name).await)
        })
        .await
    }

    /// Delete a disk and wait for it to be gone. Succeeds if it never existed.
    ///
    /// # Errors
    /// Returns error if the operation fails, times out or is cancelled.
    pub async fn delete_disk(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        name: &str,
    ) -> Result<(), CloudError> {
        let resource = format!("{resource_group}/{name}");
        info!(resource_group, disk_name = %name, "Deleting disk");
        self.observe_long_running(
            "disk_delete",
            &resource,
            cancel,
            self.timeouts.disk_delete,
            async {
                absent_as_done(
                    async {
                        self.clients
                            .disks
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
