//! Resource group and subnet access.

use tokio_util::sync::CancellationToken;

use super::{absent_as_none, Access};
use crate::azure::Subnet;
use crate::error::CloudError;

impl Access {
    /// Whether `resource_group` exists.
    ///
    /// # Errors
    /// Returns error if the existence check itself fails.
    pub async fn resource_group_exists(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
    ) -> Result<bool, CloudError> {
        self.observe("resource_group_check_existence", resource_group, cancel, async {
            self.clients.resource_groups.check_existence(resource_group).await
        })
        .await
    }

    /// Get a subnet of a virtual network, `None` if it does not exist.
    ///
    /// # Errors
    /// Returns error on any backend failure other than not-found.
    pub async fn get_subnet(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<Option<Subnet>, CloudError> {
        let resource = format!("{resource_group}/{vnet_name}/{subnet_name}");
        self.observe("subnet_get", &resource, cancel, async {
            absent_as_none(
                self.clients
                    .subnets
                    .get(resource_group, vnet_name, subnet_name)
                    .await,
            )
        })
        .await
    }
}
