//! Marketplace agreement and VM image access.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{absent_as_none, Access};
use crate::azure::{AgreementTerms, VirtualMachineImage};
use crate::error::CloudError;
use crate::spec::MarketplaceUrn;

/// Image version alias for the newest published version.
const LATEST_VERSION: &str = "latest";

impl Access {
    /// Get the current marketplace agreement for a plan, `None` if absent.
    ///
    /// # Errors
    /// Returns error on any backend failure other than not-found.
    pub async fn get_agreement(
        &self,
        cancel: &CancellationToken,
        publisher: &str,
        offer: &str,
        plan: &str,
    ) -> Result<Option<AgreementTerms>, CloudError> {
        let resource = format!("{publisher}/{offer}/{plan}");
        self.observe("marketplace_agreement_get", &resource, cancel, async {
            absent_as_none(
                self.clients
                    .marketplace_agreements
                    .get(publisher, offer, plan)
                    .await,
            )
        })
        .await
    }

    /// Mark `terms` as accepted.
    ///
    /// # Errors
    /// Returns error if the backend rejects the update.
    pub async fn accept_agreement(
        &self,
        cancel: &CancellationToken,
        publisher: &str,
        offer: &str,
        plan: &str,
        terms: &AgreementTerms,
    ) -> Result<AgreementTerms, CloudError> {
        let resource = format!("{publisher}/{offer}/{plan}");
        let mut accepted = terms.clone();
        accepted.properties.accepted = true;
        info!(publisher, offer, plan, "Accepting marketplace agreement");
        self.observe("marketplace_agreement_create", &resource, cancel, async {
            self.clients
                .marketplace_agreements
                .create(publisher, offer, plan, &accepted)
                .await
        })
        .await
    }

    /// Get marketplace image metadata, `None` if the image does not exist.
    ///
    /// The `latest` version alias is resolved to the newest listed version.
    ///
    /// # Errors
    /// Returns error on any backend failure other than not-found.
    pub async fn get_vm_image(
        &self,
        cancel: &CancellationToken,
        location: &str,
        urn: &MarketplaceUrn,
    ) -> Result<Option<VirtualMachineImage>, CloudError> {
        let resource = format!(
            "{location}/{}:{}:{}:{}",
            urn.publisher, urn.offer, urn.sku, urn.version
        );
        let images = &self.clients.virtual_machine_images;

        let version = if urn.version.eq_ignore_ascii_case(LATEST_VERSION) {
            let versions = self
                .observe("virtual_machine_image_list", &resource, cancel, async {
                    absent_as_none(
                        images
                            .list_versions(location, &urn.publisher, &urn.offer, &urn.sku)
                            .await,
                    )
                })
                .await?
                .unwrap_or_default();
            let Some(newest) = newest_version(versions.iter().map(|v| v.name.as_str())) else {
                return Ok(None);
            };
            debug!(image = %resource, version = newest, "Resolved latest image version");
            newest.to_string()
        } else {
            urn.version.clone()
        };

        self.observe("virtual_machine_image_get", &resource, cancel, async {
            absent_as_none(
                images
                    .get(location, &urn.publisher, &urn.offer, &urn.sku, &version)
                    .await,
            )
        })
        .await
    }
}

/// Newest of `versions`, comparing dot-separated components numerically.
fn newest_version<'a>(versions: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    versions.max_by_key(|version| {
        version
            .split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect::<Vec<_>>()
    })
}
