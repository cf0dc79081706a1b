//! Resource Graph discovery of machine-owned resources.
//!
//! A machine is identified by its VM name. VMs and NICs carrying both the
//! cluster and the role tag are enumerated; NIC names are mapped back to
//! their VM name so that machines whose VM is already gone still show up.

use std::collections::{BTreeSet, HashSet};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::Access;
use crate::azure::{QueryRequest, QueryRequestOptions};
use crate::error::{CloudError, MachineError};
use crate::names::vm_name_from_nic;
use crate::spec::{CLUSTER_TAG_PREFIX, ROLE_TAG_PREFIX};

const VM_RESOURCE_TYPE: &str = "microsoft.compute/virtualmachines";
const NIC_RESOURCE_TYPE: &str = "microsoft.network/networkinterfaces";

/// Result rows as an array of objects.
const RESULT_FORMAT: &str = "objectArray";

/// One query result row carrying a resource name.
#[derive(Debug, Deserialize)]
struct NameRow {
    name: String,
}

/// Build the query listing tagged resources of `resource_type` in `resource_group`.
fn tagged_resources_query(resource_type: &str, resource_group: &str) -> String {
    format!(
        "Resources \
         | where type =~ '{resource_type}' \
         | where resourceGroup =~ '{resource_group}' \
         | extend tagKeys = bag_keys(tags) \
         | where tagKeys hasprefix \"{CLUSTER_TAG_PREFIX}\" and tagKeys hasprefix \"{ROLE_TAG_PREFIX}\" \
         | project name"
    )
}

/// Run `query` across all pages, mapping each row with `map`.
///
/// Rows that do not decode or that `map` rejects are skipped. A present but
/// empty continuation token ends pagination, as does a token the backend
/// already handed out.
pub async fn query_all<R, T, F>(
    access: &Access,
    cancel: &CancellationToken,
    query: &str,
    map: F,
) -> Result<Vec<T>, CloudError>
where
    R: DeserializeOwned,
    F: Fn(R) -> Option<T>,
{
    let mut results = Vec::new();
    let mut skip_token: Option<String> = None;
    let mut seen_tokens = HashSet::new();

    loop {
        let request = QueryRequest {
            subscriptions: vec![access.subscription_id().to_string()],
            query: query.to_string(),
            options: QueryRequestOptions {
                skip_token: skip_token.take(),
                result_format: RESULT_FORMAT.to_string(),
            },
        };
        let response = access.query_resources(cancel, &request).await?;
        debug!(
            count = response.count,
            total = response.total_records,
            "Resource Graph page"
        );

        results.extend(
            response
                .data
                .into_iter()
                .filter_map(|row| serde_json::from_value::<R>(row).ok())
                .filter_map(&map),
        );

        match response.skip_token {
            Some(token) if token.is_empty() => break,
            Some(token) if !seen_tokens.insert(token.clone()) => {
                warn!(skip_token = %token, "Resource Graph repeated a continuation token, stopping");
                break;
            }
            Some(token) => skip_token = Some(token),
            None => break,
        }
    }

    Ok(results)
}

/// Names of all machines in `resource_group`, derived from tagged VMs and NICs.
///
/// # Errors
/// Returns [`MachineError::Internal`] if any query fails.
pub async fn list_machine_names(
    access: &Access,
    cancel: &CancellationToken,
    resource_group: &str,
) -> Result<BTreeSet<String>, MachineError> {
    let vm_names = query_all(
        access,
        cancel,
        &tagged_resources_query(VM_RESOURCE_TYPE, resource_group),
        |row: NameRow| Some(row.name),
    )
    .await
    .map_err(|e| discovery_error(resource_group, "virtual machines", e))?;

    let nic_vm_names = query_all(
        access,
        cancel,
        &tagged_resources_query(NIC_RESOURCE_TYPE, resource_group),
        |row: NameRow| vm_name_from_nic(&row.name).map(str::to_string),
    )
    .await
    .map_err(|e| discovery_error(resource_group, "network interfaces", e))?;

    let names: BTreeSet<String> = vm_names.into_iter().chain(nic_vm_names).collect();
    info!(resource_group, count = names.len(), "Discovered machines");
    Ok(names)
}

fn discovery_error(resource_group: &str, what: &str, err: CloudError) -> MachineError {
    match err {
        CloudError::Cancelled => MachineError::Cancelled(format!(
            "listing {what} in resource group {resource_group}"
        )),
        err => MachineError::Internal(format!(
            "listing {what} in resource group {resource_group}: {err}"
        )),
    }
}
