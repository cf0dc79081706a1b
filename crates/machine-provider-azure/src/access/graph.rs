//! Resource Graph access.

use tokio_util::sync::CancellationToken;

use super::Access;
use crate::azure::{QueryRequest, QueryResponse};
use crate::error::CloudError;

impl Access {
    /// Run one page of a Resource Graph query.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub async fn query_resources(
        &self,
        cancel: &CancellationToken,
        request: &QueryRequest,
    ) -> Result<QueryResponse, CloudError> {
        let scope = request.subscriptions.join(",");
        self.observe("resource_graph_query", &scope, cancel, async {
            self.clients.resource_graph.resources(request).await
        })
        .await
    }
}
