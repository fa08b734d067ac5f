//! Pointing nodes at the callback receiver before a run.

use ndid_client::{CallbackRegistration, HarnessConfig, NodeApi};
use ndid_core::{NodeId, Role};

use crate::error::FlowError;

/// Register the receiver's per-node URL as every callback URL of `nodes`.
///
/// Only RP, IdP and AS nodes take callbacks; proxies and the NDID node
/// are skipped.
pub async fn register_callbacks<'n, A: NodeApi>(
    api: &A,
    config: &HarnessConfig,
    nodes: impl IntoIterator<Item = &'n NodeId>,
) -> Result<usize, FlowError> {
    let mut registered = 0;
    for node in nodes {
        if !matches!(node.role(), Some(Role::Rp | Role::Idp | Role::As)) {
            continue;
        }
        let url = config.callback_url(node);
        let response = api
            .set_callbacks(node, &CallbackRegistration::all_to(node, &url))
            .await?;
        if !response.is_success() {
            return Err(FlowError::UnexpectedApiOutcome {
                step: format!("register callbacks on {node}"),
                expected: "2xx".into(),
                actual: response.to_string(),
            });
        }
        tracing::debug!(node = %node, %url, "callbacks registered");
        registered += 1;
    }
    tracing::info!(registered, "callback URLs registered");
    Ok(registered)
}
