//! The protocol API seam.
//!
//! Flows talk to nodes only through [`NodeApi`]. [`crate::NdidClient`] is
//! the HTTP implementation; tests substitute an in-process platform.

use ndid_core::{NodeId, RequestId, ServiceId};

use crate::error::NodeApiError;
use crate::types::{
    ApiResponse, CallbackRegistration, CloseRequestParams, CreateRequestParams,
    ErrorResponseParams, ResponseParams, RevokeAccessorParams, SendDataParams, UpdateNodeParams,
};

/// Operations the harness invokes on platform nodes.
///
/// Every call names the node it targets. Calls are not retried; an `Err`
/// means no HTTP status was obtained.
#[allow(async_fn_in_trait)]
pub trait NodeApi {
    /// RP creates a request. `202` carries `request_id` and `initial_salt`.
    async fn create_request(
        &self,
        node: &NodeId,
        params: &CreateRequestParams,
    ) -> Result<ApiResponse, NodeApiError>;

    /// IdP answers with accept or reject.
    async fn create_response(
        &self,
        node: &NodeId,
        params: &ResponseParams,
    ) -> Result<ApiResponse, NodeApiError>;

    /// IdP or AS answers with an error code.
    async fn create_error_response(
        &self,
        node: &NodeId,
        params: &ErrorResponseParams,
    ) -> Result<ApiResponse, NodeApiError>;

    /// AS sends data for one service.
    async fn send_data(
        &self,
        node: &NodeId,
        params: &SendDataParams,
    ) -> Result<ApiResponse, NodeApiError>;

    /// RP closes a request.
    async fn close_request(
        &self,
        node: &NodeId,
        params: &CloseRequestParams,
    ) -> Result<ApiResponse, NodeApiError>;

    /// IdP revokes an accessor.
    async fn revoke_accessor(
        &self,
        node: &NodeId,
        params: &RevokeAccessorParams,
    ) -> Result<ApiResponse, NodeApiError>;

    /// Update a node's keys or supported features.
    async fn update_node(
        &self,
        node: &NodeId,
        params: &UpdateNodeParams,
    ) -> Result<ApiResponse, NodeApiError>;

    /// Register where the node delivers callbacks.
    async fn set_callbacks(
        &self,
        node: &NodeId,
        registration: &CallbackRegistration,
    ) -> Result<ApiResponse, NodeApiError>;

    /// Read a request's current on-chain state.
    async fn get_request(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError>;

    /// IdPs able to answer for `namespace`/`identifier`.
    async fn get_relevant_idp_nodes_by_sid(
        &self,
        node: &NodeId,
        namespace: &str,
        identifier: &str,
    ) -> Result<ApiResponse, NodeApiError>;

    /// AS nodes offering `service_id`.
    async fn get_as_nodes_by_service(
        &self,
        node: &NodeId,
        service_id: &ServiceId,
    ) -> Result<ApiResponse, NodeApiError>;

    /// RP reads data collected for a request.
    async fn get_data_from_as(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError>;

    /// Drop the node's stored private messages for a request.
    async fn remove_private_messages(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError>;
}
