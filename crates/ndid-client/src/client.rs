//! HTTP implementation of [`NodeApi`].
//!
//! One `reqwest::Client` is shared across nodes; each call resolves the
//! target node's base URL from [`HarnessConfig`]. Nodes behind a proxy are
//! reached at the proxy's URL with `?node_id=` appended so the
//! proxy can dispatch.

use serde::Serialize;
use url::Url;

use ndid_core::{NodeId, RequestId, ServiceId};

use crate::api::NodeApi;
use crate::config::HarnessConfig;
use crate::error::NodeApiError;
use crate::types::{
    ApiResponse, CallbackRegistration, CloseRequestParams, CreateRequestParams,
    ErrorResponseParams, ResponseParams, RevokeAccessorParams, SendDataParams, UpdateNodeParams,
};

/// Node API client over HTTP.
#[derive(Debug, Clone)]
pub struct NdidClient {
    http: reqwest::Client,
    nodes: HarnessConfig,
}

impl NdidClient {
    /// Build a client for the nodes listed in `config`.
    pub fn new(config: &HarnessConfig) -> Result<Self, NodeApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::CONTENT_TYPE,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()
            .map_err(NodeApiError::Build)?;
        Ok(Self {
            http,
            nodes: config.clone(),
        })
    }

    /// Node ids with a configured base URL.
    pub fn configured_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.nodes.keys()
    }

    fn endpoint(&self, node: &NodeId, segments: &[&str]) -> Result<Url, NodeApiError> {
        let base = self
            .nodes
            .node_url(node)
            .ok_or_else(|| NodeApiError::UnknownNode(node.clone()))?;
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| NodeApiError::Url {
                endpoint: segments.join("/"),
                reason: format!("{base} cannot be a base URL"),
            })?
            .pop_if_empty()
            .extend(segments);
        if node.is_behind_proxy() {
            url.query_pairs_mut().append_pair("node_id", node.as_str());
        }
        Ok(url)
    }

    async fn post<B: Serialize>(
        &self,
        node: &NodeId,
        label: &str,
        segments: &[&str],
        body: &B,
    ) -> Result<ApiResponse, NodeApiError> {
        let url = self.endpoint(node, segments)?;
        self.send(node, label, self.http.post(url).json(body)).await
    }

    async fn get(
        &self,
        node: &NodeId,
        label: &str,
        segments: &[&str],
    ) -> Result<ApiResponse, NodeApiError> {
        let url = self.endpoint(node, segments)?;
        self.send(node, label, self.http.get(url)).await
    }

    async fn send(
        &self,
        node: &NodeId,
        label: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse, NodeApiError> {
        let http_err = |source| NodeApiError::Http {
            node: node.clone(),
            endpoint: label.to_string(),
            source,
        };
        let resp = request.send().await.map_err(http_err)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(http_err)?;

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| NodeApiError::Decode {
                node: node.clone(),
                endpoint: label.to_string(),
                status,
                reason: e.to_string(),
            })?
        };

        tracing::debug!(node = %node, endpoint = label, status, "node API call");
        Ok(ApiResponse::new(status, body))
    }
}

impl NodeApi for NdidClient {
    async fn create_request(
        &self,
        node: &NodeId,
        params: &CreateRequestParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.post(
            node,
            "POST /rp/requests",
            &["rp", "requests", params.namespace.as_str(), params.identifier.as_str()],
            params,
        )
        .await
    }

    async fn create_response(
        &self,
        node: &NodeId,
        params: &ResponseParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.post(node, "POST /idp/response", &["idp", "response"], params)
            .await
    }

    async fn create_error_response(
        &self,
        node: &NodeId,
        params: &ErrorResponseParams,
    ) -> Result<ApiResponse, NodeApiError> {
        match &params.service_id {
            Some(service_id) => {
                self.post(
                    node,
                    "POST /as/error",
                    &["as", "error", params.request_id.as_str(), service_id.as_str()],
                    params,
                )
                .await
            }
            None => {
                self.post(
                    node,
                    "POST /idp/error_response",
                    &["idp", "error_response"],
                    params,
                )
                .await
            }
        }
    }

    async fn send_data(
        &self,
        node: &NodeId,
        params: &SendDataParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.post(
            node,
            "POST /as/data",
            &[
                "as",
                "data",
                params.request_id.as_str(),
                params.service_id.as_str(),
            ],
            params,
        )
        .await
    }

    async fn close_request(
        &self,
        node: &NodeId,
        params: &CloseRequestParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.post(node, "POST /rp/requests/close", &["rp", "requests", "close"], params)
            .await
    }

    async fn revoke_accessor(
        &self,
        node: &NodeId,
        params: &RevokeAccessorParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.post(
            node,
            "POST /identity/accessors_revoke",
            &[
                "identity",
                params.namespace.as_str(),
                params.identifier.as_str(),
                "accessors_revoke",
            ],
            params,
        )
        .await
    }

    async fn update_node(
        &self,
        node: &NodeId,
        params: &UpdateNodeParams,
    ) -> Result<ApiResponse, NodeApiError> {
        #[derive(Serialize)]
        struct Body<'a> {
            node_id: &'a NodeId,
            #[serde(flatten)]
            params: &'a UpdateNodeParams,
        }
        self.post(
            node,
            "POST /dpki/node/update",
            &["dpki", "node", "update"],
            &Body {
                node_id: node,
                params,
            },
        )
        .await
    }

    async fn set_callbacks(
        &self,
        node: &NodeId,
        registration: &CallbackRegistration,
    ) -> Result<ApiResponse, NodeApiError> {
        #[derive(Serialize)]
        struct Body<'a> {
            node_id: &'a NodeId,
            #[serde(flatten)]
            registration: &'a CallbackRegistration,
        }
        let role = node.role().map(|r| r.as_str()).unwrap_or("rp");
        let body = Body {
            node_id: node,
            registration,
        };
        self.post(node, "POST /callback", &[role, "callback"], &body)
            .await
    }

    async fn get_request(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.get(
            node,
            "GET /utility/requests",
            &["utility", "requests", request_id.as_str()],
        )
        .await
    }

    async fn get_relevant_idp_nodes_by_sid(
        &self,
        node: &NodeId,
        namespace: &str,
        identifier: &str,
    ) -> Result<ApiResponse, NodeApiError> {
        self.get(
            node,
            "GET /utility/idp",
            &["utility", "idp", namespace, identifier],
        )
        .await
    }

    async fn get_as_nodes_by_service(
        &self,
        node: &NodeId,
        service_id: &ServiceId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.get(
            node,
            "GET /utility/as",
            &["utility", "as", service_id.as_str()],
        )
        .await
    }

    async fn get_data_from_as(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.get(
            node,
            "GET /rp/requests/data",
            &["rp", "requests", "data", request_id.as_str()],
        )
        .await
    }

    async fn remove_private_messages(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.post(
            node,
            "POST /utility/private_messages/housekeeping",
            &[
                "utility",
                "private_messages",
                request_id.as_str(),
                "housekeeping",
            ],
            &serde_json::json!({ "node_id": node }),
        )
        .await
    }
}
