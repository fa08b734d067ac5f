//! Request bodies and the response wrapper.
//!
//! Bodies mirror the node API's JSON shapes (snake_case). Every body names
//! the `node_id` the call acts as, so a proxy can serve several nodes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ndid_core::{AccessorId, Mode, NodeId, ReferenceId, RequestId, ServiceId};

/// Status and JSON body of a node API call.
///
/// A non-2xx status is a normal outcome here; callers decide whether it
/// was expected.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// `Value::Null` for empty bodies.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// `202 Accepted` with an empty body.
    pub fn accepted() -> Self {
        Self::new(202, Value::Null)
    }

    /// `204 No Content`.
    pub fn no_content() -> Self {
        Self::new(204, Value::Null)
    }

    /// `400` carrying a protocol error code.
    pub fn bad_request(code: i64, message: &str) -> Self {
        Self::new(
            400,
            serde_json::json!({ "error": { "code": code, "message": message } }),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `error.code` from an error body.
    pub fn error_code(&self) -> Option<i64> {
        self.body.get("error")?.get("code")?.as_i64()
    }

    /// `error.message` from an error body.
    pub fn error_message(&self) -> Option<&str> {
        self.body.get("error")?.get("message")?.as_str()
    }

    /// A top-level string field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key)?.as_str()
    }

    /// `request_id` from a create-request response.
    pub fn request_id(&self) -> Option<RequestId> {
        RequestId::new(self.str_field("request_id")?).ok()
    }

    /// `initial_salt` from a create-request response.
    pub fn initial_salt(&self) -> Option<&str> {
        self.str_field("initial_salt")
    }

    /// Decode the body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

impl std::fmt::Display for ApiResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.error_code(), self.error_message()) {
            (Some(code), Some(message)) => write!(f, "{} (error {code}: {message})", self.status),
            (Some(code), None) => write!(f, "{} (error {code})", self.status),
            _ => write!(f, "{}", self.status),
        }
    }
}

/// One AS-bound line item of a data request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequestParams {
    pub service_id: ServiceId,
    #[serde(default)]
    pub as_id_list: Vec<NodeId>,
    pub min_as: u32,
    #[serde(default)]
    pub request_params: String,
}

/// RP: `POST /rp/requests/{namespace}/{identifier}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequestParams {
    pub node_id: NodeId,
    pub reference_id: ReferenceId,
    pub callback_url: String,
    pub mode: Mode,
    pub namespace: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub idp_id_list: Vec<NodeId>,
    #[serde(default)]
    pub data_request_list: Vec<DataRequestParams>,
    pub request_message: String,
    pub min_ial: f64,
    pub min_aal: f64,
    pub min_idp: u32,
    pub request_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_identity_check: Option<bool>,
}

/// Accept or reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accept,
    Reject,
}

/// IdP: `POST /idp/response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseParams {
    pub node_id: NodeId,
    pub reference_id: ReferenceId,
    pub callback_url: String,
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub ial: f64,
    pub aal: f64,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor_id: Option<AccessorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// IdP or AS: `POST /idp/error_response` or `/as/error/{request_id}/{service_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponseParams {
    pub node_id: NodeId,
    pub reference_id: ReferenceId,
    pub callback_url: String,
    pub request_id: RequestId,
    pub error_code: i64,
    /// Set for AS error answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
}

/// AS: `POST /as/data/{request_id}/{service_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDataParams {
    pub node_id: NodeId,
    pub reference_id: ReferenceId,
    pub callback_url: String,
    pub request_id: RequestId,
    pub service_id: ServiceId,
    pub data: String,
}

/// RP: `POST /rp/requests/close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRequestParams {
    pub node_id: NodeId,
    pub reference_id: ReferenceId,
    pub callback_url: String,
    pub request_id: RequestId,
}

/// IdP: `POST /identity/{namespace}/{identifier}/accessors_revoke`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokeAccessorParams {
    pub node_id: NodeId,
    pub reference_id: ReferenceId,
    pub callback_url: String,
    pub namespace: String,
    pub identifier: String,
    pub accessor_id: AccessorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_message: Option<String>,
}

/// Any node: `POST /dpki/node/update`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateNodeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_master_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_request_message_data_url_type_list: Option<Vec<String>>,
}

/// Callback URLs a node delivers to: `POST /{role}/callback`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallbackRegistration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_request_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_modification_notification_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_request_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_queue_send_success_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_url: Option<String>,
}

impl CallbackRegistration {
    /// Route every callback kind the node's role emits to `url`.
    pub fn all_to(node_id: &NodeId, url: &str) -> Self {
        use ndid_core::Role;
        let url = Some(url.to_string());
        let role = node_id.role();
        Self {
            incoming_request_url: matches!(role, Some(Role::Idp)).then(|| url.clone()).flatten(),
            identity_modification_notification_url: matches!(role, Some(Role::Idp))
                .then(|| url.clone())
                .flatten(),
            data_request_url: matches!(role, Some(Role::As)).then(|| url.clone()).flatten(),
            message_queue_send_success_url: url.clone(),
            error_url: url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_code_and_message() {
        let resp = ApiResponse::bad_request(20003, "request not found");
        assert!(!resp.is_success());
        assert_eq!(resp.error_code(), Some(20003));
        assert_eq!(resp.error_message(), Some("request not found"));
        assert_eq!(resp.to_string(), "400 (error 20003: request not found)");
    }

    #[test]
    fn create_request_response_fields() {
        let resp = ApiResponse::new(202, json!({"request_id": "r-1", "initial_salt": "s"}));
        assert!(resp.is_success());
        assert_eq!(resp.request_id().unwrap().as_str(), "r-1");
        assert_eq!(resp.initial_salt(), Some("s"));
        assert_eq!(ApiResponse::no_content().request_id(), None);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let params = ResponseParams {
            node_id: NodeId::new("idp1").unwrap(),
            reference_id: ReferenceId::new("ref").unwrap(),
            callback_url: "http://h/callback/idp1".into(),
            request_id: RequestId::new("r1").unwrap(),
            namespace: None,
            identifier: None,
            ial: 2.3,
            aal: 3.0,
            status: ResponseStatus::Accept,
            accessor_id: None,
            signature: None,
        };
        let v = serde_json::to_value(&params).unwrap();
        assert_eq!(v["status"], "accept");
        assert!(v.get("signature").is_none());
        assert!(v.get("accessor_id").is_none());
    }

    #[test]
    fn registration_follows_role() {
        let idp = CallbackRegistration::all_to(&NodeId::new("idp1").unwrap(), "u");
        assert_eq!(idp.incoming_request_url.as_deref(), Some("u"));
        assert!(idp.data_request_url.is_none());

        let as_node = CallbackRegistration::all_to(&NodeId::new("as1").unwrap(), "u");
        assert_eq!(as_node.data_request_url.as_deref(), Some("u"));
        assert!(as_node.incoming_request_url.is_none());

        let rp = CallbackRegistration::all_to(&NodeId::new("rp1").unwrap(), "u");
        assert_eq!(rp.message_queue_send_success_url.as_deref(), Some("u"));
        assert!(rp.incoming_request_url.is_none());
    }
}
