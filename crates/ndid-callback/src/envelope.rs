//! # Callback Envelopes
//!
//! Typed representation of every asynchronous event a node pushes to the
//! harness. The wire body is a flat JSON object with a `node_id`, a `type`
//! discriminator and type-specific fields; here it becomes a
//! [`CallbackEnvelope`] holding the emitting node and a [`Callback`] tagged
//! union, so the lifecycle model can match exhaustively on callback kinds.
//!
//! Fields use `#[serde(default)]` where node versions differ. Unknown fields
//! are ignored. Unknown `type` values (and bodies of a known type that fail
//! to decode) are preserved verbatim as [`Callback::Other`] so that nothing
//! a node sends is silently lost.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ndid_core::{AccessorId, BlockHeight, Mode, NodeId, ReferenceId, RequestId, ServiceId};

use crate::error::EnvelopeError;

// ─── Kinds ───────────────────────────────────────────────────────────

/// Discriminator of a decoded callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallbackKind {
    CreateRequestResult,
    IncomingRequest,
    ResponseResult,
    RequestStatus,
    DataRequest,
    SendDataResult,
    MessageQueueSendSuccess,
    CreateIdentityResult,
    RevokeAccessorResult,
    CloseRequestResult,
    IdentityModificationNotification,
}

impl CallbackKind {
    /// All decoded kinds.
    pub const ALL: [CallbackKind; 11] = [
        Self::CreateRequestResult,
        Self::IncomingRequest,
        Self::ResponseResult,
        Self::RequestStatus,
        Self::DataRequest,
        Self::SendDataResult,
        Self::MessageQueueSendSuccess,
        Self::CreateIdentityResult,
        Self::RevokeAccessorResult,
        Self::CloseRequestResult,
        Self::IdentityModificationNotification,
    ];

    /// Wire value of the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRequestResult => "create_request_result",
            Self::IncomingRequest => "incoming_request",
            Self::ResponseResult => "response_result",
            Self::RequestStatus => "request_status",
            Self::DataRequest => "data_request",
            Self::SendDataResult => "send_data_result",
            Self::MessageQueueSendSuccess => "message_queue_send_success",
            Self::CreateIdentityResult => "create_identity_result",
            Self::RevokeAccessorResult => "revoke_accessor_result",
            Self::CloseRequestResult => "close_request_result",
            Self::IdentityModificationNotification => "identity_modification_notification",
        }
    }

    /// Look up a kind by its wire value.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Shared field types ──────────────────────────────────────────────

/// Request status reported in `request_status` callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Confirmed,
    Rejected,
    Complicated,
    Completed,
}

impl Status {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Complicated => "complicated",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `error` object attached to failed `*_result` callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackFailure {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// One IdP's entry in `response_valid_list` (or `response_list`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdpValidity {
    pub idp_id: NodeId,
    #[serde(default)]
    pub valid_signature: Option<bool>,
    #[serde(default)]
    pub valid_ial: Option<bool>,
}

/// Per-service progress of a request's data-request line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProgress {
    pub service_id: ServiceId,
    #[serde(default)]
    pub min_as: u32,
    #[serde(default)]
    pub signed_data_count: u32,
    #[serde(default)]
    pub received_data_count: u32,
}

/// Data-request line item as seen by an IdP in `incoming_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequestItem {
    pub service_id: ServiceId,
    #[serde(default)]
    pub as_id_list: Vec<NodeId>,
    pub min_as: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_params_hash: Option<String>,
}

// ─── Callback bodies ─────────────────────────────────────────────────

/// RP: outcome of `createRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequestResult {
    pub reference_id: ReferenceId,
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_block_height: Option<BlockHeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallbackFailure>,
}

/// IdP: a new request addressed to this IdP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub request_id: RequestId,
    pub mode: Mode,
    pub request_message: String,
    pub request_message_hash: String,
    #[serde(default)]
    pub request_message_salt: Option<String>,
    pub requester_node_id: NodeId,
    pub min_ial: f64,
    pub min_aal: f64,
    #[serde(default)]
    pub data_request_list: Vec<DataRequestItem>,
    #[serde(default)]
    pub initial_salt: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub reference_group_code: Option<String>,
    #[serde(default)]
    pub creation_block_height: Option<BlockHeight>,
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

/// IdP (and AS on later node versions): outcome of an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    pub reference_id: ReferenceId,
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallbackFailure>,
}

/// RP: snapshot of a request's lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatus {
    pub request_id: RequestId,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_idp: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_idp_count: Option<u32>,
    /// Later protocol revision: the count is the length of this list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_list: Option<Vec<IdpValidity>>,
    #[serde(default)]
    pub response_valid_list: Vec<IdpValidity>,
    #[serde(default, alias = "data_request_list")]
    pub service_list: Vec<ServiceProgress>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub timed_out: bool,
    pub block_height: BlockHeight,
}

impl RequestStatus {
    /// Number of IdPs that have answered, from whichever field the node
    /// version reports.
    pub fn answered_count(&self) -> u32 {
        match (&self.answered_idp_count, &self.response_list) {
            (Some(count), _) => *count,
            (None, Some(list)) => u32::try_from(list.len()).unwrap_or(u32::MAX),
            (None, None) => 0,
        }
    }

    /// Per-IdP validity entries, from whichever field the node version
    /// reports.
    pub fn validity(&self) -> &[IdpValidity] {
        match &self.response_list {
            Some(list) if self.response_valid_list.is_empty() => list,
            _ => &self.response_valid_list,
        }
    }

    /// Progress of one service line item.
    pub fn service(&self, service_id: &ServiceId) -> Option<&ServiceProgress> {
        self.service_list.iter().find(|s| &s.service_id == service_id)
    }

    /// Whether this snapshot ends the request's lifecycle.
    pub fn is_terminal(&self) -> bool {
        self.closed || self.timed_out
    }

    /// Whether status or any counted field differs from `other`.
    ///
    /// Used for the strict block-height ordering rule: a snapshot that
    /// changes these must come from a later block.
    pub fn counted_fields_differ(&self, other: &RequestStatus) -> bool {
        if self.status != other.status || self.answered_count() != other.answered_count() {
            return true;
        }
        if self.service_list.len() != other.service_list.len() {
            return true;
        }
        self.service_list.iter().any(|mine| match other.service(&mine.service_id) {
            Some(theirs) => {
                mine.signed_data_count != theirs.signed_data_count
                    || mine.received_data_count != theirs.received_data_count
            }
            None => true,
        })
    }
}

/// AS: a data request for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub request_id: RequestId,
    pub service_id: ServiceId,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub request_params: Option<String>,
    pub requester_node_id: NodeId,
    #[serde(default)]
    pub max_ial: Option<f64>,
    #[serde(default)]
    pub max_aal: Option<f64>,
    #[serde(default)]
    pub response_signature_list: Vec<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

/// AS: outcome of `sendData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDataResult {
    pub reference_id: ReferenceId,
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallbackFailure>,
}

/// Any node: the message queue delivered an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageQueueSendSuccess {
    pub request_id: RequestId,
    pub destination_node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,
}

/// IdP: outcome of an identity creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIdentityResult {
    pub reference_id: ReferenceId,
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor_id: Option<AccessorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_group_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallbackFailure>,
}

/// Outcome of an operation that only reports success (`revokeAccessor`,
/// `closeRequest`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub reference_id: ReferenceId,
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallbackFailure>,
}

/// IdP: another IdP changed an identity this IdP also holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityModificationNotification {
    pub reference_group_code: String,
    pub action: String,
    #[serde(default)]
    pub actor_node_id: Option<NodeId>,
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

/// A body the harness could not decode into a known variant.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueCallback {
    /// The `type` value, if present.
    pub kind: Option<String>,
    /// The full body as received.
    pub payload: Value,
    /// Why decoding failed, when the `type` was a known one.
    pub decode_error: Option<String>,
    /// The `request_id`, when the body carries a valid one.
    pub request_id: Option<RequestId>,
}

impl OpaqueCallback {
    /// A top-level string field of the payload.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Best guess at the field that failed to decode.
    ///
    /// Serde names missing and unknown fields; for a bad enum value the
    /// field holding that value is looked up in the payload.
    pub fn failing_field(&self) -> Option<String> {
        let error = self.decode_error.as_deref()?;
        let quoted = |after: &str| {
            let rest = &error[error.find(after)? + after.len()..];
            rest.find('`').map(|end| rest[..end].to_string())
        };
        if let Some(field) = quoted("missing field `").or_else(|| quoted("unknown field `")) {
            return Some(field);
        }
        let value = quoted("unknown variant `")?;
        self.payload
            .as_object()?
            .iter()
            .find(|(_, v)| v.as_str() == Some(value.as_str()))
            .map(|(k, _)| k.clone())
    }
}

/// Callback body, discriminated on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Callback {
    CreateRequestResult(CreateRequestResult),
    IncomingRequest(IncomingRequest),
    ResponseResult(ResponseResult),
    RequestStatus(RequestStatus),
    DataRequest(DataRequest),
    SendDataResult(SendDataResult),
    MessageQueueSendSuccess(MessageQueueSendSuccess),
    CreateIdentityResult(CreateIdentityResult),
    RevokeAccessorResult(OperationResult),
    CloseRequestResult(OperationResult),
    IdentityModificationNotification(IdentityModificationNotification),
    #[serde(skip)]
    Other(OpaqueCallback),
}

impl Callback {
    /// Kind of a decoded body; `None` for [`Callback::Other`].
    pub fn kind(&self) -> Option<CallbackKind> {
        Some(match self {
            Self::CreateRequestResult(_) => CallbackKind::CreateRequestResult,
            Self::IncomingRequest(_) => CallbackKind::IncomingRequest,
            Self::ResponseResult(_) => CallbackKind::ResponseResult,
            Self::RequestStatus(_) => CallbackKind::RequestStatus,
            Self::DataRequest(_) => CallbackKind::DataRequest,
            Self::SendDataResult(_) => CallbackKind::SendDataResult,
            Self::MessageQueueSendSuccess(_) => CallbackKind::MessageQueueSendSuccess,
            Self::CreateIdentityResult(_) => CallbackKind::CreateIdentityResult,
            Self::RevokeAccessorResult(_) => CallbackKind::RevokeAccessorResult,
            Self::CloseRequestResult(_) => CallbackKind::CloseRequestResult,
            Self::IdentityModificationNotification(_) => {
                CallbackKind::IdentityModificationNotification
            }
            Self::Other(_) => return None,
        })
    }
}

// ─── Envelope ────────────────────────────────────────────────────────

/// A callback together with the logical node that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEnvelope {
    pub node_id: NodeId,
    pub callback: Callback,
}

impl CallbackEnvelope {
    /// Wrap a decoded callback.
    pub fn new(node_id: NodeId, callback: Callback) -> Self {
        Self { node_id, callback }
    }

    /// Decode a wire body that must carry its own `node_id`.
    pub fn from_json(body: Value) -> Result<Self, EnvelopeError> {
        let node_id = body_node_id(&body)?.ok_or(EnvelopeError::MissingNodeId)?;
        Ok(Self::decode(node_id, body))
    }

    /// Decode a wire body received on `channel`.
    ///
    /// The body's own `node_id` wins over the channel: a proxy delivers
    /// callbacks for every node behind it through one endpoint.
    pub fn from_json_on(channel: &NodeId, body: Value) -> Result<Self, EnvelopeError> {
        let node_id = body_node_id(&body)?.unwrap_or_else(|| channel.clone());
        Ok(Self::decode(node_id, body))
    }

    fn decode(node_id: NodeId, body: Value) -> Self {
        let kind_str = body.get("type").and_then(Value::as_str).map(str::to_owned);
        let request_id = body
            .get("request_id")
            .and_then(Value::as_str)
            .and_then(|raw| RequestId::new(raw).ok());
        let known = kind_str.as_deref().and_then(CallbackKind::from_wire);
        let callback = match known {
            Some(_) => match serde_json::from_value::<Callback>(body.clone()) {
                Ok(callback) => callback,
                Err(e) => Callback::Other(OpaqueCallback {
                    kind: kind_str,
                    payload: body,
                    decode_error: Some(e.to_string()),
                    request_id,
                }),
            },
            None => Callback::Other(OpaqueCallback {
                kind: kind_str,
                payload: body,
                decode_error: None,
                request_id,
            }),
        };
        Self { node_id, callback }
    }

    /// Encode back to the flat wire form.
    pub fn to_json(&self) -> Value {
        let mut object = match &self.callback {
            Callback::Other(opaque) => match &opaque.payload {
                Value::Object(map) => map.clone(),
                other => {
                    let mut map = Map::new();
                    map.insert("payload".into(), other.clone());
                    map
                }
            },
            decoded => match serde_json::to_value(decoded) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
        };
        object.insert("node_id".into(), Value::String(self.node_id.to_string()));
        Value::Object(object)
    }

    /// Kind, if decoded.
    pub fn kind(&self) -> Option<CallbackKind> {
        self.callback.kind()
    }

    /// Known kind and decode error of a body that failed to decode.
    pub fn malformed(&self) -> Option<(CallbackKind, &OpaqueCallback)> {
        match &self.callback {
            Callback::Other(opaque) if opaque.decode_error.is_some() => {
                let kind = opaque.kind.as_deref().and_then(CallbackKind::from_wire)?;
                Some((kind, opaque))
            }
            _ => None,
        }
    }

    /// Human-readable kind, including undecoded ones.
    pub fn kind_label(&self) -> &str {
        match (&self.callback, self.kind()) {
            (_, Some(kind)) => kind.as_str(),
            (Callback::Other(opaque), None) => opaque.kind.as_deref().unwrap_or("<untyped>"),
            _ => "<untyped>",
        }
    }

    /// `request_id` field, for kinds that carry one.
    pub fn request_id(&self) -> Option<&RequestId> {
        match &self.callback {
            Callback::CreateRequestResult(c) => Some(&c.request_id),
            Callback::IncomingRequest(c) => Some(&c.request_id),
            Callback::ResponseResult(c) => Some(&c.request_id),
            Callback::RequestStatus(c) => Some(&c.request_id),
            Callback::DataRequest(c) => Some(&c.request_id),
            Callback::SendDataResult(c) => Some(&c.request_id),
            Callback::MessageQueueSendSuccess(c) => Some(&c.request_id),
            Callback::CreateIdentityResult(c) => Some(&c.request_id),
            Callback::RevokeAccessorResult(c) | Callback::CloseRequestResult(c) => {
                Some(&c.request_id)
            }
            Callback::IdentityModificationNotification(c) => c.request_id.as_ref(),
            Callback::Other(opaque) => opaque.request_id.as_ref(),
        }
    }

    /// `reference_id` field, for result kinds.
    pub fn reference_id(&self) -> Option<&ReferenceId> {
        match &self.callback {
            Callback::CreateRequestResult(c) => Some(&c.reference_id),
            Callback::ResponseResult(c) => Some(&c.reference_id),
            Callback::SendDataResult(c) => Some(&c.reference_id),
            Callback::CreateIdentityResult(c) => Some(&c.reference_id),
            Callback::RevokeAccessorResult(c) | Callback::CloseRequestResult(c) => {
                Some(&c.reference_id)
            }
            _ => None,
        }
    }

    /// `destination_node_id`, for delivery confirmations.
    pub fn destination_node_id(&self) -> Option<&NodeId> {
        match &self.callback {
            Callback::MessageQueueSendSuccess(c) => Some(&c.destination_node_id),
            _ => None,
        }
    }

    /// `service_id`, for AS-side kinds.
    pub fn service_id(&self) -> Option<&ServiceId> {
        match &self.callback {
            Callback::DataRequest(c) => Some(&c.service_id),
            Callback::SendDataResult(c) => c.service_id.as_ref(),
            Callback::ResponseResult(c) => c.service_id.as_ref(),
            _ => None,
        }
    }

    /// `success` flag, for result kinds.
    pub fn success(&self) -> Option<bool> {
        match &self.callback {
            Callback::CreateRequestResult(c) => Some(c.success),
            Callback::ResponseResult(c) => Some(c.success),
            Callback::SendDataResult(c) => Some(c.success),
            Callback::CreateIdentityResult(c) => Some(c.success),
            Callback::RevokeAccessorResult(c) | Callback::CloseRequestResult(c) => {
                Some(c.success)
            }
            _ => None,
        }
    }

    /// The status snapshot, if this is a `request_status` callback.
    pub fn as_request_status(&self) -> Option<&RequestStatus> {
        match &self.callback {
            Callback::RequestStatus(status) => Some(status),
            _ => None,
        }
    }
}

fn body_node_id(body: &Value) -> Result<Option<NodeId>, EnvelopeError> {
    match body {
        Value::Object(map) => match map.get("node_id") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => NodeId::new(raw.as_str())
                .map(Some)
                .map_err(EnvelopeError::InvalidNodeId),
            Some(other) => Err(EnvelopeError::NotAString {
                field: "node_id",
                value: other.to_string(),
            }),
        },
        _ => Err(EnvelopeError::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_body() -> Value {
        json!({
            "node_id": "rp1",
            "type": "request_status",
            "request_id": "req-1",
            "status": "completed",
            "mode": 1,
            "min_idp": 1,
            "answered_idp_count": 1,
            "closed": false,
            "timed_out": false,
            "service_list": [],
            "response_valid_list": [
                {"idp_id": "idp1", "valid_signature": null, "valid_ial": null}
            ],
            "block_height": "test-chain:42"
        })
    }

    #[test]
    fn decodes_request_status() {
        let env = CallbackEnvelope::from_json(status_body()).unwrap();
        assert_eq!(env.node_id.as_str(), "rp1");
        assert_eq!(env.kind(), Some(CallbackKind::RequestStatus));
        let status = env.as_request_status().unwrap();
        assert_eq!(status.status, Status::Completed);
        assert_eq!(status.answered_count(), 1);
        assert_eq!(status.validity()[0].idp_id.as_str(), "idp1");
        assert_eq!(status.validity()[0].valid_signature, None);
        assert_eq!(status.block_height.height(), 42);
    }

    #[test]
    fn answered_count_falls_back_to_response_list() {
        let mut body = status_body();
        body.as_object_mut().unwrap().remove("answered_idp_count");
        body.as_object_mut().unwrap().remove("response_valid_list");
        body["response_list"] = json!([
            {"idp_id": "idp1", "valid_signature": true, "valid_ial": true, "status": "accept"},
            {"idp_id": "idp2", "valid_signature": true, "valid_ial": true, "status": "reject"}
        ]);
        let env = CallbackEnvelope::from_json(body).unwrap();
        let status = env.as_request_status().unwrap();
        assert_eq!(status.answered_count(), 2);
        assert_eq!(status.validity().len(), 2);
    }

    #[test]
    fn data_request_list_alias_is_accepted() {
        let mut body = status_body();
        body.as_object_mut().unwrap().remove("service_list");
        body["data_request_list"] = json!([
            {"service_id": "bank_statement", "min_as": 1, "signed_data_count": 1, "received_data_count": 0}
        ]);
        let env = CallbackEnvelope::from_json(body).unwrap();
        let status = env.as_request_status().unwrap();
        let service = status
            .service(&ServiceId::new("bank_statement").unwrap())
            .unwrap();
        assert_eq!(service.signed_data_count, 1);
        assert_eq!(service.received_data_count, 0);
    }

    #[test]
    fn unknown_type_is_preserved() {
        let body = json!({"node_id": "idp1", "type": "brand_new_event", "x": 1});
        let env = CallbackEnvelope::from_json(body.clone()).unwrap();
        assert_eq!(env.kind(), None);
        assert_eq!(env.kind_label(), "brand_new_event");
        match &env.callback {
            Callback::Other(opaque) => {
                assert_eq!(opaque.payload, body);
                assert!(opaque.decode_error.is_none());
            }
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn malformed_known_type_keeps_decode_error() {
        let body = json!({"node_id": "rp1", "type": "request_status", "request_id": "r"});
        let env = CallbackEnvelope::from_json(body).unwrap();
        match &env.callback {
            Callback::Other(opaque) => {
                assert_eq!(opaque.kind.as_deref(), Some("request_status"));
                assert!(opaque.decode_error.is_some());
            }
            other => panic!("expected Other, got {other:?}"),
        }
        assert_eq!(env.request_id().map(RequestId::as_str), Some("r"));
        let (kind, _) = env.malformed().unwrap();
        assert_eq!(kind, CallbackKind::RequestStatus);
    }

    #[test]
    fn failing_field_names_missing_and_bad_values() {
        let mut body = status_body();
        body["status"] = json!("approved");
        let env = CallbackEnvelope::from_json(body).unwrap();
        let (_, opaque) = env.malformed().unwrap();
        assert_eq!(opaque.failing_field().as_deref(), Some("status"));

        let mut body = status_body();
        body.as_object_mut().unwrap().remove("block_height");
        let env = CallbackEnvelope::from_json(body).unwrap();
        let (_, opaque) = env.malformed().unwrap();
        assert_eq!(opaque.failing_field().as_deref(), Some("block_height"));
    }

    #[test]
    fn unknown_type_is_not_malformed() {
        let env = CallbackEnvelope::from_json(json!({"node_id": "idp1", "type": "mystery"})).unwrap();
        assert!(env.malformed().is_none());
    }

    #[test]
    fn body_node_id_wins_over_channel() {
        let channel = NodeId::new("proxy1").unwrap();
        let body = json!({
            "node_id": "proxy1_rp4",
            "type": "message_queue_send_success",
            "request_id": "r1",
            "destination_node_id": "proxy1_idp4"
        });
        let env = CallbackEnvelope::from_json_on(&channel, body).unwrap();
        assert_eq!(env.node_id.as_str(), "proxy1_rp4");
        assert_eq!(env.destination_node_id().unwrap().as_str(), "proxy1_idp4");
    }

    #[test]
    fn channel_is_used_when_body_has_no_node_id() {
        let channel = NodeId::new("idp1").unwrap();
        let body = json!({
            "type": "response_result",
            "reference_id": "ref-1",
            "request_id": "r1",
            "success": true
        });
        let env = CallbackEnvelope::from_json_on(&channel, body).unwrap();
        assert_eq!(env.node_id, channel);
        assert_eq!(env.success(), Some(true));
        assert_eq!(env.reference_id().unwrap().as_str(), "ref-1");
    }

    #[test]
    fn missing_node_id_is_an_error_without_channel() {
        let body = json!({"type": "request_status"});
        assert!(matches!(
            CallbackEnvelope::from_json(body),
            Err(EnvelopeError::MissingNodeId)
        ));
        assert!(matches!(
            CallbackEnvelope::from_json(json!([1, 2])),
            Err(EnvelopeError::NotAnObject)
        ));
    }

    #[test]
    fn to_json_restores_flat_wire_form() {
        let env = CallbackEnvelope::from_json(status_body()).unwrap();
        let wire = env.to_json();
        assert_eq!(wire["type"], "request_status");
        assert_eq!(wire["node_id"], "rp1");
        assert_eq!(wire["block_height"], "test-chain:42");
        let again = CallbackEnvelope::from_json(wire).unwrap();
        assert_eq!(again, env);
    }

    #[test]
    fn counted_fields_differ_detects_service_progress() {
        let env = CallbackEnvelope::from_json(status_body()).unwrap();
        let a = env.as_request_status().unwrap().clone();
        let mut b = a.clone();
        assert!(!a.counted_fields_differ(&b));
        b.closed = true;
        assert!(!a.counted_fields_differ(&b));
        b.service_list.push(ServiceProgress {
            service_id: ServiceId::new("s").unwrap(),
            min_as: 1,
            signed_data_count: 1,
            received_data_count: 0,
        });
        assert!(a.counted_fields_differ(&b));
    }

    #[test]
    fn kind_wire_names_round_trip() {
        for kind in CallbackKind::ALL {
            assert_eq!(CallbackKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(CallbackKind::from_wire("nope"), None);
    }
}
