//! In-process simulated platform shared by the integration tests.
//!
//! [`SimPlatform`] implements [`NodeApi`] for every node at once. Each call
//! updates the simulated chain state and queues the callbacks a real
//! platform would emit; a background task delivers them in order, either
//! straight onto a [`CallbackHub`] or over HTTP to the callback URLs the
//! nodes were registered with. [`Fault`]s make the platform misbehave in
//! ways the harness must catch.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ndid_callback::{CallbackEnvelope, CallbackHub};
use ndid_client::{
    ApiResponse, CallbackRegistration, CloseRequestParams, CreateRequestParams,
    ErrorResponseParams, HarnessConfig, NodeApi, NodeApiError, ResponseParams, ResponseStatus,
    RevokeAccessorParams, SendDataParams, UpdateNodeParams,
};
use ndid_core::{AccessorId, Mode, NodeId, RequestId, ServiceId};
use ndid_crypto::{
    derive_request_message_salt, hash, request_message_hash, AccessorKeyPair, AccessorPublicKey,
};

pub const CHAIN_ID: &str = "sim-chain";

// Error codes the simulated platform refuses calls with.
pub const REQUEST_NOT_FOUND: i64 = 20012;
pub const REQUEST_CLOSED: i64 = 20025;
pub const NOT_ADDRESSED: i64 = 20038;
pub const ALREADY_ANSWERED: i64 = 20010;
pub const IAL_TOO_LOW: i64 = 20055;
pub const AAL_TOO_LOW: i64 = 20056;
pub const SIGNATURE_REQUIRED: i64 = 20003;
pub const UNKNOWN_ACCESSOR: i64 = 20011;
pub const INVALID_SIGNATURE: i64 = 20027;
pub const SERVICE_NOT_REQUESTED: i64 = 20037;
pub const DATA_NOT_EXPECTED: i64 = 20041;
pub const CREATE_DISABLED: i64 = 25001;

/// Seed of the accessor key `idp1` answers mode 2 and 3 requests with.
pub const IDP1_SEED: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
/// Seed of the accessor key `idp2` answers with.
pub const IDP2_SEED: &str = "ICEiIyQlJicoKSorLC0uLzAxMjM0NTY3ODk6Ozw9Pj8=";

pub fn node(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

pub fn service(id: &str) -> ServiceId {
    ServiceId::new(id).unwrap()
}

pub fn public_key(seed: &str) -> AccessorPublicKey {
    AccessorKeyPair::from_seed_base64(seed).unwrap().public_key()
}

/// Local harness configuration with every step budget set to `budget_secs`.
pub fn config(budget_secs: u64) -> HarnessConfig {
    let mut config = HarnessConfig::local(19_000).unwrap();
    config.step_timeout_secs = Some(budget_secs);
    config
}

/// Print harness logs when a test runs with `RUST_LOG` set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Where queued callbacks go.
#[derive(Clone)]
pub enum Delivery {
    /// Publish decoded envelopes directly.
    Hub(CallbackHub),
    /// POST to the URL each node registered through `set_callbacks`.
    Http,
}

/// Ways to make the platform misbehave.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Never deliver callbacks of `kind` emitted by `node`.
    Drop { node: NodeId, kind: &'static str },
    /// Closed snapshots report one answer fewer than the snapshot before.
    RegressClosedCount,
    /// Mode 1 validity entries claim a verified signature and IAL.
    MisreportValidity,
    /// Status snapshots stay on the first block.
    StallBlockHeight,
    /// `createRequest` is refused.
    FailCreate,
    /// Every call to `node` fails without an HTTP status.
    Unreachable(NodeId),
    /// `request_status` bodies carry `status` set to this unknown value.
    CorruptStatus(&'static str),
    /// Every delivery confirmation `node` emits is sent twice.
    DuplicateDelivery(NodeId),
}

#[derive(Default)]
struct Faults {
    dropped: Vec<(NodeId, &'static str)>,
    regress_closed_count: bool,
    misreport_validity: bool,
    fail_create: bool,
    unreachable: Vec<NodeId>,
    corrupt_status: Option<&'static str>,
    duplicated: Vec<NodeId>,
}

impl Faults {
    fn drops(&self, node: &NodeId, kind: &str) -> bool {
        self.dropped.iter().any(|(n, k)| n == node && *k == kind)
    }

    /// Apply body faults; returns how many copies to send.
    fn tamper(&self, node: &NodeId, kind: &str, body: &mut Value) -> usize {
        match kind {
            "request_status" => {
                if let Some(status) = self.corrupt_status {
                    body["status"] = json!(status);
                }
                1
            }
            "message_queue_send_success" if self.duplicated.contains(node) => 2,
            _ => 1,
        }
    }
}

struct Chain {
    height: u64,
    stalled: bool,
}

impl Chain {
    fn advance(&mut self) -> String {
        if !self.stalled || self.height == 0 {
            self.height += 1;
        }
        self.current()
    }

    fn current(&self) -> String {
        format!("{CHAIN_ID}:{}", self.height)
    }
}

struct IdpEntry {
    max_ial: f64,
    max_aal: f64,
    accessors: BTreeMap<AccessorId, AccessorPublicKey>,
}

#[derive(Clone, Copy, PartialEq)]
enum Answered {
    Accept,
    Reject,
    Error,
}

struct IdpAnswer {
    idp: NodeId,
    answer: Answered,
    valid_signature: Option<bool>,
    valid_ial: Option<bool>,
}

struct ServiceState {
    service_id: ServiceId,
    as_nodes: Vec<NodeId>,
    min_as: u32,
    request_params: String,
    signed: u32,
    received: u32,
    answered: Vec<NodeId>,
}

struct SimRequest {
    request_id: RequestId,
    rp: NodeId,
    mode: Mode,
    namespace: String,
    identifier: String,
    message: String,
    message_hash: String,
    min_ial: f64,
    min_aal: f64,
    min_idp: u32,
    idps: Vec<NodeId>,
    services: Vec<ServiceState>,
    answers: Vec<IdpAnswer>,
    signatures: Vec<String>,
    data: Vec<Value>,
    data_phase: bool,
    closed: bool,
    timed_out: bool,
    last_answered: u32,
}

impl SimRequest {
    fn count(&self, answer: Answered) -> u32 {
        self.answers.iter().filter(|a| a.answer == answer).count() as u32
    }

    fn answered(&self) -> u32 {
        self.answers.len() as u32
    }

    /// Enough IdPs accepted and none rejected.
    fn consented(&self) -> bool {
        self.count(Answered::Reject) == 0 && self.count(Answered::Accept) >= self.min_idp
    }

    fn data_done(&self) -> bool {
        self.services
            .iter()
            .all(|s| s.signed == s.min_as && s.received == s.min_as)
    }

    fn status(&self) -> &'static str {
        let accepted = self.count(Answered::Accept);
        let rejected = self.count(Answered::Reject);
        match (accepted, rejected) {
            (0, 0) => "pending",
            (_, 0) if self.consented() && self.data_done() => "completed",
            (_, 0) => "confirmed",
            (0, _) => "rejected",
            _ => "complicated",
        }
    }

    fn is_terminal(&self) -> bool {
        match self.status() {
            "completed" => true,
            "rejected" | "complicated" => self.answered() >= self.min_idp,
            _ => false,
        }
    }

    fn is_open(&self) -> bool {
        !self.closed && !self.timed_out
    }

    fn snapshot(&self, block_height: String, answered: u32) -> Value {
        let validity: Vec<Value> = self
            .answers
            .iter()
            .map(|a| {
                json!({
                    "idp_id": a.idp.as_str(),
                    "valid_signature": a.valid_signature,
                    "valid_ial": a.valid_ial,
                })
            })
            .collect();
        let services: Vec<Value> = self
            .services
            .iter()
            .map(|s| {
                json!({
                    "service_id": s.service_id.as_str(),
                    "min_as": s.min_as,
                    "signed_data_count": s.signed,
                    "received_data_count": s.received,
                })
            })
            .collect();
        json!({
            "request_id": self.request_id.as_str(),
            "status": self.status(),
            "mode": self.mode.as_u8(),
            "min_idp": self.min_idp,
            "answered_idp_count": answered,
            "response_valid_list": validity,
            "service_list": services,
            "closed": self.closed,
            "timed_out": self.timed_out,
            "block_height": block_height,
        })
    }

    fn service_mut(&mut self, service_id: &ServiceId) -> Option<&mut ServiceState> {
        self.services.iter_mut().find(|s| &s.service_id == service_id)
    }
}

struct State {
    idps: BTreeMap<NodeId, IdpEntry>,
    catalog: BTreeMap<NodeId, Vec<ServiceId>>,
    callbacks: BTreeMap<NodeId, String>,
    requests: BTreeMap<RequestId, SimRequest>,
    next_request: u64,
    chain: Chain,
    faults: Faults,
}

impl State {
    fn relevant_idps(&self, min_ial: f64, min_aal: f64) -> Vec<NodeId> {
        self.idps
            .iter()
            .filter(|(_, e)| e.max_ial >= min_ial && e.max_aal >= min_aal)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn serving(&self, service_id: &ServiceId) -> Vec<NodeId> {
        self.catalog
            .iter()
            .filter(|(_, services)| services.contains(service_id))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Callbacks produced by one API call, flushed once the call is done.
#[derive(Default)]
struct Outbox(Vec<(NodeId, Value)>);

impl Outbox {
    fn push(&mut self, node: &NodeId, kind: &str, mut body: Value) {
        body["node_id"] = json!(node.as_str());
        body["type"] = json!(kind);
        self.0.push((node.clone(), body));
    }

    fn delivery(&mut self, source: &NodeId, request_id: &RequestId, destination: &NodeId) {
        self.push(
            source,
            "message_queue_send_success",
            json!({
                "request_id": request_id.as_str(),
                "destination_node_id": destination.as_str(),
                "destination_ip": "127.0.0.1",
                "destination_port": 8000,
            }),
        );
    }

    fn status(&mut self, request: &SimRequest, block_height: String, answered: u32) {
        self.push(
            &request.rp,
            "request_status",
            request.snapshot(block_height, answered),
        );
    }
}

struct Inner {
    state: Mutex<State>,
    events: mpsc::UnboundedSender<(Option<String>, Value)>,
    http: bool,
    calls: AtomicUsize,
}

impl Inner {
    fn flush(&self, state: &State, outbox: Outbox) {
        for (node, mut body) in outbox.0 {
            let kind = body["type"].as_str().unwrap_or_default().to_string();
            if state.faults.drops(&node, &kind) {
                continue;
            }
            let copies = state.faults.tamper(&node, &kind, &mut body);
            let url = if self.http {
                match state.callbacks.get(&node) {
                    Some(url) => Some(url.clone()),
                    None => continue,
                }
            } else {
                None
            };
            for _ in 1..copies {
                let _ = self.events.send((url.clone(), body.clone()));
            }
            let _ = self.events.send((url, body));
        }
    }

    /// Emit the status snapshot after a change, then close the request if
    /// the change made it terminal.
    fn settle(state: &mut State, request_id: &RequestId, outbox: &mut Outbox) {
        let State {
            requests,
            chain,
            faults,
            ..
        } = state;
        let Some(request) = requests.get_mut(request_id) else {
            return;
        };
        outbox.status(request, chain.advance(), request.answered());
        request.last_answered = request.answered();
        if request.is_terminal() {
            request.closed = true;
            let answered = if faults.regress_closed_count {
                request.last_answered.saturating_sub(1)
            } else {
                request.last_answered
            };
            outbox.status(request, chain.advance(), answered);
        }
    }

    fn expire(&self, request_id: &RequestId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut outbox = Outbox::default();
        if let Some(request) = state.requests.get_mut(request_id) {
            if request.is_open() {
                request.timed_out = true;
                outbox.status(request, state.chain.advance(), request.answered());
            }
        }
        self.flush(state, outbox);
    }
}

/// A whole simulated network behind one [`NodeApi`].
#[derive(Clone)]
pub struct SimPlatform {
    inner: Arc<Inner>,
}

impl SimPlatform {
    /// Three IdPs (`idp1`..`idp3`, IAL/AAL up to 3) and two AS nodes
    /// (`as1`, `as2`) that both serve `bank_statement` and
    /// `customer_info`. Must be called inside a Tokio runtime.
    pub fn new(delivery: Delivery) -> Self {
        let mut idps = BTreeMap::new();
        for id in ["idp1", "idp2", "idp3"] {
            idps.insert(
                node(id),
                IdpEntry {
                    max_ial: 3.0,
                    max_aal: 3.0,
                    accessors: BTreeMap::new(),
                },
            );
        }
        let mut catalog = BTreeMap::new();
        for id in ["as1", "as2"] {
            catalog.insert(node(id), vec![service("bank_statement"), service("customer_info")]);
        }

        let (events, rx) = mpsc::unbounded_channel();
        let http = matches!(delivery, Delivery::Http);
        tokio::spawn(deliver(rx, delivery));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    idps,
                    catalog,
                    callbacks: BTreeMap::new(),
                    requests: BTreeMap::new(),
                    next_request: 0,
                    chain: Chain {
                        height: 0,
                        stalled: false,
                    },
                    faults: Faults::default(),
                }),
                events,
                http,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Platform with `idp1` and `idp2` holding the accessor keys of
    /// [`IDP1_SEED`] and [`IDP2_SEED`].
    pub fn with_default_accessors(delivery: Delivery) -> Self {
        Self::new(delivery)
            .with_accessor("idp1", "acc-idp1", public_key(IDP1_SEED))
            .with_accessor("idp2", "acc-idp2", public_key(IDP2_SEED))
    }

    /// Add or replace an IdP with the given assurance levels.
    pub fn with_idp(self, id: &str, max_ial: f64, max_aal: f64) -> Self {
        self.inner.state.lock().idps.insert(
            node(id),
            IdpEntry {
                max_ial,
                max_aal,
                accessors: BTreeMap::new(),
            },
        );
        self
    }

    pub fn with_accessor(self, idp: &str, accessor_id: &str, key: AccessorPublicKey) -> Self {
        if let Some(entry) = self.inner.state.lock().idps.get_mut(&node(idp)) {
            entry
                .accessors
                .insert(AccessorId::new(accessor_id).unwrap(), key);
        }
        self
    }

    pub fn with_fault(self, fault: Fault) -> Self {
        {
            let mut state = self.inner.state.lock();
            match fault {
                Fault::Drop { node, kind } => state.faults.dropped.push((node, kind)),
                Fault::RegressClosedCount => state.faults.regress_closed_count = true,
                Fault::MisreportValidity => state.faults.misreport_validity = true,
                Fault::StallBlockHeight => state.chain.stalled = true,
                Fault::FailCreate => state.faults.fail_create = true,
                Fault::Unreachable(node) => state.faults.unreachable.push(node),
                Fault::CorruptStatus(status) => state.faults.corrupt_status = Some(status),
                Fault::DuplicateDelivery(node) => state.faults.duplicated.push(node),
            }
        }
        self
    }

    /// API calls received so far.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Whether `node` registered a callback URL.
    pub fn registered(&self, node: &NodeId) -> Option<String> {
        self.inner.state.lock().callbacks.get(node).cloned()
    }

    fn call(&self, node: &NodeId, endpoint: &str) -> Result<(), NodeApiError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.state.lock().faults.unreachable.contains(node) {
            return Err(NodeApiError::Transport {
                node: node.clone(),
                endpoint: endpoint.to_string(),
                reason: "simulated outage".into(),
            });
        }
        Ok(())
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<(Option<String>, Value)>, delivery: Delivery) {
    let client = reqwest::Client::new();
    while let Some((url, body)) = rx.recv().await {
        match (&delivery, url) {
            (Delivery::Hub(hub), _) => match CallbackEnvelope::from_json(body) {
                Ok(envelope) => {
                    hub.publish(&envelope);
                }
                Err(e) => panic!("simulated platform built an undeliverable callback: {e}"),
            },
            (Delivery::Http, Some(url)) => {
                let sent = client.post(&url).json(&body).send().await;
                assert!(sent.is_ok(), "callback POST to {url} failed: {sent:?}");
            }
            (Delivery::Http, None) => {}
        }
        tokio::task::yield_now().await;
    }
}

fn refuse(code: i64, message: &str) -> Result<ApiResponse, NodeApiError> {
    Ok(ApiResponse::bad_request(code, message))
}

impl NodeApi for SimPlatform {
    async fn create_request(
        &self,
        node: &NodeId,
        params: &CreateRequestParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "create_request")?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.faults.fail_create {
            return refuse(CREATE_DISABLED, "request creation is disabled");
        }

        state.next_request += 1;
        let n = state.next_request;
        let request_id = RequestId::new(format!("req-{n}")).unwrap();
        let initial_salt = format!("salt-{n}");
        let salt = derive_request_message_salt(&request_id, &initial_salt);
        let message_hash = request_message_hash(&params.request_message, &salt);

        let idps = if params.idp_id_list.is_empty() {
            state.relevant_idps(params.min_ial, params.min_aal)
        } else {
            params.idp_id_list.clone()
        };
        let services: Vec<ServiceState> = params
            .data_request_list
            .iter()
            .map(|item| ServiceState {
                service_id: item.service_id.clone(),
                as_nodes: if item.as_id_list.is_empty() {
                    state.serving(&item.service_id)
                } else {
                    item.as_id_list.clone()
                },
                min_as: item.min_as,
                request_params: item.request_params.clone(),
                signed: 0,
                received: 0,
                answered: Vec::new(),
            })
            .collect();

        let request = SimRequest {
            request_id: request_id.clone(),
            rp: node.clone(),
            mode: params.mode,
            namespace: params.namespace.clone(),
            identifier: params.identifier.clone(),
            message: params.request_message.clone(),
            message_hash: message_hash.clone(),
            min_ial: params.min_ial,
            min_aal: params.min_aal,
            min_idp: params.min_idp,
            idps,
            services,
            answers: Vec::new(),
            signatures: Vec::new(),
            data: Vec::new(),
            data_phase: false,
            closed: false,
            timed_out: false,
            last_answered: 0,
        };

        let mut outbox = Outbox::default();
        let created_at = state.chain.advance();
        outbox.push(
            node,
            "create_request_result",
            json!({
                "reference_id": params.reference_id.as_str(),
                "request_id": request_id.as_str(),
                "success": true,
                "creation_block_height": created_at,
            }),
        );
        outbox.status(&request, state.chain.advance(), 0);
        for idp in &request.idps {
            outbox.delivery(node, &request_id, idp);
        }
        let data_request_list: Vec<Value> = request
            .services
            .iter()
            .map(|s| {
                json!({
                    "service_id": s.service_id.as_str(),
                    "as_id_list": s.as_nodes.iter().map(NodeId::as_str).collect::<Vec<_>>(),
                    "min_as": s.min_as,
                    "request_params_hash": hash(&s.request_params),
                })
            })
            .collect();
        for idp in &request.idps {
            outbox.push(
                idp,
                "incoming_request",
                json!({
                    "request_id": request_id.as_str(),
                    "mode": request.mode.as_u8(),
                    "request_message": request.message,
                    "request_message_hash": message_hash,
                    "request_message_salt": salt,
                    "requester_node_id": node.as_str(),
                    "min_ial": request.min_ial,
                    "min_aal": request.min_aal,
                    "data_request_list": data_request_list,
                    "initial_salt": initial_salt,
                    "namespace": request.namespace,
                    "identifier": request.identifier,
                    "creation_block_height": created_at,
                    "request_timeout": params.request_timeout,
                }),
            );
        }
        state.requests.insert(request_id.clone(), request);
        self.inner.flush(state, outbox);
        drop(guard);

        let inner = Arc::clone(&self.inner);
        let expires = request_id.clone();
        let timeout = Duration::from_secs(params.request_timeout);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.expire(&expires);
        });

        Ok(ApiResponse::new(
            202,
            json!({ "request_id": request_id.as_str(), "initial_salt": initial_salt }),
        ))
    }

    async fn create_response(
        &self,
        node: &NodeId,
        params: &ResponseParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "create_response")?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let misreport = state.faults.misreport_validity;
        let Some(request) = state.requests.get_mut(&params.request_id) else {
            return refuse(REQUEST_NOT_FOUND, "request not found");
        };
        if !request.is_open() {
            return refuse(REQUEST_CLOSED, "request is closed or timed out");
        }
        if !request.idps.contains(node) {
            return refuse(NOT_ADDRESSED, "request is not addressed to this IdP");
        }
        if request.answers.iter().any(|a| &a.idp == node) {
            return refuse(ALREADY_ANSWERED, "IdP already answered");
        }
        if params.ial < request.min_ial {
            return refuse(IAL_TOO_LOW, "ial is below min_ial");
        }
        if params.aal < request.min_aal {
            return refuse(AAL_TOO_LOW, "aal is below min_aal");
        }

        let (valid_signature, valid_ial) = if request.mode.requires_accessor_signature() {
            let Some(signature) = &params.signature else {
                return refuse(SIGNATURE_REQUIRED, "signature is required");
            };
            let key = params
                .accessor_id
                .as_ref()
                .and_then(|a| state.idps.get(node)?.accessors.get(a));
            let Some(key) = key else {
                return refuse(UNKNOWN_ACCESSOR, "accessor not found");
            };
            if key.verify_consent(&request.message_hash, signature).is_err() {
                return refuse(INVALID_SIGNATURE, "signature does not verify");
            }
            request.signatures.push(signature.clone());
            (Some(true), Some(true))
        } else if misreport {
            (Some(true), Some(true))
        } else {
            (None, None)
        };
        request.answers.push(IdpAnswer {
            idp: node.clone(),
            answer: match params.status {
                ResponseStatus::Accept => Answered::Accept,
                ResponseStatus::Reject => Answered::Reject,
            },
            valid_signature,
            valid_ial,
        });

        let mut outbox = Outbox::default();
        outbox.push(
            node,
            "response_result",
            json!({
                "reference_id": params.reference_id.as_str(),
                "request_id": params.request_id.as_str(),
                "success": true,
            }),
        );
        outbox.delivery(node, &params.request_id, &request.rp);
        start_data_phase(request, &mut outbox);
        Inner::settle(state, &params.request_id, &mut outbox);
        self.inner.flush(state, outbox);
        Ok(ApiResponse::accepted())
    }

    async fn create_error_response(
        &self,
        node: &NodeId,
        params: &ErrorResponseParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "create_error_response")?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(request) = state.requests.get_mut(&params.request_id) else {
            return refuse(REQUEST_NOT_FOUND, "request not found");
        };
        if !request.is_open() {
            return refuse(REQUEST_CLOSED, "request is closed or timed out");
        }

        let mut outbox = Outbox::default();
        match &params.service_id {
            Some(service_id) => {
                let Some(line) = request.service_mut(service_id) else {
                    return refuse(SERVICE_NOT_REQUESTED, "service not requested");
                };
                if !line.as_nodes.contains(node) || line.answered.contains(node) {
                    return refuse(DATA_NOT_EXPECTED, "no data request pending for this AS");
                }
                line.answered.push(node.clone());
                outbox.push(
                    node,
                    "response_result",
                    json!({
                        "reference_id": params.reference_id.as_str(),
                        "request_id": params.request_id.as_str(),
                        "service_id": service_id.as_str(),
                        "success": true,
                    }),
                );
                self.inner.flush(state, outbox);
            }
            None => {
                if !request.idps.contains(node) {
                    return refuse(NOT_ADDRESSED, "request is not addressed to this IdP");
                }
                if request.answers.iter().any(|a| &a.idp == node) {
                    return refuse(ALREADY_ANSWERED, "IdP already answered");
                }
                request.answers.push(IdpAnswer {
                    idp: node.clone(),
                    answer: Answered::Error,
                    valid_signature: None,
                    valid_ial: None,
                });
                outbox.push(
                    node,
                    "response_result",
                    json!({
                        "reference_id": params.reference_id.as_str(),
                        "request_id": params.request_id.as_str(),
                        "success": true,
                    }),
                );
                outbox.delivery(node, &params.request_id, &request.rp);
                Inner::settle(state, &params.request_id, &mut outbox);
                self.inner.flush(state, outbox);
            }
        }
        Ok(ApiResponse::accepted())
    }

    async fn send_data(
        &self,
        node: &NodeId,
        params: &SendDataParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "send_data")?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(request) = state.requests.get_mut(&params.request_id) else {
            return refuse(REQUEST_NOT_FOUND, "request not found");
        };
        if !request.is_open() {
            return refuse(REQUEST_CLOSED, "request is closed or timed out");
        }
        let data_phase = request.data_phase;
        let rp = request.rp.clone();
        let Some(line) = request.service_mut(&params.service_id) else {
            return refuse(SERVICE_NOT_REQUESTED, "service not requested");
        };
        if !data_phase
            || !line.as_nodes.contains(node)
            || line.answered.contains(node)
            || line.signed >= line.min_as
        {
            return refuse(DATA_NOT_EXPECTED, "no data request pending for this AS");
        }
        line.answered.push(node.clone());
        line.signed += 1;

        let mut outbox = Outbox::default();
        outbox.push(
            node,
            "send_data_result",
            json!({
                "reference_id": params.reference_id.as_str(),
                "request_id": params.request_id.as_str(),
                "service_id": params.service_id.as_str(),
                "success": true,
            }),
        );
        outbox.delivery(node, &params.request_id, &rp);
        outbox.status(request, state.chain.advance(), request.answered());

        if let Some(line) = request.service_mut(&params.service_id) {
            line.received += 1;
        }
        request.data.push(json!({
            "source_node_id": node.as_str(),
            "service_id": params.service_id.as_str(),
            "data": params.data,
            "source_signature": hash(&params.data),
        }));
        Inner::settle(state, &params.request_id, &mut outbox);
        self.inner.flush(state, outbox);
        Ok(ApiResponse::accepted())
    }

    async fn close_request(
        &self,
        node: &NodeId,
        params: &CloseRequestParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "close_request")?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(request) = state.requests.get_mut(&params.request_id) else {
            return refuse(REQUEST_NOT_FOUND, "request not found");
        };
        if &request.rp != node {
            return refuse(NOT_ADDRESSED, "only the requester may close a request");
        }
        if !request.is_open() {
            return refuse(REQUEST_CLOSED, "request is closed or timed out");
        }
        request.closed = true;

        let mut outbox = Outbox::default();
        outbox.push(
            node,
            "close_request_result",
            json!({
                "reference_id": params.reference_id.as_str(),
                "request_id": params.request_id.as_str(),
                "success": true,
            }),
        );
        let answered = if state.faults.regress_closed_count {
            request.answered().saturating_sub(1)
        } else {
            request.answered()
        };
        outbox.status(request, state.chain.advance(), answered);
        self.inner.flush(state, outbox);
        Ok(ApiResponse::accepted())
    }

    async fn revoke_accessor(
        &self,
        node: &NodeId,
        params: &RevokeAccessorParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "revoke_accessor")?;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let removed = state
            .idps
            .get_mut(node)
            .and_then(|entry| entry.accessors.remove(&params.accessor_id));
        if removed.is_none() {
            return refuse(UNKNOWN_ACCESSOR, "accessor not found");
        }
        state.next_request += 1;
        let request_id = format!("revoke-{}", state.next_request);
        let mut outbox = Outbox::default();
        outbox.push(
            node,
            "revoke_accessor_result",
            json!({
                "reference_id": params.reference_id.as_str(),
                "request_id": request_id,
                "success": true,
            }),
        );
        self.inner.flush(state, outbox);
        Ok(ApiResponse::new(202, json!({ "request_id": request_id })))
    }

    async fn update_node(
        &self,
        node: &NodeId,
        _params: &UpdateNodeParams,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "update_node")?;
        Ok(ApiResponse::no_content())
    }

    async fn set_callbacks(
        &self,
        node: &NodeId,
        registration: &CallbackRegistration,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "set_callbacks")?;
        let url = registration
            .incoming_request_url
            .as_ref()
            .or(registration.data_request_url.as_ref())
            .or(registration.message_queue_send_success_url.as_ref())
            .or(registration.error_url.as_ref());
        if let Some(url) = url {
            self.inner
                .state
                .lock()
                .callbacks
                .insert(node.clone(), url.clone());
        }
        Ok(ApiResponse::no_content())
    }

    async fn get_request(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "get_request")?;
        let state = self.inner.state.lock();
        match state.requests.get(request_id) {
            Some(request) => Ok(ApiResponse::new(
                200,
                request.snapshot(state.chain.current(), request.answered()),
            )),
            None => Ok(ApiResponse::new(
                404,
                json!({ "error": { "code": REQUEST_NOT_FOUND, "message": "request not found" } }),
            )),
        }
    }

    async fn get_relevant_idp_nodes_by_sid(
        &self,
        node: &NodeId,
        _namespace: &str,
        _identifier: &str,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "get_relevant_idp_nodes_by_sid")?;
        let state = self.inner.state.lock();
        let nodes: Vec<Value> = state
            .idps
            .iter()
            .map(|(id, e)| json!({ "node_id": id.as_str(), "max_ial": e.max_ial, "max_aal": e.max_aal }))
            .collect();
        Ok(ApiResponse::new(200, Value::Array(nodes)))
    }

    async fn get_as_nodes_by_service(
        &self,
        node: &NodeId,
        service_id: &ServiceId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "get_as_nodes_by_service")?;
        let state = self.inner.state.lock();
        let nodes: Vec<Value> = state
            .serving(service_id)
            .iter()
            .map(|id| json!({ "node_id": id.as_str() }))
            .collect();
        Ok(ApiResponse::new(200, json!({ "node_list": nodes })))
    }

    async fn get_data_from_as(
        &self,
        node: &NodeId,
        request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "get_data_from_as")?;
        let state = self.inner.state.lock();
        match state.requests.get(request_id) {
            Some(request) => Ok(ApiResponse::new(200, Value::Array(request.data.clone()))),
            None => refuse(REQUEST_NOT_FOUND, "request not found"),
        }
    }

    async fn remove_private_messages(
        &self,
        node: &NodeId,
        _request_id: &RequestId,
    ) -> Result<ApiResponse, NodeApiError> {
        self.call(node, "remove_private_messages")?;
        Ok(ApiResponse::no_content())
    }
}

/// Ask every addressed AS for data once enough IdPs consented.
fn start_data_phase(request: &mut SimRequest, outbox: &mut Outbox) {
    if request.data_phase || request.services.is_empty() || !request.consented() {
        return;
    }
    request.data_phase = true;
    for line in &request.services {
        for as_node in &line.as_nodes {
            outbox.delivery(&request.rp, &request.request_id, as_node);
            outbox.push(
                as_node,
                "data_request",
                json!({
                    "request_id": request.request_id.as_str(),
                    "service_id": line.service_id.as_str(),
                    "mode": request.mode.as_u8(),
                    "request_params": line.request_params,
                    "requester_node_id": request.rp.as_str(),
                    "response_signature_list": request.signatures,
                    "namespace": request.namespace,
                    "identifier": request.identifier,
                }),
            );
        }
    }
}
