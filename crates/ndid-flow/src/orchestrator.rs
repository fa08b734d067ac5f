//! # Flow Orchestrator
//!
//! Drives one request through its whole lifecycle against live nodes:
//!
//! 1. Resolve the addressed IdPs and AS nodes, then build the checkpoint
//!    plan.
//! 2. Register every expectation the run will need (create result, each
//!    `request_status` snapshot, every IdP and AS callback, every message
//!    delivery) and arm the request slot.
//! 3. Create the request, bind the slot, and verify the `pending` snapshot.
//! 4. Let each IdP answer, sequentially or back to back, after checking
//!    the request it received and that invalid answers are refused.
//! 5. Run the data phase when the IdP answers allow one.
//! 6. Finish by waiting for auto-close, closing explicitly, or waiting for
//!    the request timeout.
//! 7. Replay the recorded snapshot history through a fresh lifecycle
//!    monitor and report.
//!
//! Registration always precedes the trigger: the registry does not replay
//! callbacks that arrived before anyone expected them.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use ndid_callback::envelope::{DataRequest, IncomingRequest};
use ndid_callback::{
    ArmedSlot, Callback, CallbackEnvelope, CallbackHub, CallbackKind, CorrelationRegistry,
    MessageDeliveryTracker, PendingCallback, Predicate, RequestStatus,
};
use ndid_client::{
    ApiResponse, CloseRequestParams, CreateRequestParams, DataRequestParams,
    ErrorResponseParams, HarnessConfig, NodeApi, ResponseParams, ResponseStatus, SendDataParams,
};
use ndid_core::{NodeId, ReferenceId, RequestId, ServiceId};
use ndid_crypto::hash;
use ndid_lifecycle::{check_invariants, ConformanceError, LifecycleMonitor, Tally};

use crate::checks::{verify_data_request, verify_incoming};
use crate::error::FlowError;
use crate::plan::{answer_of, Checkpoint, FlowPlan, Topology};
use crate::report::{DeliveryRecord, FlowReport, IdpAnswerRecord, StepRecord};
use crate::scenario::{
    AnswerOrder, Finish, IdpOutcome, IdpParticipant, ResponseMutation, Scenario, ServiceAnswer,
    StepBudgets,
};
use crate::signer::{ConsentSigner, ScenarioSigner};
use crate::step::{await_callback, body, reject_malformed, require_success};
use crate::validate::validate;

/// Runs scenarios against the nodes reachable through `api`.
pub struct FlowOrchestrator<'a, A> {
    api: &'a A,
    hub: &'a CallbackHub,
    config: &'a HarnessConfig,
    signer: &'a dyn ConsentSigner,
}

impl<'a, A: NodeApi> FlowOrchestrator<'a, A> {
    pub fn new(api: &'a A, hub: &'a CallbackHub, config: &'a HarnessConfig) -> Self {
        Self {
            api,
            hub,
            config,
            signer: &ScenarioSigner,
        }
    }

    /// Replace the signer used for mode 2 and 3 answers.
    pub fn with_signer(mut self, signer: &'a dyn ConsentSigner) -> Self {
        self.signer = signer;
        self
    }

    /// Run `scenario` to completion and verify every callback it causes.
    pub async fn run(&self, scenario: &Scenario) -> Result<FlowReport, FlowError> {
        validate(scenario)?;
        let started_at = Utc::now();
        let budgets = StepBudgets::resolve(
            &scenario.budgets,
            self.config.step_timeout_secs.map(Duration::from_secs),
        );
        let topology = self.resolve_topology(scenario).await?;
        let plan = FlowPlan::build(scenario, topology);
        tracing::info!(
            scenario = %scenario.name,
            statuses = plan.status_count(),
            data_phase = plan.projection.data_phase,
            "scenario planned"
        );

        let registry = CorrelationRegistry::new(self.hub, scenario.name.clone());
        let mut run = Run {
            api: self.api,
            config: self.config,
            signer: self.signer,
            scenario,
            plan: &plan,
            registry: &registry,
            budgets,
            steps: Vec::new(),
            deliveries: Vec::new(),
            answers: Vec::new(),
        };
        let outcome = run.execute(started_at).await;
        match &outcome {
            Ok(report) => tracing::info!(
                scenario = %scenario.name,
                request_id = %report.request_id,
                status = %report.final_status,
                "scenario passed"
            ),
            Err(err) => tracing::warn!(
                scenario = %scenario.name,
                class = ?err.class(),
                error = %err,
                "scenario failed"
            ),
        }
        outcome
    }

    /// IdPs and AS nodes the request will be addressed to.
    ///
    /// Explicit lists are used as given; empty ones are looked up through
    /// the RP's utility API.
    pub async fn resolve_topology(&self, scenario: &Scenario) -> Result<Topology, FlowError> {
        let request = &scenario.request;
        let rp = &scenario.rp;

        let idps = if request.idp_id_list.is_empty() {
            let response = self
                .api
                .get_relevant_idp_nodes_by_sid(rp, &request.namespace, &request.identifier)
                .await?;
            let found = node_list(
                "look up relevant IdPs",
                &response,
                Some((request.min_ial, request.min_aal)),
            )?;
            if let Some(missing) = scenario.idps.iter().find(|p| !found.contains(&p.node_id)) {
                return Err(FlowError::HarnessUsage(format!(
                    "{} is not a relevant IdP for {}/{}",
                    missing.node_id, request.namespace, request.identifier
                )));
            }
            found
        } else {
            request.idp_id_list.clone()
        };

        let mut services = Vec::with_capacity(request.data_request_list.len());
        for item in &request.data_request_list {
            let nodes = if item.as_id_list.is_empty() {
                let response = self.api.get_as_nodes_by_service(rp, &item.service_id).await?;
                node_list("look up AS nodes", &response, None)?
            } else {
                item.as_id_list.clone()
            };
            services.push((item.service_id.clone(), nodes));
        }
        tracing::debug!(
            scenario = %scenario.name,
            idps = idps.len(),
            services = services.len(),
            "topology resolved"
        );
        Ok(Topology { idps, services })
    }
}

/// Node ids from a lookup response: a bare array, or `{ node_list: [...] }`.
///
/// IdP entries carrying `max_ial`/`max_aal` below the request minimums are
/// left out.
fn node_list(
    step: &str,
    response: &ApiResponse,
    min_levels: Option<(f64, f64)>,
) -> Result<Vec<NodeId>, FlowError> {
    let unexpected = |expected: &str| FlowError::UnexpectedApiOutcome {
        step: step.to_string(),
        expected: expected.to_string(),
        actual: response.to_string(),
    };
    if !response.is_success() {
        return Err(unexpected("2xx"));
    }
    let entries = match &response.body {
        Value::Array(entries) => entries,
        other => other
            .get("node_list")
            .and_then(Value::as_array)
            .ok_or_else(|| unexpected("a node list"))?,
    };

    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = match entry {
            Value::String(id) => id.as_str(),
            other => other
                .get("node_id")
                .and_then(Value::as_str)
                .ok_or_else(|| unexpected("entries with node_id"))?,
        };
        if let Some((min_ial, min_aal)) = min_levels {
            let below = |key: &str, min: f64| {
                entry
                    .get(key)
                    .and_then(Value::as_f64)
                    .is_some_and(|v| v < min)
            };
            if below("max_ial", min_ial) || below("max_aal", min_aal) {
                continue;
            }
        }
        let node = NodeId::new(id).map_err(|_| unexpected("valid node ids"))?;
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

struct IdpWait {
    reference_id: ReferenceId,
    incoming: PendingCallback,
    result: PendingCallback,
    delivery: MessageDeliveryTracker,
}

struct DataWait {
    reference_id: ReferenceId,
    data_request: PendingCallback,
    result: PendingCallback,
    delivery: Option<MessageDeliveryTracker>,
}

/// Everything registered before the trigger.
struct Expectations {
    armed: ArmedSlot,
    create_reference: ReferenceId,
    created: PendingCallback,
    rp_to_idps: MessageDeliveryTracker,
    statuses: std::vec::IntoIter<PendingCallback>,
    idps: Vec<IdpWait>,
    rp_to_as: Option<MessageDeliveryTracker>,
    data: Vec<DataWait>,
    close: Option<(ReferenceId, PendingCallback)>,
}

/// State of one run.
struct Run<'r, A> {
    api: &'r A,
    config: &'r HarnessConfig,
    signer: &'r dyn ConsentSigner,
    scenario: &'r Scenario,
    plan: &'r FlowPlan,
    registry: &'r CorrelationRegistry,
    budgets: StepBudgets,
    steps: Vec<StepRecord>,
    deliveries: Vec<DeliveryRecord>,
    answers: Vec<IdpAnswerRecord>,
}

impl<'r, A: NodeApi> Run<'r, A> {
    async fn execute(&mut self, started_at: chrono::DateTime<Utc>) -> Result<FlowReport, FlowError> {
        let scenario = self.scenario;
        let plan = self.plan;
        let rp = &scenario.rp;
        let exp = self.register()?;
        let mut statuses = exp.statuses;

        // Trigger.
        let (request_id, initial_salt) =
            self.create_request(&exp.armed, &exp.create_reference).await?;
        let step = "create_request_result";
        let envelope = await_callback(step, self.budgets.create, exp.created).await?;
        require_success(step, &envelope)?;
        self.record(step, &envelope);
        let created = body(step, envelope, |c| match c {
            Callback::CreateRequestResult(r) => Some(r),
            _ => None,
        })?;
        if created.request_id != request_id {
            return Err(FlowError::conformance(
                step,
                ConformanceError::new(
                    "create_request_result",
                    "request_id",
                    &request_id,
                    &created.request_id,
                ),
            ));
        }
        self.confirm_delivery(exp.rp_to_idps).await?;
        let monitor = &mut LifecycleMonitor::new(request_id.clone());
        self.verify_status(&mut statuses, &plan.pending, self.budgets.status, &request_id, monitor)
            .await?;

        // IdP answers.
        match scenario.answer_order {
            AnswerOrder::Sequential => {
                for ((idp, wait), checkpoint) in
                    scenario.idps.iter().zip(exp.idps).zip(&plan.answers)
                {
                    let salt = initial_salt.as_deref();
                    let refused = self
                        .answer(idp, wait.incoming, &wait.reference_id, &request_id, salt)
                        .await?;
                    self.confirm_answer(idp, refused, wait.result, wait.delivery).await?;
                    self.verify_status(&mut statuses, checkpoint, self.budgets.status, &request_id, monitor)
                        .await?;
                }
            }
            AnswerOrder::Concurrent => {
                let mut in_flight = Vec::with_capacity(scenario.idps.len());
                for (idp, wait) in scenario.idps.iter().zip(exp.idps) {
                    let salt = initial_salt.as_deref();
                    let refused = self
                        .answer(idp, wait.incoming, &wait.reference_id, &request_id, salt)
                        .await?;
                    in_flight.push((idp, refused, wait.result, wait.delivery));
                }
                for (idp, refused, result, delivery) in in_flight {
                    self.confirm_answer(idp, refused, result, delivery).await?;
                }
                for checkpoint in &plan.answers {
                    self.verify_status(&mut statuses, checkpoint, self.budgets.status, &request_id, monitor)
                        .await?;
                }
            }
        }

        // Data phase.
        if let Some(tracker) = exp.rp_to_as {
            self.confirm_delivery(tracker).await?;
        }
        for (data_step, wait) in plan.data.iter().zip(exp.data) {
            let step = format!("data_request on {} for {}", data_step.as_node, data_step.service_id);
            let envelope = await_callback(&step, self.budgets.data, wait.data_request).await?;
            self.record(&step, &envelope);
            let data_request: DataRequest = body(&step, envelope, |c| match c {
                Callback::DataRequest(d) => Some(d),
                _ => None,
            })?;
            verify_data_request(scenario, &data_request, &request_id, &data_step.service_id)
                .map_err(|e| FlowError::conformance(&step, e))?;

            self.answer_data(
                &data_step.as_node,
                &data_step.service_id,
                &data_step.answer,
                &wait.reference_id,
                &request_id,
            )
            .await?;
            let step = match data_step.answer {
                ServiceAnswer::Data(_) => format!("send_data_result on {}", data_step.as_node),
                ServiceAnswer::Error(_) => format!("response_result on {}", data_step.as_node),
            };
            let envelope = await_callback(&step, self.budgets.answer, wait.result).await?;
            require_success(&step, &envelope)?;
            self.record(&step, &envelope);
            if let Some(tracker) = wait.delivery {
                self.confirm_delivery(tracker).await?;
            }
            if let Some(checkpoint) = &data_step.signed {
                self.verify_status(&mut statuses, checkpoint, self.budgets.status, &request_id, monitor)
                    .await?;
            }
            if let Some(checkpoint) = &data_step.received {
                self.verify_status(&mut statuses, checkpoint, self.budgets.data, &request_id, monitor)
                    .await?;
            }
        }

        // Finish.
        match scenario.finish {
            Finish::Auto => {
                self.verify_status(&mut statuses, &plan.last, self.budgets.close, &request_id, monitor)
                    .await?;
            }
            Finish::Close => {
                let (reference_id, pending) = exp.close.ok_or_else(|| {
                    FlowError::HarnessUsage("close result was not registered".into())
                })?;
                let step = "close request";
                let response = self
                    .api
                    .close_request(
                        rp,
                        &CloseRequestParams {
                            node_id: rp.clone(),
                            reference_id,
                            callback_url: self.config.callback_url(rp),
                            request_id: request_id.clone(),
                        },
                    )
                    .await?;
                expect_accepted(step, &response)?;
                let step = "close_request_result";
                let envelope = await_callback(step, self.budgets.close, pending).await?;
                require_success(step, &envelope)?;
                self.record(step, &envelope);
                self.verify_status(&mut statuses, &plan.last, self.budgets.close, &request_id, monitor)
                    .await?;
            }
            Finish::Timeout => {
                let timeout = scenario
                    .request
                    .timeout_secs
                    .unwrap_or(self.config.request_timeout_secs);
                let budget = Duration::from_secs(timeout) + self.budgets.status;
                self.verify_status(&mut statuses, &plan.last, budget, &request_id, monitor)
                    .await?;
            }
        }

        let data = if plan.projection.data_phase {
            Some(self.fetch_data(&request_id).await?)
        } else {
            None
        };

        // The full recorded history must satisfy the same rules the live
        // monitor applied, including snapshots nobody waited for.
        let history = self.registry.status_history(rp, &request_id);
        let replayed = LifecycleMonitor::verify(request_id.clone(), history.iter())?;
        if let Some(violation) = self.registry.violations().into_iter().next() {
            return Err(violation.into());
        }
        for leftover in self.registry.leftovers(&request_id) {
            reject_malformed("leftover callbacks", &leftover)?;
            if let Callback::MessageQueueSendSuccess(extra) = &leftover.callback {
                return Err(FlowError::conformance(
                    "leftover callbacks",
                    ConformanceError::new(
                        format!("{} for {request_id}", CallbackKind::MessageQueueSendSuccess),
                        "destination_node_id",
                        "no confirmation beyond one per planned message",
                        format!(
                            "extra confirmation from {} to {}",
                            leftover.node_id, extra.destination_node_id
                        ),
                    ),
                ));
            }
        }

        if scenario.housekeeping {
            let response = self.api.remove_private_messages(rp, &request_id).await?;
            expect_accepted("remove private messages", &response)?;
        }

        let final_status = replayed.finish()?;
        let report = FlowReport {
            scenario: scenario.name.clone(),
            request_id: request_id.clone(),
            mode: scenario.request.mode,
            final_status: final_status.status,
            closed: final_status.closed,
            timed_out: final_status.timed_out,
            status_path: replayed.status_path(),
            transitions: replayed.transition_log().to_vec(),
            steps: std::mem::take(&mut self.steps),
            idp_answers: std::mem::take(&mut self.answers),
            deliveries: std::mem::take(&mut self.deliveries),
            data,
            unmatched_callbacks: self.registry.teardown_report().unmatched.len(),
            started_at,
            finished_at: Utc::now(),
        };
        Ok(report)
    }

    /// Register every expectation of the plan, then arm the slot.
    fn register(&self) -> Result<Expectations, FlowError> {
        let scenario = self.scenario;
        let plan = self.plan;
        let registry = self.registry;
        let rp = &scenario.rp;

        let mut nodes = scenario.involved_nodes();
        let addressed = plan
            .topology
            .idps
            .iter()
            .chain(plan.topology.services.iter().flat_map(|(_, n)| n.iter()));
        for node in addressed {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }
        registry.attach_all(nodes.iter());

        let slot = registry.request_slot(format!("{} request", scenario.name));
        let create_reference = ReferenceId::generate();
        let created = registry.expect_binding(
            Predicate::on(rp.clone(), CallbackKind::CreateRequestResult)
                .reference(create_reference.clone()),
            slot,
        )?;
        let rp_to_idps = MessageDeliveryTracker::register(
            registry,
            rp.clone(),
            slot,
            plan.topology.idps.iter().cloned(),
        )?;
        let statuses = registry
            .expect_series(
                Predicate::on(rp.clone(), CallbackKind::RequestStatus).request(slot),
                plan.status_count(),
            )?
            .into_iter();

        let mut incoming = registry.expect_each(scenario.idps.iter().map(|idp| {
            let predicate = Predicate::on(idp.node_id.clone(), CallbackKind::IncomingRequest)
                .request(slot);
            (idp.node_id.clone(), predicate)
        }))?;
        let mut idps = Vec::with_capacity(scenario.idps.len());
        for idp in &scenario.idps {
            let reference_id = ReferenceId::generate();
            let node = &idp.node_id;
            idps.push(IdpWait {
                incoming: incoming.take(node).ok_or_else(|| {
                    FlowError::HarnessUsage(format!("no incoming_request expectation for {node}"))
                })?,
                result: registry.expect(
                    Predicate::on(node.clone(), CallbackKind::ResponseResult)
                        .request(slot)
                        .reference(reference_id.clone()),
                )?,
                delivery: MessageDeliveryTracker::register(
                    registry,
                    node.clone(),
                    slot,
                    [rp.clone()],
                )?,
                reference_id,
            });
        }

        let mut rp_to_as = None;
        let mut data = Vec::with_capacity(plan.data.len());
        if plan.projection.data_phase {
            rp_to_as = Some(MessageDeliveryTracker::register(
                registry,
                rp.clone(),
                slot,
                plan.topology.data_request_destinations(),
            )?);
            let mut data_requests = registry.expect_each(plan.data.iter().map(|step| {
                let key = (step.as_node.clone(), step.service_id.clone());
                let predicate = Predicate::on(step.as_node.clone(), CallbackKind::DataRequest)
                    .request(slot)
                    .service(step.service_id.clone());
                (key, predicate)
            }))?;

            for step in &plan.data {
                let reference_id = ReferenceId::generate();
                let node = &step.as_node;
                let (result_kind, delivery) = match step.answer {
                    ServiceAnswer::Data(_) => (
                        CallbackKind::SendDataResult,
                        Some(MessageDeliveryTracker::register(
                            registry,
                            node.clone(),
                            slot,
                            [rp.clone()],
                        )?),
                    ),
                    ServiceAnswer::Error(_) => (CallbackKind::ResponseResult, None),
                };
                let key = (node.clone(), step.service_id.clone());
                data.push(DataWait {
                    data_request: data_requests.take(&key).ok_or_else(|| {
                        FlowError::HarnessUsage(format!(
                            "no data_request expectation for {node} serving {}",
                            step.service_id
                        ))
                    })?,
                    result: registry.expect(
                        Predicate::on(node.clone(), result_kind)
                            .request(slot)
                            .reference(reference_id.clone()),
                    )?,
                    delivery,
                    reference_id,
                });
            }
        }

        let close = match scenario.finish {
            Finish::Close => {
                let reference_id = ReferenceId::generate();
                let pending = registry.expect(
                    Predicate::on(rp.clone(), CallbackKind::CloseRequestResult)
                        .request(slot)
                        .reference(reference_id.clone()),
                )?;
                Some((reference_id, pending))
            }
            Finish::Auto | Finish::Timeout => None,
        };

        let armed = registry.arm(slot)?;
        tracing::debug!(
            scenario = %scenario.name,
            pending = registry.pending().len(),
            "expectations armed"
        );
        Ok(Expectations {
            armed,
            create_reference,
            created,
            rp_to_idps,
            statuses,
            idps,
            rp_to_as,
            data,
            close,
        })
    }

    async fn create_request(
        &self,
        armed: &ArmedSlot,
        reference_id: &ReferenceId,
    ) -> Result<(RequestId, Option<String>), FlowError> {
        let scenario = self.scenario;
        let request = &scenario.request;
        let rp = &scenario.rp;
        let params = CreateRequestParams {
            node_id: rp.clone(),
            reference_id: reference_id.clone(),
            callback_url: self.config.callback_url(rp),
            mode: request.mode,
            namespace: request.namespace.clone(),
            identifier: request.identifier.clone(),
            idp_id_list: request.idp_id_list.clone(),
            data_request_list: request
                .data_request_list
                .iter()
                .map(|item| DataRequestParams {
                    service_id: item.service_id.clone(),
                    as_id_list: item.as_id_list.clone(),
                    min_as: item.min_as,
                    request_params: item.request_params.clone(),
                })
                .collect(),
            request_message: request.message.clone(),
            min_ial: request.min_ial,
            min_aal: request.min_aal,
            min_idp: request.min_idp,
            request_timeout: request
                .timeout_secs
                .unwrap_or(self.config.request_timeout_secs),
            bypass_identity_check: None,
        };
        let response = self.api.create_request(rp, &params).await?;
        let request_id = match response.request_id() {
            Some(id) if response.is_success() => id,
            _ => {
                return Err(FlowError::UnexpectedApiOutcome {
                    step: "create request".into(),
                    expected: "2xx with request_id".into(),
                    actual: response.to_string(),
                })
            }
        };
        self.registry.bind(armed, request_id.clone())?;
        tracing::info!(scenario = %scenario.name, %request_id, rp = %rp, "request created");
        Ok((request_id, response.initial_salt().map(str::to_string)))
    }

    /// Receive, check and answer the request on one IdP. Returns how many
    /// invalid attempts were refused first.
    async fn answer(
        &mut self,
        idp: &IdpParticipant,
        incoming: PendingCallback,
        reference_id: &ReferenceId,
        request_id: &RequestId,
        initial_salt: Option<&str>,
    ) -> Result<usize, FlowError> {
        let step = format!("incoming_request on {}", idp.node_id);
        let envelope = await_callback(&step, self.budgets.incoming, incoming).await?;
        self.record(&step, &envelope);
        let incoming: IncomingRequest = body(&step, envelope, |c| match c {
            Callback::IncomingRequest(i) => Some(i),
            _ => None,
        })?;
        verify_incoming(self.scenario, &incoming, request_id, initial_salt)
            .map_err(|e| FlowError::conformance(&step, e))?;

        let refused = self.refuse_invalid_attempts(idp, &incoming, request_id).await?;

        let step = format!("{} answers", idp.node_id);
        let response = match idp.outcome {
            IdpOutcome::Error(error_code) => {
                self.api
                    .create_error_response(
                        &idp.node_id,
                        &ErrorResponseParams {
                            node_id: idp.node_id.clone(),
                            reference_id: reference_id.clone(),
                            callback_url: self.config.callback_url(&idp.node_id),
                            request_id: request_id.clone(),
                            error_code,
                            service_id: None,
                        },
                    )
                    .await?
            }
            IdpOutcome::Accept | IdpOutcome::Reject => {
                let params = self.response_params(idp, &incoming, request_id, reference_id)?;
                self.api.create_response(&idp.node_id, &params).await?
            }
        };
        expect_accepted(&step, &response)?;
        tracing::info!(idp = %idp.node_id, %request_id, outcome = ?idp.outcome, "IdP answered");
        Ok(refused)
    }

    /// Send each declared invalid answer and require the node to refuse it
    /// synchronously with the declared status and error code.
    async fn refuse_invalid_attempts(
        &self,
        idp: &IdpParticipant,
        incoming: &IncomingRequest,
        request_id: &RequestId,
    ) -> Result<usize, FlowError> {
        let request = &self.scenario.request;
        for attempt in &idp.invalid_attempts {
            let step = format!("{} invalid answer ({:?})", idp.node_id, attempt.mutation);
            let mut params =
                self.response_params(idp, incoming, request_id, &ReferenceId::generate())?;
            match attempt.mutation {
                ResponseMutation::UnknownRequestId => {
                    params.request_id = RequestId::new(format!("unknown-{}", ReferenceId::generate()))
                        .map_err(|e| FlowError::HarnessUsage(e.to_string()))?;
                }
                ResponseMutation::IalBelowMinimum => params.ial = request.min_ial / 2.0,
                ResponseMutation::AalBelowMinimum => params.aal = request.min_aal / 2.0,
                ResponseMutation::WrongSignature => {
                    let other = hash("not the request message");
                    params.signature = match &params.accessor_id {
                        Some(accessor) => Some(self.signer.sign(idp, accessor, &other)?),
                        None => Some(other),
                    };
                }
                ResponseMutation::MissingSignature => params.signature = None,
            }
            let response = self.api.create_response(&idp.node_id, &params).await?;
            if response.status != attempt.expect_status
                || response.error_code() != Some(attempt.expect_error_code)
            {
                return Err(FlowError::UnexpectedApiOutcome {
                    step,
                    expected: format!(
                        "{} (error {})",
                        attempt.expect_status, attempt.expect_error_code
                    ),
                    actual: response.to_string(),
                });
            }
            tracing::info!(
                idp = %idp.node_id,
                mutation = ?attempt.mutation,
                %response,
                "invalid answer refused"
            );
        }
        Ok(idp.invalid_attempts.len())
    }

    fn response_params(
        &self,
        idp: &IdpParticipant,
        incoming: &IncomingRequest,
        request_id: &RequestId,
        reference_id: &ReferenceId,
    ) -> Result<ResponseParams, FlowError> {
        let request = &self.scenario.request;
        let (accessor_id, signature) = if request.mode.requires_accessor_signature() {
            let accessor = self.signer.select_accessor(idp, incoming).ok_or_else(|| {
                FlowError::HarnessUsage(format!("no accessor to answer with on {}", idp.node_id))
            })?;
            let signature = self.signer.sign(idp, &accessor, &incoming.request_message_hash)?;
            (Some(accessor), Some(signature))
        } else {
            (None, None)
        };
        Ok(ResponseParams {
            node_id: idp.node_id.clone(),
            reference_id: reference_id.clone(),
            callback_url: self.config.callback_url(&idp.node_id),
            request_id: request_id.clone(),
            namespace: Some(request.namespace.clone()),
            identifier: Some(request.identifier.clone()),
            ial: idp.ial,
            aal: idp.aal,
            status: match idp.outcome {
                IdpOutcome::Reject => ResponseStatus::Reject,
                IdpOutcome::Accept | IdpOutcome::Error(_) => ResponseStatus::Accept,
            },
            accessor_id,
            signature,
        })
    }

    async fn confirm_answer(
        &mut self,
        idp: &IdpParticipant,
        refused_attempts: usize,
        result: PendingCallback,
        delivery: MessageDeliveryTracker,
    ) -> Result<(), FlowError> {
        let step = format!("response_result on {}", idp.node_id);
        let envelope = await_callback(&step, self.budgets.answer, result).await?;
        require_success(&step, &envelope)?;
        self.record(&step, &envelope);
        self.confirm_delivery(delivery).await?;
        self.answers.push(IdpAnswerRecord {
            idp_id: idp.node_id.clone(),
            answer: answer_of(idp.outcome),
            refused_attempts,
        });
        Ok(())
    }

    async fn answer_data(
        &self,
        as_node: &NodeId,
        service_id: &ServiceId,
        answer: &ServiceAnswer,
        reference_id: &ReferenceId,
        request_id: &RequestId,
    ) -> Result<(), FlowError> {
        let callback_url = self.config.callback_url(as_node);
        let response = match answer {
            ServiceAnswer::Data(data) => {
                self.api
                    .send_data(
                        as_node,
                        &SendDataParams {
                            node_id: as_node.clone(),
                            reference_id: reference_id.clone(),
                            callback_url,
                            request_id: request_id.clone(),
                            service_id: service_id.clone(),
                            data: data.clone(),
                        },
                    )
                    .await?
            }
            ServiceAnswer::Error(error_code) => {
                self.api
                    .create_error_response(
                        as_node,
                        &ErrorResponseParams {
                            node_id: as_node.clone(),
                            reference_id: reference_id.clone(),
                            callback_url,
                            request_id: request_id.clone(),
                            error_code: *error_code,
                            service_id: Some(service_id.clone()),
                        },
                    )
                    .await?
            }
        };
        expect_accepted(&format!("{as_node} answers {service_id}"), &response)?;
        tracing::info!(as_node = %as_node, service = %service_id, %request_id, "AS answered");
        Ok(())
    }

    async fn confirm_delivery(&mut self, tracker: MessageDeliveryTracker) -> Result<(), FlowError> {
        let source = tracker.source().clone();
        let confirmed = tracker.wait_all(self.budgets.delivery).await?;
        tracing::debug!(source = %source, destinations = confirmed.len(), "deliveries confirmed");
        self.deliveries.push(DeliveryRecord {
            source,
            destinations: confirmed.into_iter().map(|c| c.destination).collect(),
        });
        Ok(())
    }

    /// Await the next snapshot and check it against `checkpoint`.
    ///
    /// Exact checkpoints are compared in full. Inexact ones (intermediate
    /// snapshots of concurrent answers) only need the right answered count
    /// and a validity list naming declared IdPs.
    async fn verify_status(
        &mut self,
        statuses: &mut std::vec::IntoIter<PendingCallback>,
        checkpoint: &Checkpoint,
        budget: Duration,
        request_id: &RequestId,
        monitor: &mut LifecycleMonitor,
    ) -> Result<RequestStatus, FlowError> {
        let step = checkpoint.step.as_str();
        let pending = statuses.next().ok_or_else(|| {
            FlowError::HarnessUsage(format!("no status expectation left for `{step}`"))
        })?;
        let envelope = await_callback(step, budget, pending).await?;
        self.record(step, &envelope);
        let snapshot = body(step, envelope, |c| match c {
            Callback::RequestStatus(s) => Some(s),
            _ => None,
        })?;
        monitor.observe(&snapshot)?;

        let request = &self.scenario.request;
        let tally = if checkpoint.exact {
            checkpoint
                .expected(request_id, request.mode, request.min_idp)
                .check(&snapshot)
                .map_err(|e| FlowError::conformance(step, e))?;
            checkpoint.tally
        } else {
            self.tally_from(step, &snapshot)?
        };
        if tally.answered() != checkpoint.tally.answered() {
            return Err(FlowError::conformance(
                step,
                ConformanceError::new(
                    format!("{} snapshot for {request_id}", snapshot.status),
                    "answered_idp_count",
                    checkpoint.tally.answered(),
                    tally.answered(),
                ),
            ));
        }
        check_invariants(&snapshot, request.min_idp, &tally)
            .map_err(|e| FlowError::conformance(step, e))?;
        tracing::info!(
            scenario = %self.scenario.name,
            step,
            %request_id,
            status = %snapshot.status,
            block_height = %snapshot.block_height,
            "status verified"
        );
        Ok(snapshot)
    }

    /// Tally implied by the IdPs listed in `snapshot`.
    fn tally_from(&self, step: &str, snapshot: &RequestStatus) -> Result<Tally, FlowError> {
        let mut tally = Tally::default();
        for entry in snapshot.validity() {
            let idp = self.scenario.idp(&entry.idp_id).ok_or_else(|| {
                FlowError::conformance(
                    step,
                    ConformanceError::new(
                        format!("{} snapshot for {}", snapshot.status, snapshot.request_id),
                        "response_valid_list.idp_id",
                        "an IdP that answered",
                        &entry.idp_id,
                    ),
                )
            })?;
            tally.record(answer_of(idp.outcome));
        }
        Ok(tally)
    }

    async fn fetch_data(&self, request_id: &RequestId) -> Result<Value, FlowError> {
        let rp = &self.scenario.rp;
        let response = self.api.get_data_from_as(rp, request_id).await?;
        expect_accepted("fetch data", &response)?;
        let expected = self
            .plan
            .data
            .iter()
            .filter(|step| step.signed.is_some())
            .count();
        if let Some(items) = response.body.as_array() {
            if items.len() != expected {
                return Err(FlowError::conformance(
                    "fetch data",
                    ConformanceError::new(
                        format!("data for {request_id}"),
                        "len",
                        expected,
                        items.len(),
                    ),
                ));
            }
        }
        Ok(response.body)
    }

    fn record(&mut self, step: &str, envelope: &CallbackEnvelope) {
        self.steps.push(StepRecord {
            step: step.to_string(),
            kind: envelope.kind_label().to_string(),
            node_id: envelope.node_id.clone(),
            at: Utc::now(),
        });
    }
}

fn expect_accepted(step: &str, response: &ApiResponse) -> Result<(), FlowError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(FlowError::UnexpectedApiOutcome {
            step: step.to_string(),
            expected: "2xx".into(),
            actual: response.to_string(),
        })
    }
}
