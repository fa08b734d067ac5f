//! Payload checks for the callbacks a request fans out to IdPs and AS nodes.

use ndid_callback::envelope::{DataRequest, IncomingRequest};
use ndid_core::{RequestId, ServiceId};
use ndid_crypto::{derive_request_message_salt, request_message_hash};
use ndid_lifecycle::ConformanceError;

use crate::scenario::Scenario;

/// Check that an IdP received the request the RP created.
///
/// The message hash is recomputed from the salt the IdP was given, or the
/// one derived from `initial_salt` when the node omits it.
pub fn verify_incoming(
    scenario: &Scenario,
    incoming: &IncomingRequest,
    request_id: &RequestId,
    initial_salt: Option<&str>,
) -> Result<(), ConformanceError> {
    let request = &scenario.request;
    let context = format!("incoming_request {}", incoming.request_id);
    let fail = |field: &str, expected: &dyn ToString, actual: &dyn ToString| {
        Err(ConformanceError::new(
            context.clone(),
            field,
            expected.to_string(),
            actual.to_string(),
        ))
    };

    if &incoming.request_id != request_id {
        return fail("request_id", request_id, &incoming.request_id);
    }
    if incoming.mode != request.mode {
        return fail("mode", &request.mode, &incoming.mode);
    }
    if incoming.requester_node_id != scenario.rp {
        return fail("requester_node_id", &scenario.rp, &incoming.requester_node_id);
    }
    if incoming.request_message != request.message {
        return fail("request_message", &request.message, &incoming.request_message);
    }
    if incoming.min_ial != request.min_ial {
        return fail("min_ial", &request.min_ial, &incoming.min_ial);
    }
    if incoming.min_aal != request.min_aal {
        return fail("min_aal", &request.min_aal, &incoming.min_aal);
    }
    if let Some(namespace) = &incoming.namespace {
        if namespace != &request.namespace {
            return fail("namespace", &request.namespace, namespace);
        }
    }
    if let Some(identifier) = &incoming.identifier {
        if identifier != &request.identifier {
            return fail("identifier", &request.identifier, identifier);
        }
    }

    let derived = initial_salt
        .or(incoming.initial_salt.as_deref())
        .map(|initial| derive_request_message_salt(request_id, initial));
    if let (Some(expected), Some(actual)) = (&derived, &incoming.request_message_salt) {
        if expected != actual {
            return fail("request_message_salt", expected, actual);
        }
    }
    if let Some(salt) = incoming.request_message_salt.as_ref().or(derived.as_ref()) {
        let expected = request_message_hash(&request.message, salt);
        if expected != incoming.request_message_hash {
            return fail("request_message_hash", &expected, &incoming.request_message_hash);
        }
    }

    if incoming.data_request_list.len() != request.data_request_list.len() {
        return fail(
            "data_request_list.len",
            &request.data_request_list.len(),
            &incoming.data_request_list.len(),
        );
    }
    for item in &request.data_request_list {
        let field = format!("data_request_list[{}]", item.service_id);
        let Some(received) = incoming
            .data_request_list
            .iter()
            .find(|i| i.service_id == item.service_id)
        else {
            return fail(&field, &"present", &"absent");
        };
        if received.min_as != item.min_as {
            return fail(&format!("{field}.min_as"), &item.min_as, &received.min_as);
        }
        if !item.as_id_list.is_empty() && received.as_id_list != item.as_id_list {
            return fail(
                &format!("{field}.as_id_list"),
                &join(&item.as_id_list),
                &join(&received.as_id_list),
            );
        }
    }
    Ok(())
}

/// Check that an AS was asked for the service its step answers.
pub fn verify_data_request(
    scenario: &Scenario,
    data_request: &DataRequest,
    request_id: &RequestId,
    service_id: &ServiceId,
) -> Result<(), ConformanceError> {
    let context = format!("data_request {} for {}", data_request.request_id, service_id);
    let mismatch = |field: &str, expected: String, actual: String| {
        Err(ConformanceError::new(context.clone(), field, expected, actual))
    };

    if &data_request.request_id != request_id {
        return mismatch("request_id", request_id.to_string(), data_request.request_id.to_string());
    }
    if &data_request.service_id != service_id {
        return mismatch("service_id", service_id.to_string(), data_request.service_id.to_string());
    }
    if data_request.requester_node_id != scenario.rp {
        return mismatch(
            "requester_node_id",
            scenario.rp.to_string(),
            data_request.requester_node_id.to_string(),
        );
    }
    if let Some(mode) = data_request.mode {
        if mode != scenario.request.mode {
            return mismatch("mode", scenario.request.mode.to_string(), mode.to_string());
        }
    }
    let declared = scenario
        .request
        .data_request_list
        .iter()
        .find(|i| &i.service_id == service_id);
    if let (Some(item), Some(params)) = (declared, &data_request.request_params) {
        if params != &item.request_params {
            return mismatch("request_params", item.request_params.clone(), params.clone());
        }
    }
    Ok(())
}

fn join(nodes: &[ndid_core::NodeId]) -> String {
    let names: Vec<&str> = nodes.iter().map(|n| n.as_str()).collect();
    format!("[{}]", names.join(", "))
}
